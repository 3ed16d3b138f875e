//! Labels filter expressions.
//!
//! Grammar:
//!
//! ```text
//! expr  := and (("||" | ",") and)*
//! and   := unary ("&&" unary)*
//! unary := "!" unary | "(" expr ")" | label
//! label := [A-Za-z0-9_.-]+
//! ```
//!
//! The whole expression `none` (or an empty one) matches nothing and `all`
//! matches everything.

use crate::EngineError;
use std::fmt;

/// Filter expression that selects no check
pub const NO_LABELS_EXPR: &str = "none";
/// Filter expression that selects every check
pub const ALL_LABELS_EXPR: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Label(String),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

impl Node {
    fn eval(&self, labels: &[&str]) -> bool {
        match self {
            Node::Label(label) => labels.contains(&label.as_str()),
            Node::Not(inner) => !inner.eval(labels),
            Node::And(a, b) => a.eval(labels) && b.eval(labels),
            Node::Or(a, b) => a.eval(labels) || b.eval(labels),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    Nothing,
    Everything,
    Expr(Node),
}

/// A parsed labels filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelsExpr {
    source: String,
    matcher: Matcher,
}

impl LabelsExpr {
    pub fn parse(expr: &str) -> Result<Self, EngineError> {
        let trimmed = expr.trim();
        let matcher = match trimmed {
            "" | NO_LABELS_EXPR => Matcher::Nothing,
            ALL_LABELS_EXPR => Matcher::Everything,
            _ => {
                let tokens = tokenize(trimmed).map_err(|message| invalid(expr, message))?;
                let mut parser = Parser { tokens, pos: 0 };
                let node = parser.parse_or().map_err(|message| invalid(expr, message))?;
                if let Some(token) = parser.peek() {
                    return Err(invalid(expr, format!("unexpected {}", token)));
                }
                Matcher::Expr(node)
            }
        };

        Ok(LabelsExpr {
            source: trimmed.to_string(),
            matcher,
        })
    }

    /// A filter that selects every check
    pub fn all() -> Self {
        LabelsExpr {
            source: ALL_LABELS_EXPR.to_string(),
            matcher: Matcher::Everything,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, labels: &[&str]) -> bool {
        match &self.matcher {
            Matcher::Nothing => false,
            Matcher::Everything => true,
            Matcher::Expr(node) => node.eval(labels),
        }
    }
}

impl fmt::Display for LabelsExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn invalid(expr: &str, message: String) -> EngineError {
    EngineError::InvalidLabelsExpr {
        expr: expr.to_string(),
        message,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Label(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Label(label) => write!(f, "label '{}'", label),
            Token::And => f.write_str("'&&'"),
            Token::Or => f.write_str("'||'"),
            Token::Not => f.write_str("'!'"),
            Token::Open => f.write_str("'('"),
            Token::Close => f.write_str("')'"),
        }
    }
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '!' => tokens.push(Token::Not),
            ',' => tokens.push(Token::Or),
            '&' | '|' => {
                if chars.next_if(|&(_, next)| next == c).is_none() {
                    return Err(format!("expected '{}{}' at position {}", c, c, i));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            c if is_label_char(c) => {
                let mut label = String::from(c);
                while let Some((_, next)) = chars.next_if(|&(_, next)| is_label_char(next)) {
                    label.push(next);
                }
                tokens.push(Token::Label(label));
            }
            _ => return Err(format!("unexpected character '{}' at position {}", c, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Node, String> {
        let mut node = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            node = Node::Or(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Node, String> {
        let mut node = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            node = Node::And(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Node, String> {
        match self.advance() {
            Some(Token::Not) => Ok(Node::Not(Box::new(self.parse_unary()?))),
            Some(Token::Open) => {
                let node = self.parse_or()?;
                match self.advance() {
                    Some(Token::Close) => Ok(node),
                    Some(token) => Err(format!("expected ')', found {}", token)),
                    None => Err("unbalanced '('".to_string()),
                }
            }
            Some(Token::Label(label)) => Ok(Node::Label(label)),
            Some(token) => Err(format!("expected a label, found {}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
