//! Check execution engine.
//!
//! Provides the check lifecycle, groups and their registry, run
//! orchestration, and the results store.

pub mod check;
pub mod filter;
pub mod group;
pub mod orchestrator;
pub mod registry;
pub mod result;
pub mod stop;
