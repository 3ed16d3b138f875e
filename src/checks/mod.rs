//! Check catalogs.
//!
//! Each submodule registers the checks of one group and provides their
//! catalog entries.
//!
//! # Graceful Degradation
//!
//! All checks follow these degradation rules:
//! - Nothing to test: return a `Skipped` outcome with the reason
//! - Assertion does not hold (workload never ready): `Failed` outcome
//! - Cluster unreachable, conflicts never resolved: return an error, the
//!   check is recorded `Errored`
//! - Stop observed: return the abort, the check is recorded `Aborted`

pub mod lifecycle;

use crate::catalog::Catalog;

/// Catalog entries for every check shipped with the crate
pub fn builtin_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.extend(lifecycle::catalog());
    catalog
}
