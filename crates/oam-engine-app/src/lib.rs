//! Binary wiring for the application rendering and workflow execution core:
//! CLI parsing, configuration loading, file-backed fixture stores, the
//! step-runner factory, and the reconciliation loop that drives the lower
//! crates end to end. Ambient wiring only — the algorithms live in
//! `oam-engine-core`, `oam-engine-render`, and `oam-engine-workflow`.

pub mod cli;
pub mod error;
pub mod io;
pub mod reconcile;
pub mod runners;
pub mod store;
