//! The TideQL execution engine.
//!
//! Routes a planned statement to the adapter owning its table, pushes the
//! plan down, and when the source declines part of it re-executes the
//! statement locally against the materialised batch (rewritten FROM
//! clause). Multi-source JOINs materialise every table and run entirely on
//! the embedded DataFusion engine.

mod executor;
mod local;

pub use executor::{AsyncExecutor, Executor, StatementOutcome};
pub use local::LocalEngine;
