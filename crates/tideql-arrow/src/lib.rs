//! The columnar data currency of TideQL.
//!
//! Batches are Arrow [`RecordBatch`]es, produced by adapters and consumed by
//! the engine and cursor; they are never mutated after construction. This
//! crate re-exports `datafusion`'s bundled Arrow so every crate in the
//! workspace agrees on one Arrow version, and provides the conversions
//! between loosely-typed JSON records and typed batches.

pub use datafusion;
pub use datafusion::arrow;
pub use datafusion::arrow::record_batch::RecordBatch;

mod convert;
mod rows;

pub use convert::*;
pub use rows::*;
