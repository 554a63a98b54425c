//! Run rows, artifact rows and the aggregation that flips runs terminal.

pub mod aggregator;
pub mod model;
pub mod store;

pub use aggregator::RunAggregator;
pub use model::{ArtifactRow, Run, RunStatus};
pub use store::{MemoryRunStore, RunStore};
