//! In-memory telemetry stores.
//!
//! Four structures owned by the engine: the raw snapshot log, the pump
//! interval ledger, the compacted historical series and the stats record.

mod history;
mod intervals;
mod models;
mod snapshots;
mod stats;

pub use history::*;
pub use intervals::*;
pub use models::*;
pub use snapshots::*;
pub use stats::*;
