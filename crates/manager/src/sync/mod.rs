//! Background synchronization jobs.

pub mod queue;
pub mod reevaluation;

pub use queue::{EvalSink, InventoryAid, RedisEvalSink};
pub use reevaluation::{ReevaluationJob, ReevaluationSettings};
