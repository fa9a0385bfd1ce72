pub mod lock;
pub mod runner;
pub mod state;

pub use lock::RunLock;
pub use runner::{Orchestrator, RunContext, RunSummary, VerificationRecord};
pub use state::{AddressTable, Checkpoint, CheckpointStore, ProgressTable};
