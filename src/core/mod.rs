pub mod engine;
pub mod fingerprint;
pub mod orchestrator;
pub mod scanner;
pub mod state;
pub mod transfer;
pub mod watcher;

pub use engine::{
    plan_full, plan_stale_downloads, ChangeKind, LocalChange, PassReport, ReconcileEngine,
    SyncPlan, TransferOutcome, TransferPorts,
};
pub use orchestrator::Orchestrator;
pub use scanner::{ScanConfig, ScanOutcome, TreeScanner};
pub use state::{FileRecord, StateStore, SyncState};
pub use transfer::StoragePorts;
