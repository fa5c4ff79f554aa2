pub mod capability;
pub mod clock;
pub mod comparator;
pub mod engine;
pub mod facts;
pub mod local_lister;
pub mod remote_lister;
pub mod scanner;

#[cfg(test)]
pub mod testing;

pub use capability::{probe, CapabilitySet};
pub use clock::{ClockOffset, ClockReconciler, Confidence};
pub use comparator::{
    diff, ActionSummary, CompareConfig, Direction, PlanItem, ReconciliationPlan, SyncAction,
    TreeDiffer,
};
pub use engine::SyncSession;
pub use local_lister::LocalLister;
pub use remote_lister::{ListingStrategy, RemoteLister};
pub use scanner::{EntryFilter, ScanConfig};
