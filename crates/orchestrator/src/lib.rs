pub mod catalog;
pub mod classifier;
pub mod config;
pub mod cycle;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod logs;
pub mod planner;
pub mod reconcile;
pub mod remote;
pub mod resolver;
pub mod state_machine;
pub mod store;
pub mod submission;
pub mod summary;
pub mod template;

pub use catalog::{EntityCatalog, VersionsLogCatalog};
pub use classifier::{LogOutcomeClassifier, LogVerdict};
pub use config::{Settings, DEFAULT_CONFIG_FILE};
pub use cycle::{Cycle, CycleOptions};
pub use error::{OrchestratorError, Result};
pub use ledger::Ledger;
pub use lock::{LedgerLock, LockInfo};
pub use logs::{JobLogSource, LogDirectory};
pub use planner::{SubmissionPlan, SubmissionPlanner};
pub use reconcile::{ReconcileReport, ReconcileWarning, ReconciliationEngine, Transition};
pub use remote::{Presence, RemoteIndex, RemoteLayout, RemoteProbe};
pub use resolver::{JobResolver, Resolution, ResolutionSource};
pub use state_machine::BuildStateMachine;
pub use store::LedgerStore;
pub use submission::{SubmissionReport, Submitter};
pub use summary::CycleSummary;
pub use template::{JobParameters, JobTemplate};
