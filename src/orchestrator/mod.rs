//! Phase orchestration: the state machine, its entry requirements, metric
//! collection and the persisted workflow state.

pub mod collect;
pub mod machine;
pub mod migrate;
pub mod requirements;
pub mod state;

pub use collect::MetricsCollector;
pub use machine::{MonitorOutcome, PhaseOrchestrator, RunObserver, TaskEvent, TransitionCheck};
pub use state::{StateStore, WorkflowState};
