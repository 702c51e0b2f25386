pub mod git;

pub use git::{GitTracker, HistoryFinding};
