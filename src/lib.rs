pub mod audit;
pub mod checkpoint;
pub mod errors;
pub mod gates;
pub mod init;
pub mod interrupt;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod regression;
pub mod remedy_config;
pub mod safe_commit;
pub mod toolchain;
pub mod tracker;
pub mod ui;
pub mod util;
