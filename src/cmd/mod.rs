//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled                                                |
//! |----------|------------------------------------------------------------------|
//! | `run`    | `Assess` .. `Validate`, `Graduate`, `Resume`, `Monitor`          |
//! | `phase`  | `Init`, `Status`, `Log`, `Reset`                                 |
//! | `config` | `Config`                                                         |

pub mod config;
pub mod phase;
pub mod run;

pub use config::cmd_config;
pub use phase::{cmd_init, cmd_log, cmd_reset, cmd_status};
pub use run::{cmd_graduate, cmd_monitor, cmd_phase, cmd_resume};

use remedy::phase::Phase;

/// The subcommand that runs `phase`.
pub fn command_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Assessment => "assess",
        Phase::Structure => "structure",
        Phase::Testing => "testing",
        Phase::Quality => "quality",
        Phase::Validation => "validate",
        Phase::Graduated => "graduate",
    }
}
