//! Shared UI icons.
//!
//! Each icon falls back to a plain-text marker on terminals without emoji
//! support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");

// Task indicators
pub static COMMIT: Emoji<'_, '_> = Emoji("📝 ", "+");
pub static REVERT: Emoji<'_, '_> = Emoji("↩️  ", "[REVERT]");
pub static UNCHANGED: Emoji<'_, '_> = Emoji("➖ ", "=");

// Workflow indicators
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static PIVOT: Emoji<'_, '_> = Emoji("🔄 ", "[RE-ENTER]");
pub static GRADUATE: Emoji<'_, '_> = Emoji("🎓 ", "[GRAD]");
