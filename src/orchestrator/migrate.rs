//! Ordered schema migrations for the persisted workflow state.
//!
//! Migrations operate on raw `serde_json::Value`s so that old files can be
//! read even when their shape no longer matches `WorkflowState`.

use serde_json::{Map, Value};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: &str = "2";

/// Version assumed for files that predate the `schemaVersion` field.
pub const LEGACY_SCHEMA_VERSION: &str = "1";

type MigrationFn = fn(Map<String, Value>) -> Result<Map<String, Value>, String>;

/// `(from, to, migration)` in application order.
const MIGRATIONS: &[(&str, &str, MigrationFn)] = &[("1", "2", migrate_v1_to_v2)];

/// Parse the major component of a schema version string.
pub fn major(version: &str) -> Result<u32, String> {
    version
        .split('.')
        .next()
        .unwrap_or_default()
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("unrecognized schema version '{}'", version))
}

/// Read the schema version recorded in a raw state document.
pub fn schema_version(value: &Value) -> String {
    value
        .get("schemaVersion")
        .and_then(Value::as_str)
        .unwrap_or(LEGACY_SCHEMA_VERSION)
        .to_string()
}

/// Whether a document at `version` must be migrated before use.
pub fn needs_migration(version: &str) -> Result<bool, String> {
    let found = major(version)?;
    let current = major(CURRENT_SCHEMA_VERSION)?;
    if found > current {
        return Err(format!(
            "schema version {} is newer than supported version {}",
            version, CURRENT_SCHEMA_VERSION
        ));
    }
    Ok(found < current)
}

/// Apply every migration from `from` up to the current version.
pub fn migrate(value: Value, from: &str) -> Result<Value, String> {
    let Value::Object(mut doc) = value else {
        return Err("state document is not a JSON object".to_string());
    };

    let mut version = major(from)?;
    let target = major(CURRENT_SCHEMA_VERSION)?;

    while version < target {
        let (_, to, step) = MIGRATIONS
            .iter()
            .find(|(f, _, _)| major(f).ok() == Some(version))
            .ok_or_else(|| format!("no migration registered from schema version {}", version))?;
        doc = step(doc)?;
        version = major(to)?;
        doc.insert("schemaVersion".to_string(), Value::String(to.to_string()));
    }

    Ok(Value::Object(doc))
}

/// v1 stored timestamps under `phase_timestamps` and had no graduation baseline.
fn migrate_v1_to_v2(mut doc: Map<String, Value>) -> Result<Map<String, Value>, String> {
    if let Some(stamps) = doc.remove("phase_timestamps") {
        if !stamps.is_object() {
            return Err("phase_timestamps must be an object".to_string());
        }
        doc.entry("phaseTimestamps").or_insert(stamps);
    }

    let graduated = doc
        .get("graduated")
        .map(|g| g.as_bool().ok_or("graduated must be a boolean"))
        .transpose()?
        .unwrap_or(false);

    if !doc.contains_key("graduationBaseline") {
        let baseline = if graduated {
            doc.get("currentMetrics").cloned().unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        doc.insert("graduationBaseline".to_string(), baseline);
    }

    Ok(doc)
}
