use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::migrate::{self, CURRENT_SCHEMA_VERSION};
use crate::errors::WorkflowError;
use crate::metrics::MetricsSnapshot;
use crate::phase::Phase;
use crate::regression::ReEntryEvent;
use crate::util;

/// Timestamp event recorded when a phase is entered.
pub const ENTERED: &str = "entered";
/// Timestamp event recorded when a phase's task plan finished successfully.
pub const COMPLETED: &str = "completed";

/// The single persisted record of workflow progress for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub schema_version: String,
    #[serde(default)]
    pub current_phase: Phase,
    #[serde(default)]
    pub baseline_metrics: MetricsSnapshot,
    #[serde(default)]
    pub current_metrics: MetricsSnapshot,
    /// Keys are `<phase slug>:<event>`, e.g. `structure:completed`.
    #[serde(default)]
    pub phase_timestamps: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub re_entry_events: Vec<ReEntryEvent>,
    #[serde(default)]
    pub graduated: bool,
    /// Metrics at the moment of graduation; regression is measured against it.
    #[serde(default)]
    pub graduation_baseline: Option<MetricsSnapshot>,
    /// Toolchain handler id chosen during assessment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<String>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            current_phase: Phase::Assessment,
            baseline_metrics: MetricsSnapshot::default(),
            current_metrics: MetricsSnapshot::default(),
            phase_timestamps: BTreeMap::new(),
            re_entry_events: Vec::new(),
            graduated: false,
            graduation_baseline: None,
            toolchain: None,
        }
    }
}

fn timestamp_key(phase: Phase, event: &str) -> String {
    format!("{}:{}", phase.slug(), event)
}

impl WorkflowState {
    pub fn stamp(&mut self, phase: Phase, event: &str, at: DateTime<Utc>) {
        self.phase_timestamps.insert(timestamp_key(phase, event), at);
    }

    pub fn timestamp(&self, phase: Phase, event: &str) -> Option<DateTime<Utc>> {
        self.phase_timestamps.get(&timestamp_key(phase, event)).copied()
    }

    pub fn is_phase_complete(&self, phase: Phase) -> bool {
        self.timestamp(phase, COMPLETED).is_some()
    }

    pub fn mark_complete(&mut self, phase: Phase) {
        self.stamp(phase, COMPLETED, Utc::now());
    }

    /// Forget completion of `phase` and every later phase.
    ///
    /// Used when a phase is (re-)entered so earlier runs cannot satisfy
    /// "prior phase complete" for the phases that follow.
    pub fn clear_completion_from(&mut self, phase: Phase) {
        self.phase_timestamps
            .remove(&timestamp_key(phase, COMPLETED));
        for later in phase.later_phases() {
            self.phase_timestamps.remove(&timestamp_key(later, COMPLETED));
        }
    }

    pub fn latest_re_entry(&self) -> Option<&ReEntryEvent> {
        self.re_entry_events.last()
    }
}

/// Atomic load/save of `state.json`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the state, migrating older schemas in memory.
    ///
    /// A missing file yields the default state. Unparseable or unmigratable
    /// files are copied to a timestamped backup and reported as
    /// `CheckpointCorrupted`; the original is left as it was.
    pub fn load(&self) -> Result<WorkflowState, WorkflowError> {
        self.load_inner(true)
    }

    /// Like [`StateStore::load`] but never writes: a corrupted file is
    /// reported without a backup copy.
    pub fn load_read_only(&self) -> Result<WorkflowState, WorkflowError> {
        self.load_inner(false)
    }

    fn load_inner(&self, backup_corrupt: bool) -> Result<WorkflowState, WorkflowError> {
        if !self.path.exists() {
            return Ok(WorkflowState::default());
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| WorkflowError::io(&self.path, e))?;

        let message = match Self::decode(&content) {
            Ok(state) => return Ok(state),
            Err(message) => message,
        };
        let backup = if backup_corrupt {
            let backup = util::backup_file(&self.path, "corrupt")?;
            tracing::warn!(
                path = %self.path.display(),
                backup = %backup.display(),
                "State file unreadable: {}",
                message
            );
            Some(backup)
        } else {
            None
        };
        Err(WorkflowError::CheckpointCorrupted {
            path: self.path.clone(),
            backup,
            message,
        })
    }

    fn decode(content: &str) -> Result<WorkflowState, String> {
        let value: serde_json::Value =
            serde_json::from_str(content).map_err(|e| format!("invalid JSON: {}", e))?;
        let version = migrate::schema_version(&value);

        let value = if migrate::needs_migration(&version)? {
            tracing::info!(from = %version, to = CURRENT_SCHEMA_VERSION, "Migrating workflow state");
            migrate::migrate(value, &version)?
        } else {
            value
        };

        serde_json::from_value(value).map_err(|e| format!("invalid state: {}", e))
    }

    pub fn save(&self, state: &WorkflowState) -> Result<(), WorkflowError> {
        util::write_json_atomic(&self.path, state)
    }

    /// Remove the state file. Returns whether one existed.
    pub fn reset(&self) -> Result<bool, WorkflowError> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path).map_err(|e| WorkflowError::io(&self.path, e))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ComplexityReport, SecurityReport};
    use crate::regression::RegressionTrigger;
    use tempfile::tempdir;

    fn store() -> (StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        (store, dir)
    }

    fn populated_state(phase: Phase) -> WorkflowState {
        let metrics = MetricsSnapshot {
            captured_at: Some(Utc::now()),
            coverage: 0.72,
            complexity: ComplexityReport {
                average: 4.5,
                maximum: 19.0,
                violation_count: 2,
            },
            vulnerabilities: SecurityReport {
                critical: 0,
                high: 1,
                medium: 3,
                low: 7,
            },
            build_passing: true,
            documentation_coverage: Some(0.4),
            history_findings: 1,
            layout_compliant: true,
            unavailable: vec!["documentation: no docs command".into()],
        };
        let mut state = WorkflowState {
            current_phase: phase,
            baseline_metrics: metrics.clone(),
            current_metrics: metrics.clone(),
            graduated: phase == Phase::Graduated,
            graduation_baseline: Some(metrics),
            toolchain: Some("rust".into()),
            ..Default::default()
        };
        state.stamp(Phase::Assessment, COMPLETED, Utc::now());
        state.re_entry_events.push(ReEntryEvent {
            detected_at: Utc::now(),
            trigger: RegressionTrigger::CoverageDrop,
            baseline_value: 0.65,
            current_value: 0.45,
            threshold_breached: 0.5,
            recommended_phase: Phase::Testing,
        });
        state
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let (store, _dir) = store();
        let state = store.load().unwrap();
        assert_eq!(state, WorkflowState::default());
        assert_eq!(state.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(!store.exists());
    }

    #[test]
    fn test_round_trip_every_phase() {
        let (store, _dir) = store();
        for phase in Phase::ALL {
            let state = populated_state(phase);
            store.save(&state).unwrap();
            assert_eq!(store.load().unwrap(), state);
        }
    }

    #[test]
    fn test_round_trip_preserves_arbitrary_metric_values() {
        let (store, _dir) = store();
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        let mut state = populated_state(Phase::Testing);
        for i in 0..2000 {
            // Unit-interval values with full 53-bit mantissas, plus raw bit patterns.
            state.current_metrics.coverage = (next() >> 11) as f64 / (1u64 << 53) as f64;
            state.baseline_metrics.coverage = (next() >> 11) as f64 / (1u64 << 53) as f64;
            let raw = f64::from_bits(next());
            state.current_metrics.complexity.average = if raw.is_finite() { raw } else { i as f64 };
            state.current_metrics.documentation_coverage = Some(1.0 / (i as f64 + 3.0));

            store.save(&state).unwrap();
            let loaded = store.load().unwrap();
            assert_eq!(
                loaded.current_metrics.coverage.to_bits(),
                state.current_metrics.coverage.to_bits(),
                "coverage {} changed across save/load",
                state.current_metrics.coverage
            );
            assert_eq!(loaded, state);
        }
    }

    #[test]
    fn test_round_trip_default_state() {
        let (store, _dir) = store();
        store.save(&WorkflowState::default()).unwrap();
        assert_eq!(store.load().unwrap(), WorkflowState::default());
    }

    #[test]
    fn test_saved_file_uses_camel_case_keys() {
        let (store, _dir) = store();
        store.save(&populated_state(Phase::Testing)).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        for key in [
            "schemaVersion",
            "currentPhase",
            "baselineMetrics",
            "currentMetrics",
            "phaseTimestamps",
            "reEntryEvents",
            "graduated",
        ] {
            assert!(raw.get(key).is_some(), "missing key {key}");
        }
        assert!(raw["phaseTimestamps"].get("assessment:completed").is_some());
    }

    #[test]
    fn test_corrupted_file_is_backed_up_and_left_untouched() {
        let (store, dir) = store();
        fs::write(store.path(), "{\"currentPhase\": ").unwrap();

        let err = store.load().unwrap_err();

        match err {
            WorkflowError::CheckpointCorrupted { backup, .. } => {
                let backup = backup.expect("load writes a backup");
                assert!(backup.exists());
                assert_eq!(fs::read_to_string(&backup).unwrap(), "{\"currentPhase\": ");
            }
            other => panic!("expected CheckpointCorrupted, got {other:?}"),
        }
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{\"currentPhase\": ");
        let backups = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("state.json.corrupt-")
            })
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_read_only_load_reports_corruption_without_backup() {
        let (store, dir) = store();
        fs::write(store.path(), "{ not json").unwrap();

        for _ in 0..3 {
            let err = store.load_read_only().unwrap_err();
            assert!(matches!(
                err,
                WorkflowError::CheckpointCorrupted { backup: None, .. }
            ));
            assert!(!err.to_string().contains("a copy was saved"));
        }

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["state.json".to_string()]);
    }

    #[test]
    fn test_legacy_file_is_migrated_on_load() {
        let (store, _dir) = store();
        fs::write(
            store.path(),
            r#"{
                "currentPhase": "Quality",
                "baselineMetrics": {"coverage": 0.1},
                "currentMetrics": {"coverage": 0.5},
                "phase_timestamps": {"testing:completed": "2026-03-01T10:00:00Z"},
                "reEntryEvents": [],
                "graduated": false
            }"#,
        )
        .unwrap();

        let state = store.load().unwrap();

        assert_eq!(state.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(state.current_phase, Phase::Quality);
        assert!(state.is_phase_complete(Phase::Testing));
        assert!(state.graduation_baseline.is_none());
    }

    #[test]
    fn test_failed_migration_is_reported_as_corruption() {
        let (store, _dir) = store();
        fs::write(store.path(), r#"{"schemaVersion": "1", "graduated": "yes"}"#).unwrap();
        assert!(matches!(
            store.load(),
            Err(WorkflowError::CheckpointCorrupted { .. })
        ));
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let (store, _dir) = store();
        fs::write(store.path(), r#"{"schemaVersion": "7", "currentPhase": "Testing"}"#).unwrap();
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn test_clear_completion_from_drops_later_phases() {
        let mut state = WorkflowState::default();
        for phase in Phase::ALL {
            state.mark_complete(phase);
        }
        state.clear_completion_from(Phase::Testing);
        assert!(state.is_phase_complete(Phase::Assessment));
        assert!(state.is_phase_complete(Phase::Structure));
        assert!(!state.is_phase_complete(Phase::Testing));
        assert!(!state.is_phase_complete(Phase::Validation));
        assert!(!state.is_phase_complete(Phase::Graduated));
    }

    #[test]
    fn test_reset_removes_file() {
        let (store, _dir) = store();
        assert!(!store.reset().unwrap());
        store.save(&WorkflowState::default()).unwrap();
        assert!(store.reset().unwrap());
        assert!(!store.exists());
    }
}
