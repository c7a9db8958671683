// =============================================================================
// ConfigStore — single active version, optimistic concurrency, history
// =============================================================================
//
// The store owns the active config version. Updates carry the version the
// writer based its edit on; the write is accepted only while that is still
// the active version (compare-and-swap under one mutex), otherwise the
// caller gets a VersionConflict with the current version.
//
// Written versions are immutable: the canonical JSON produced at write time
// is stored verbatim, so `load_version` returns byte-identical content for
// as long as the store lives. Optional disk persistence uses the atomic
// tmp + rename pattern.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, ConfigParams};
use crate::errors::EngineError;

/// Lightweight history row for `GET /config/history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigHistoryEntry {
    pub version: String,
    pub created_at: i64,
    pub created_by: String,
    pub notes: String,
    pub checksum: String,
}

/// Result of applying (or re-importing) a config proposal.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    pub version: String,
    pub applied: bool,
    pub changed_paths: Vec<String>,
}

struct StoreInner {
    active: Arc<Config>,
    /// Full snapshots by version, canonical JSON captured at write time.
    versions: HashMap<String, (Arc<Config>, String)>,
    /// Versions in creation order.
    order: Vec<String>,
    next_seq: u64,
}

/// Thread-safe store of the active configuration and its full history.
pub struct ConfigStore {
    inner: Mutex<StoreInner>,
}

impl ConfigStore {
    /// Create a store seeded with `params` as version v1.
    pub fn new(params: ConfigParams, created_by: &str) -> Self {
        let config = Arc::new(Config {
            version: "v1".to_string(),
            params,
            created_at: chrono::Utc::now().timestamp_millis(),
            created_by: created_by.to_string(),
            notes: "initial".to_string(),
        });
        let json = config.canonical_json();
        let mut versions = HashMap::new();
        versions.insert("v1".to_string(), (config.clone(), json));
        Self {
            inner: Mutex::new(StoreInner {
                active: config,
                versions,
                order: vec!["v1".to_string()],
                next_seq: 2,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ConfigParams::default(), "system")
    }

    /// Immutable snapshot of the active version. This is what pipeline runs
    /// take at entry.
    pub fn active(&self) -> Arc<Config> {
        self.inner.lock().active.clone()
    }

    /// Byte-identical canonical JSON of a stored version.
    pub fn load_version(&self, version: &str) -> Option<String> {
        self.inner
            .lock()
            .versions
            .get(version)
            .map(|(_, json)| json.clone())
    }

    pub fn history(&self) -> Vec<ConfigHistoryEntry> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|v| inner.versions.get(v))
            .map(|(cfg, _)| ConfigHistoryEntry {
                version: cfg.version.clone(),
                created_at: cfg.created_at,
                created_by: cfg.created_by.clone(),
                notes: cfg.notes.clone(),
                checksum: cfg.params_checksum(),
            })
            .collect()
    }

    /// Validate a proposal against the active version without applying it.
    pub fn validate(&self, proposed: &ConfigParams) -> Result<(), EngineError> {
        proposed.validate_structure()?;
        let active = self.active();
        proposed.validate_delta(&active.params)
    }

    /// Optimistic-concurrency update. `based_on_version` must equal the
    /// active version at swap time or the write is rejected.
    pub fn update(
        &self,
        proposed: ConfigParams,
        based_on_version: &str,
        created_by: &str,
        notes: &str,
    ) -> Result<ApplyResult, EngineError> {
        proposed.validate_structure()?;

        let mut inner = self.inner.lock();
        if inner.active.version != based_on_version {
            return Err(EngineError::VersionConflict {
                current: inner.active.version.clone(),
                based_on: based_on_version.to_string(),
            });
        }
        proposed.validate_delta(&inner.active.params)?;

        let changed_paths = diff_paths(
            &serde_json::to_value(&inner.active.params).expect("params serialise"),
            &serde_json::to_value(&proposed).expect("params serialise"),
            "",
        );
        if changed_paths.is_empty() {
            return Ok(ApplyResult {
                version: inner.active.version.clone(),
                applied: false,
                changed_paths,
            });
        }

        let version = format!("v{}", inner.next_seq);
        inner.next_seq += 1;
        let config = Arc::new(Config {
            version: version.clone(),
            params: proposed,
            created_at: chrono::Utc::now().timestamp_millis(),
            created_by: created_by.to_string(),
            notes: notes.to_string(),
        });
        let json = config.canonical_json();
        inner
            .versions
            .insert(version.clone(), (config.clone(), json));
        inner.order.push(version.clone());
        inner.active = config;

        info!(
            version = %version,
            created_by,
            changes = changed_paths.len(),
            "config updated"
        );
        Ok(ApplyResult {
            version,
            applied: true,
            changed_paths,
        })
    }

    /// Re-activate the params of an older version as a new version.
    pub fn rollback(&self, to_version: &str, created_by: &str) -> Result<ApplyResult, EngineError> {
        let (params, active_version) = {
            let inner = self.inner.lock();
            let target = inner.versions.get(to_version).ok_or_else(|| {
                EngineError::ValidationFailure(format!("unknown config version: {to_version}"))
            })?;
            (target.0.params.clone(), inner.active.version.clone())
        };

        // A rollback re-applies known-good params; only the CAS and the
        // structural rules apply, not the bounded-delta limits.
        let mut inner = self.inner.lock();
        if inner.active.version != active_version {
            return Err(EngineError::VersionConflict {
                current: inner.active.version.clone(),
                based_on: active_version,
            });
        }

        let changed_paths = diff_paths(
            &serde_json::to_value(&inner.active.params).expect("params serialise"),
            &serde_json::to_value(&params).expect("params serialise"),
            "",
        );
        if changed_paths.is_empty() {
            warn!(to_version, "rollback target equals active config — no-op");
            return Ok(ApplyResult {
                version: inner.active.version.clone(),
                applied: false,
                changed_paths,
            });
        }

        let version = format!("v{}", inner.next_seq);
        inner.next_seq += 1;
        let config = Arc::new(Config {
            version: version.clone(),
            params,
            created_at: chrono::Utc::now().timestamp_millis(),
            created_by: created_by.to_string(),
            notes: format!("rollback to {to_version}"),
        });
        let json = config.canonical_json();
        inner
            .versions
            .insert(version.clone(), (config.clone(), json));
        inner.order.push(version.clone());
        inner.active = config;

        info!(version = %version, to_version, "config rolled back");
        Ok(ApplyResult {
            version,
            applied: true,
            changed_paths,
        })
    }

    /// Canonical JSON of the active version, suitable for re-import.
    pub fn export(&self) -> String {
        let inner = self.inner.lock();
        inner
            .versions
            .get(&inner.active.version)
            .map(|(_, json)| json.clone())
            .unwrap_or_else(|| inner.active.canonical_json())
    }

    /// Import a previously exported payload. Re-importing the active export
    /// applies zero changes.
    pub fn import(&self, payload: &str, created_by: &str) -> Result<ApplyResult, EngineError> {
        let parsed: Config = serde_json::from_str(payload).map_err(|e| {
            EngineError::ValidationFailure(format!("import payload is not a config: {e}"))
        })?;
        let based_on = self.active().version.clone();
        self.update(
            parsed.params,
            &based_on,
            created_by,
            &format!("imported (source version {})", parsed.version),
        )
    }

    /// Persist the active version to disk with an atomic tmp + rename write.
    pub fn save_active(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = self.export();
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "active config saved (atomic)");
        Ok(())
    }

    /// Load a previously saved active config as the seed version.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let parsed: Config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        parsed
            .params
            .validate_structure()
            .map_err(|e| anyhow::anyhow!("saved config invalid: {e}"))?;
        info!(path = %path.display(), version = %parsed.version, "config loaded from disk");
        Ok(Self::new(parsed.params, &parsed.created_by))
    }
}

/// Recursively collect dotted paths whose values differ between two JSON
/// trees. Used for change reporting on update/import.
pub fn diff_paths(a: &serde_json::Value, b: &serde_json::Value, prefix: &str) -> Vec<String> {
    use serde_json::Value;
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            let mut out = Vec::new();
            let keys: std::collections::BTreeSet<&String> = ma.keys().chain(mb.keys()).collect();
            for key in keys {
                let child_prefix = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                };
                match (ma.get(key), mb.get(key)) {
                    (Some(va), Some(vb)) => out.extend(diff_paths(va, vb, &child_prefix)),
                    _ => out.push(child_prefix),
                }
            }
            out
        }
        _ => {
            if a == b {
                Vec::new()
            } else {
                vec![prefix.to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_cas_accepts_current_version() {
        let store = ConfigStore::with_defaults();
        let mut params = store.active().params.clone();
        params.gates.macro_permission = 6.5;

        let result = store.update(params, "v1", "tester", "raise permission").unwrap();
        assert!(result.applied);
        assert_eq!(result.version, "v2");
        assert_eq!(store.active().version, "v2");
        assert!(result
            .changed_paths
            .iter()
            .any(|p| p == "gates.macro_permission"));
    }

    #[test]
    fn update_cas_rejects_stale_version() {
        let store = ConfigStore::with_defaults();
        let mut params = store.active().params.clone();
        params.gates.macro_permission = 6.5;
        store.update(params.clone(), "v1", "a", "").unwrap();

        params.gates.macro_permission = 6.2;
        let err = store.update(params, "v1", "b", "").unwrap_err();
        assert_eq!(err.kind(), "VersionConflict");
        if let EngineError::VersionConflict { current, based_on } = err {
            assert_eq!(current, "v2");
            assert_eq!(based_on, "v1");
        }
    }

    #[test]
    fn written_versions_are_byte_identical_later() {
        let store = ConfigStore::with_defaults();
        let first = store.load_version("v1").unwrap();
        let mut params = store.active().params.clone();
        params.gates.setup_veto = 6.3;
        store.update(params, "v1", "tester", "").unwrap();

        // v1 content must not have changed after v2 was written.
        assert_eq!(store.load_version("v1").unwrap(), first);
    }

    #[test]
    fn export_reimport_is_a_noop() {
        let store = ConfigStore::with_defaults();
        let payload = store.export();
        let result = store.import(&payload, "tester").unwrap();
        assert!(!result.applied);
        assert!(result.changed_paths.is_empty());
        assert_eq!(store.active().version, "v1");
    }

    #[test]
    fn rollback_restores_old_params_as_new_version() {
        let store = ConfigStore::with_defaults();
        let original = store.active().params.clone();
        let mut params = original.clone();
        params.penalties.alignment_bonus = 1.1;
        store.update(params, "v1", "tester", "").unwrap();

        let result = store.rollback("v1", "tester").unwrap();
        assert!(result.applied);
        assert_eq!(result.version, "v3");
        assert_eq!(store.active().params, original);
        assert_eq!(store.history().len(), 3);
    }

    #[test]
    fn bounded_delta_enforced_on_update() {
        let store = ConfigStore::with_defaults();
        let mut params = store.active().params.clone();
        // 6.0 -> 9.0 is a 50% move on a gate; cap is 10%.
        params.gates.macro_permission = 9.0;
        let err = store.update(params, "v1", "tester", "").unwrap_err();
        assert_eq!(err.kind(), "ValidationFailure");
    }

    #[test]
    fn diff_paths_reports_leaf_changes() {
        let a = serde_json::json!({"x": {"y": 1, "z": 2}, "w": 3});
        let b = serde_json::json!({"x": {"y": 1, "z": 5}, "w": 3});
        assert_eq!(diff_paths(&a, &b, ""), vec!["x.z".to_string()]);
    }
}
