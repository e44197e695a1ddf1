//! Orphan-resource registry and recovery sweep.
//!
//! Every provisioned remote resource gets a durable record before the
//! engine relies on it, so a crash between provisioning and teardown
//! leaves a trail. The log is append-only JSONL; the latest record per
//! resource wins. A companion tombstone file lists cleaned resource IDs
//! so a truncated log replay never resurrects a deleted job.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::{ORPHAN_RETRY_ATTEMPTS, ORPHAN_RETRY_INITIAL, ORPHAN_RETRY_MAX};
use crate::error::Result;
use crate::provider::{JobHandle, JobProvider, ProviderKind};

const LOG_FILE: &str = "resources.jsonl";
const TOMBSTONE_FILE: &str = "resources.cleaned";

/// Cleanup lifecycle of one remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanState {
    /// Recorded, provisioning in flight.
    Registered,
    /// Provisioned and in use.
    Active,
    /// Teardown requested, not yet confirmed.
    Cleaning,
    Cleaned,
}

/// One tracked remote resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanEntry {
    pub container_id: String,
    pub backend: ProviderKind,
    pub resource_type: String,
    pub resource_id: String,
    pub instance_id: String,
    pub created_at: DateTime<Utc>,
    pub state: OrphanState,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl OrphanEntry {
    pub fn job(container_id: &str, backend: ProviderKind, job_name: &str, instance_id: &str) -> Self {
        OrphanEntry {
            container_id: container_id.to_string(),
            backend,
            resource_type: "job".to_string(),
            resource_id: job_name.to_string(),
            instance_id: instance_id.to_string(),
            created_at: Utc::now(),
            state: OrphanState::Registered,
            metadata: HashMap::new(),
        }
    }
}

/// Durable registry of provisioned resources.
pub struct ResourceRegistry {
    log_path: PathBuf,
    tombstone_path: PathBuf,
    entries: Mutex<HashMap<String, OrphanEntry>>,
}

impl ResourceRegistry {
    /// Default location under the platform data directory.
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sockerless")
    }

    /// Opens (creating if needed) the registry in `dir` and replays the
    /// log and tombstones.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let log_path = dir.join(LOG_FILE);
        let tombstone_path = dir.join(TOMBSTONE_FILE);

        let mut entries: HashMap<String, OrphanEntry> = HashMap::new();
        if log_path.exists() {
            for line in std::fs::read_to_string(&log_path)?.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<OrphanEntry>(line) {
                    Ok(entry) => {
                        entries.insert(entry.resource_id.clone(), entry);
                    }
                    Err(e) => warn!(error = %e, "skipping malformed registry record"),
                }
            }
        }
        if tombstone_path.exists() {
            for resource_id in std::fs::read_to_string(&tombstone_path)?.lines() {
                if let Some(entry) = entries.get_mut(resource_id.trim()) {
                    entry.state = OrphanState::Cleaned;
                }
            }
        }

        Ok(ResourceRegistry {
            log_path,
            tombstone_path,
            entries: Mutex::new(entries),
        })
    }

    fn append(&self, entry: &OrphanEntry) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Records a new resource in `registered` state.
    pub fn register(&self, entry: OrphanEntry) -> Result<()> {
        self.append(&entry)?;
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.resource_id.clone(), entry);
        Ok(())
    }

    fn transition(&self, resource_id: &str, state: OrphanState) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = entries.get_mut(resource_id) else {
            return Ok(());
        };
        entry.state = state;
        let snapshot = entry.clone();
        drop(entries);
        self.append(&snapshot)
    }

    /// Marks a resource as in use.
    pub fn activate(&self, resource_id: &str) -> Result<()> {
        self.transition(resource_id, OrphanState::Active)
    }

    /// Marks teardown as requested.
    pub fn mark_cleaning(&self, resource_id: &str) -> Result<()> {
        self.transition(resource_id, OrphanState::Cleaning)
    }

    /// Marks teardown complete and writes the tombstone.
    pub fn mark_cleaned(&self, resource_id: &str) -> Result<()> {
        self.transition(resource_id, OrphanState::Cleaned)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.tombstone_path)?;
        file.write_all(format!("{resource_id}\n").as_bytes())?;
        Ok(())
    }

    pub fn entry(&self, resource_id: &str) -> Option<OrphanEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(resource_id)
            .cloned()
    }

    /// Entries for `instance_id` not yet confirmed cleaned, sorted by
    /// resource ID for deterministic sweeps.
    pub fn uncleaned(&self, instance_id: &str) -> Vec<OrphanEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<OrphanEntry> = entries
            .values()
            .filter(|e| e.instance_id == instance_id && e.state != OrphanState::Cleaned)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        out
    }
}

/// Outcome of one recovery sweep.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub cleaned: Vec<String>,
    pub failed: Vec<String>,
    /// Resources carrying this engine's tags with no registry record.
    pub unrecorded: Vec<String>,
}

/// Startup sweep: retry teardown of every uncleaned entry, then
/// cross-check the provider for tagged resources the registry never saw.
pub async fn recover(
    registry: &ResourceRegistry,
    providers: &HashMap<ProviderKind, std::sync::Arc<dyn JobProvider>>,
    instance_id: &str,
) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    for entry in registry.uncleaned(instance_id) {
        let Some(provider) = providers.get(&entry.backend) else {
            debug!(resource = %entry.resource_id, backend = %entry.backend, "no provider configured, leaving entry");
            report.failed.push(entry.resource_id);
            continue;
        };
        if registry.mark_cleaning(&entry.resource_id).is_err() {
            report.failed.push(entry.resource_id);
            continue;
        }
        let handle = JobHandle {
            container_id: entry.container_id.clone(),
            job_name: entry.resource_id.clone(),
        };
        if delete_with_backoff(provider.as_ref(), &handle).await {
            let _ = registry.mark_cleaned(&entry.resource_id);
            info!(resource = %entry.resource_id, "orphaned resource cleaned");
            report.cleaned.push(entry.resource_id);
        } else {
            warn!(resource = %entry.resource_id, "orphan cleanup exhausted retries");
            report.failed.push(entry.resource_id);
        }
    }

    for (kind, provider) in providers {
        let managed = match provider.list_managed(instance_id).await {
            Ok(managed) => managed,
            Err(e) => {
                debug!(backend = %kind, error = %e, "list_managed failed during sweep");
                continue;
            }
        };
        for resource in managed {
            if registry.entry(&resource.resource_id).is_none() {
                warn!(
                    resource = %resource.resource_id,
                    backend = %kind,
                    "tagged resource has no registry record"
                );
                report.unrecorded.push(resource.resource_id);
            }
        }
    }

    report
}

async fn delete_with_backoff(provider: &dyn JobProvider, handle: &JobHandle) -> bool {
    let mut delay = ORPHAN_RETRY_INITIAL;
    for attempt in 1..=ORPHAN_RETRY_ATTEMPTS {
        match provider.delete(handle).await {
            Ok(()) => return true,
            Err(e) => {
                debug!(
                    job = %handle.job_name,
                    attempt,
                    error = %e,
                    "orphan delete failed, backing off"
                );
            }
        }
        if attempt < ORPHAN_RETRY_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(ORPHAN_RETRY_MAX);
        }
    }
    false
}
