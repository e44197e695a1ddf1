//! Volume bookkeeping.
//!
//! Volumes are metadata only. Sandbox workloads see data through bind
//! mounts; remote workloads have no shared filesystem to mount, so the
//! records exist to keep create/inspect/ls/rm consistent for clients
//! that manage volumes alongside containers.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::Result;
use crate::ids;
use crate::types::Volume;

use super::Engine;

impl Engine {
    /// Creates a volume, or returns the existing one of the same name.
    pub fn create_volume(
        &self,
        name: Option<&str>,
        labels: HashMap<String, String>,
    ) -> Result<Volume> {
        let name = match name {
            Some(n) => n.to_string(),
            None => ids::generate_id(),
        };
        if let Ok(existing) = self.state.get_volume(&name) {
            return Ok(existing);
        }
        let volume = Volume {
            name: name.clone(),
            driver: "local".to_string(),
            mountpoint: format!("/var/lib/sockerless/volumes/{name}/_data"),
            created_at: Utc::now(),
            labels,
        };
        self.state.insert_volume(volume.clone())?;
        Ok(volume)
    }

    pub fn inspect_volume(&self, name: &str) -> Result<Volume> {
        self.state.get_volume(name)
    }

    pub fn list_volumes(&self) -> Result<Vec<Volume>> {
        self.state.list_volumes()
    }

    pub fn remove_volume(&self, name: &str) -> Result<()> {
        self.state.remove_volume(name)?;
        Ok(())
    }
}
