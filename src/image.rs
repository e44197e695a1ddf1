//! Image metadata resolution.
//!
//! The engine never pulls layers; it only needs an image's default env,
//! command, entrypoint, and working directory to merge into container
//! configs the client left partially empty. Fetching that metadata from a
//! registry is an external capability behind [`ImageConfigResolver`]; the
//! built-in [`StaticImageResolver`] serves common base images and anything
//! registered by tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ContainerConfig;

/// Defaults an image contributes to containers created from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ImageConfig {
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub working_dir: String,
    pub user: String,
}

/// Resolves image references to their config metadata.
///
/// Implementations may hit a registry; failures are soft — a `None`
/// result means "create the container without image defaults", matching
/// engines that tolerate unreachable registries for metadata.
#[async_trait]
pub trait ImageConfigResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<Option<ImageConfig>>;
}

/// In-memory resolver seeded with well-known base images.
#[derive(Default)]
pub struct StaticImageResolver {
    configs: RwLock<HashMap<String, ImageConfig>>,
}

impl StaticImageResolver {
    pub fn new() -> Self {
        let resolver = StaticImageResolver::default();
        for name in ["alpine", "busybox"] {
            resolver.register(
                name,
                ImageConfig {
                    env: vec!["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"
                        .to_string()],
                    cmd: vec!["/bin/sh".to_string()],
                    entrypoint: Vec::new(),
                    working_dir: "/".to_string(),
                    user: String::new(),
                },
            );
        }
        resolver
    }

    /// Registers (or replaces) metadata for an image name.
    pub fn register(&self, reference: &str, config: ImageConfig) {
        if let Ok(mut configs) = self.configs.write() {
            configs.insert(reference.to_string(), config);
        }
    }
}

#[async_trait]
impl ImageConfigResolver for StaticImageResolver {
    async fn resolve(&self, reference: &str) -> Result<Option<ImageConfig>> {
        let configs = self
            .configs
            .read()
            .map_err(|_| crate::error::Error::Internal("image cache lock poisoned".into()))?;
        // "alpine:3.19" falls back to "alpine".
        let base = reference.split(':').next().unwrap_or(reference);
        Ok(configs
            .get(reference)
            .or_else(|| configs.get(base))
            .cloned())
    }
}

/// Merges image defaults into a container config, filling only fields the
/// client left empty. Env entries merge by key: client values win.
pub fn merge_image_config(config: &mut ContainerConfig, image: &ImageConfig) {
    if config.cmd.is_empty() && config.entrypoint.is_empty() {
        config.cmd = image.cmd.clone();
        config.entrypoint = image.entrypoint.clone();
    } else if config.entrypoint.is_empty() {
        config.entrypoint = image.entrypoint.clone();
    }
    if config.working_dir.is_empty() {
        config.working_dir = image.working_dir.clone();
    }
    if config.user.is_empty() {
        config.user = image.user.clone();
    }

    let client_keys: Vec<String> = config
        .env
        .iter()
        .filter_map(|e| e.split('=').next().map(str::to_string))
        .collect();
    for entry in &image.env {
        let key = entry.split('=').next().unwrap_or(entry);
        if !client_keys.iter().any(|k| k == key) {
            config.env.push(entry.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolver_matches_tagged_references() {
        let resolver = StaticImageResolver::new();
        let cfg = resolver.resolve("alpine:3.19").await.unwrap().unwrap();
        assert_eq!(cfg.cmd, vec!["/bin/sh"]);
        assert!(resolver.resolve("no-such-image").await.unwrap().is_none());
    }

    #[test]
    fn merge_fills_empty_fields_only() {
        let image = ImageConfig {
            env: vec!["PATH=/bin".into(), "LANG=C".into()],
            cmd: vec!["/bin/sh".into()],
            entrypoint: Vec::new(),
            working_dir: "/app".into(),
            user: "root".into(),
        };

        let mut config = ContainerConfig {
            cmd: vec!["echo".into(), "hi".into()],
            env: vec!["PATH=/custom".into()],
            ..Default::default()
        };
        merge_image_config(&mut config, &image);

        assert_eq!(config.cmd, vec!["echo", "hi"], "client cmd preserved");
        assert_eq!(config.working_dir, "/app");
        assert!(
            config.env.contains(&"PATH=/custom".to_string()),
            "client env wins on key collision"
        );
        assert!(!config.env.contains(&"PATH=/bin".to_string()));
        assert!(config.env.contains(&"LANG=C".to_string()));
    }

    #[test]
    fn merge_uses_image_cmd_when_client_empty() {
        let image = ImageConfig {
            cmd: vec!["/bin/sh".into()],
            entrypoint: vec!["/entry".into()],
            ..Default::default()
        };
        let mut config = ContainerConfig::default();
        merge_image_config(&mut config, &image);
        assert_eq!(config.cmd, vec!["/bin/sh"]);
        assert_eq!(config.entrypoint, vec!["/entry"]);
    }
}
