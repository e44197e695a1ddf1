//! Job-spec construction.
//!
//! Turns one container (or one pod) into the provider-neutral workload
//! description: agent-wrapped entrypoint, merged environment, resource
//! tier, bind mounts, and the management tags the orphan sweep keys on.

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::constants::{
    AGENT_PORT, AGENT_TOKEN_ENV, CALLBACK_URL_ENV, CONTAINER_ID_ENV, MANAGED_BY_VALUE,
    TAG_CONTAINER_ID, TAG_INSTANCE, TAG_MANAGED_BY,
};
use crate::ids::short_id;
use crate::types::Container;

/// CPU tiers in millicores, smallest first.
const CPU_TIERS: &[u32] = &[256, 512, 1024, 2048, 4096];
/// Memory tiers in MiB, smallest first.
const MEMORY_TIERS: &[u32] = &[512, 1024, 2048, 4096, 8192, 16384];

const DEFAULT_CPU_MILLIS: u32 = 256;
const DEFAULT_MEMORY_MB: u32 = 512;

/// One container inside a workload. The first member is the main
/// container and hosts the agent.
#[derive(Debug, Clone)]
pub struct MemberSpec {
    pub container_id: String,
    pub image: String,
    /// The container's own command, before agent wrapping.
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub binds: Vec<String>,
    pub working_dir: Option<String>,
}

/// Provider-neutral description of one workload (container or pod).
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Main container's ID; names the job.
    pub container_id: String,
    /// Agent-wrapped entrypoint for the main container.
    pub entrypoint: Vec<String>,
    pub cpu_millis: u32,
    pub memory_mb: u32,
    pub tags: HashMap<String, String>,
    pub members: Vec<MemberSpec>,
}

impl JobSpec {
    /// Builds the spec for a workload. `members` lists every container in
    /// the pod with the main container first; single containers pass a
    /// one-element slice. `agent_token` is the main container's token.
    pub fn build(members: &[&Container], agent_token: &str, config: &EngineConfig) -> JobSpec {
        let main = members[0];
        let callback_url = config.callback_url.as_deref().unwrap_or_default();
        let entrypoint = if config.reverse_mode() {
            rewrite_reverse(&full_command(main), callback_url, &main.id, agent_token)
        } else {
            rewrite_forward(&full_command(main))
        };

        let mut tags = HashMap::new();
        tags.insert(TAG_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
        tags.insert(TAG_INSTANCE.to_string(), config.instance_id.clone());
        tags.insert(TAG_CONTAINER_ID.to_string(), short_id(&main.id).to_string());

        let member_specs = members
            .iter()
            .map(|container| {
                let mut env = parse_env(&container.config.env);
                env.push((AGENT_TOKEN_ENV.to_string(), agent_token.to_string()));
                env.push((CONTAINER_ID_ENV.to_string(), container.id.clone()));
                if config.reverse_mode() {
                    env.push((CALLBACK_URL_ENV.to_string(), callback_url.to_string()));
                }
                MemberSpec {
                    container_id: container.id.clone(),
                    image: container.config.image.clone(),
                    command: full_command(container),
                    env,
                    binds: container.host_config.binds.clone(),
                    working_dir: (!container.config.working_dir.is_empty())
                        .then(|| container.config.working_dir.clone()),
                }
            })
            .collect();

        JobSpec {
            container_id: main.id.clone(),
            entrypoint,
            cpu_millis: bucket(DEFAULT_CPU_MILLIS, CPU_TIERS),
            memory_mb: bucket(DEFAULT_MEMORY_MB, MEMORY_TIERS),
            tags,
            members: member_specs,
        }
    }

    pub fn main(&self) -> &MemberSpec {
        &self.members[0]
    }
}

/// Entrypoint followed by cmd, the runtime-resolved command line.
fn full_command(container: &Container) -> Vec<String> {
    let mut command = container.config.entrypoint.clone();
    command.extend(container.config.cmd.iter().cloned());
    command
}

/// `agent --listen :<port> --keep-alive -- <original>`
pub fn rewrite_forward(original: &[String]) -> Vec<String> {
    let mut argv = vec![
        "agent".to_string(),
        "--listen".to_string(),
        format!(":{AGENT_PORT}"),
        "--keep-alive".to_string(),
        "--".to_string(),
    ];
    argv.extend(original.iter().cloned());
    argv
}

/// `agent --callback <url>?id=<id>&token=<tok> --keep-alive -- <original>`
pub fn rewrite_reverse(
    original: &[String],
    callback_url: &str,
    container_id: &str,
    token: &str,
) -> Vec<String> {
    let mut argv = vec![
        "agent".to_string(),
        "--callback".to_string(),
        format!("{callback_url}?id={container_id}&token={token}"),
        "--keep-alive".to_string(),
        "--".to_string(),
    ];
    argv.extend(original.iter().cloned());
    argv
}

/// Smallest tier covering the request; requests above every tier clamp
/// to the largest.
pub fn bucket(requested: u32, tiers: &[u32]) -> u32 {
    tiers
        .iter()
        .copied()
        .find(|&tier| tier >= requested)
        .unwrap_or_else(|| *tiers.last().unwrap_or(&requested))
}

/// Splits `KEY=VALUE` environment entries; entries without `=` get an
/// empty value.
pub fn parse_env(env: &[String]) -> Vec<(String, String)> {
    env.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (entry.clone(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContainerConfig, ContainerState, HostConfig, NetworkSettings};

    fn container(id: &str, entrypoint: &[&str], cmd: &[&str]) -> Container {
        Container {
            id: id.to_string(),
            name: format!("/{id}"),
            created: chrono::Utc::now(),
            state: ContainerState::default(),
            config: ContainerConfig {
                image: "alpine:latest".to_string(),
                entrypoint: entrypoint.iter().map(|s| s.to_string()).collect(),
                cmd: cmd.iter().map(|s| s.to_string()).collect(),
                env: vec!["FOO=bar".to_string()],
                ..Default::default()
            },
            host_config: HostConfig::default(),
            network_settings: NetworkSettings::default(),
            mounts: Vec::new(),
        }
    }

    #[test]
    fn forward_entrypoint_wraps_original() {
        let argv = rewrite_forward(&["echo".to_string(), "hi".to_string()]);
        assert_eq!(
            argv,
            ["agent", "--listen", ":9111", "--keep-alive", "--", "echo", "hi"]
        );
    }

    #[test]
    fn reverse_entrypoint_carries_callback_identity() {
        let argv = rewrite_reverse(
            &["sleep".to_string()],
            "https://cb.example/agent",
            "abc123",
            "tok",
        );
        assert_eq!(argv[1], "--callback");
        assert_eq!(argv[2], "https://cb.example/agent?id=abc123&token=tok");
        assert_eq!(&argv[3..], ["--keep-alive", "--", "sleep"]);
    }

    #[test]
    fn spec_merges_agent_env_and_tags() {
        let config = EngineConfig {
            instance_id: "inst-1".to_string(),
            ..Default::default()
        };
        let c = container(&"a".repeat(64), &[], &["echo", "hi"]);
        let spec = JobSpec::build(&[&c], "secret", &config);

        assert_eq!(spec.tags[TAG_MANAGED_BY], MANAGED_BY_VALUE);
        assert_eq!(spec.tags[TAG_INSTANCE], "inst-1");
        assert_eq!(spec.tags[TAG_CONTAINER_ID], "a".repeat(12));

        let env = &spec.main().env;
        assert!(env.contains(&("FOO".to_string(), "bar".to_string())));
        assert!(env.contains(&(AGENT_TOKEN_ENV.to_string(), "secret".to_string())));
        assert!(!env.iter().any(|(k, _)| k == CALLBACK_URL_ENV));
        assert_eq!(spec.entrypoint[1], "--listen");
    }

    #[test]
    fn reverse_mode_adds_callback_env() {
        let config = EngineConfig {
            callback_url: Some("https://cb/agent".to_string()),
            ..Default::default()
        };
        let c = container(&"b".repeat(64), &["sh"], &["-c", "true"]);
        let spec = JobSpec::build(&[&c], "tok", &config);
        assert!(spec
            .main()
            .env
            .iter()
            .any(|(k, v)| k == CALLBACK_URL_ENV && v == "https://cb/agent"));
        assert_eq!(spec.entrypoint[1], "--callback");
    }

    #[test]
    fn pod_members_keep_their_own_images_and_commands() {
        let config = EngineConfig::default();
        let main = container(&"a".repeat(64), &[], &["tail", "-f", "/dev/null"]);
        let mut helper = container(&"c".repeat(64), &[], &["echo", "helper"]);
        helper.config.image = "busybox:musl".to_string();
        let spec = JobSpec::build(&[&main, &helper], "tok", &config);

        assert_eq!(spec.members.len(), 2);
        assert_eq!(spec.members[0].image, "alpine:latest");
        assert_eq!(spec.members[1].image, "busybox:musl");
        assert_eq!(spec.members[1].command, ["echo", "helper"]);
        assert_eq!(spec.container_id, "a".repeat(64));
    }

    #[test]
    fn tier_bucketing_rounds_up_and_clamps() {
        assert_eq!(bucket(100, CPU_TIERS), 256);
        assert_eq!(bucket(256, CPU_TIERS), 256);
        assert_eq!(bucket(300, CPU_TIERS), 512);
        assert_eq!(bucket(9999, CPU_TIERS), 4096);
        assert_eq!(bucket(600, MEMORY_TIERS), 1024);
    }

    #[test]
    fn env_entries_split_on_first_equals() {
        let parsed = parse_env(&["A=1".to_string(), "B=x=y".to_string(), "BARE".to_string()]);
        assert_eq!(parsed[0], ("A".to_string(), "1".to_string()));
        assert_eq!(parsed[1], ("B".to_string(), "x=y".to_string()));
        assert_eq!(parsed[2], ("BARE".to_string(), String::new()));
    }
}
