//! Crash-recovery tests for the durable resource registry.
//!
//! Simulates an engine that provisioned cloud jobs and died by reopening
//! the registry directory with a fresh engine, then asserts the sweep's
//! teardown calls and its surfacing of unrecoverable entries.

use std::collections::HashMap;
use std::sync::Arc;

use sockerless::engine::Engine;
use sockerless::image::StaticImageResolver;
use sockerless::orphan::{OrphanEntry, ResourceRegistry};
use sockerless::provider::cloud::CloudJobProvider;
use sockerless::provider::sim::SimulatedCloudApi;
use sockerless::provider::{JobProvider, ProviderKind};
use sockerless::sandbox::NativeApplets;
use sockerless::types::ContainerStatus;
use sockerless::EngineConfig;

type SimProvider = Arc<CloudJobProvider<SimulatedCloudApi>>;

fn engine_over(
    dir: &std::path::Path,
    instance_id: &str,
) -> (Arc<Engine>, SimProvider) {
    let registry = Arc::new(ResourceRegistry::open(dir).expect("registry"));
    let provider = Arc::new(CloudJobProvider::new(
        SimulatedCloudApi::new(ProviderKind::Ecs),
        true,
    ));
    let mut providers: HashMap<ProviderKind, Arc<dyn JobProvider>> = HashMap::new();
    providers.insert(ProviderKind::Ecs, provider.clone() as Arc<dyn JobProvider>);
    let mut config = EngineConfig::default();
    config.instance_id = instance_id.to_string();
    config.endpoint_url = Some("http://localhost:4566".to_string());
    let engine = Engine::new(
        config,
        ProviderKind::Ecs,
        providers,
        Arc::new(NativeApplets),
        registry,
        Arc::new(StaticImageResolver::new()),
    )
    .expect("engine");
    (engine, provider)
}

// =============================================================================
// Recovery Sweep
// =============================================================================

#[tokio::test]
async fn sweep_deletes_jobs_left_by_a_crashed_run() {
    let dir = tempfile::tempdir().unwrap();

    // A previous run registered two jobs and confirmed cleanup of one.
    {
        let registry = ResourceRegistry::open(dir.path()).unwrap();
        registry
            .register(OrphanEntry::job("c1", ProviderKind::Ecs, "sim-job-aaa", "inst-1"))
            .unwrap();
        registry.activate("sim-job-aaa").unwrap();
        registry
            .register(OrphanEntry::job("c2", ProviderKind::Ecs, "sim-job-bbb", "inst-1"))
            .unwrap();
        registry.mark_cleaned("sim-job-bbb").unwrap();
    }

    let (engine, provider) = engine_over(dir.path(), "inst-1");
    let report = engine.recover().await;
    assert_eq!(report.cleaned, ["sim-job-aaa"]);
    assert!(report.failed.is_empty());
    assert_eq!(provider.api().deleted_jobs(), ["sim-job-aaa"]);

    // The sweep is idempotent across restarts.
    let (engine, provider) = engine_over(dir.path(), "inst-1");
    let report = engine.recover().await;
    assert!(report.cleaned.is_empty());
    assert!(provider.api().deleted_jobs().is_empty());
}

#[tokio::test]
async fn sweep_scopes_to_the_configured_instance() {
    let dir = tempfile::tempdir().unwrap();
    {
        let registry = ResourceRegistry::open(dir.path()).unwrap();
        registry
            .register(OrphanEntry::job("c1", ProviderKind::Ecs, "sim-job-ours", "inst-a"))
            .unwrap();
        registry
            .register(OrphanEntry::job("c2", ProviderKind::Ecs, "sim-job-theirs", "inst-b"))
            .unwrap();
    }

    let (engine, provider) = engine_over(dir.path(), "inst-a");
    let report = engine.recover().await;
    assert_eq!(report.cleaned, ["sim-job-ours"]);
    assert_eq!(provider.api().deleted_jobs(), ["sim-job-ours"]);
}

#[tokio::test(start_paused = true)]
async fn unrecoverable_entries_surface_as_dead_containers() {
    let dir = tempfile::tempdir().unwrap();
    let container_id = "feedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedface";
    {
        let registry = ResourceRegistry::open(dir.path()).unwrap();
        registry
            .register(OrphanEntry::job(
                container_id,
                ProviderKind::Ecs,
                "sim-job-stuck",
                "inst-1",
            ))
            .unwrap();
    }

    let (engine, provider) = engine_over(dir.path(), "inst-1");
    provider.api().fail_teardown();
    let report = engine.recover().await;
    assert_eq!(report.failed, ["sim-job-stuck"]);

    let container = engine.inspect_container(container_id).unwrap();
    assert_eq!(container.state.status, ContainerStatus::Dead);
    assert_eq!(container.name, "/recovered-feedfacefeed");

    // Removal can be retried through the API once the provider heals.
    let (engine, _provider) = engine_over(dir.path(), "inst-1");
    let report = engine.recover().await;
    assert_eq!(report.cleaned, ["sim-job-stuck"]);
}
