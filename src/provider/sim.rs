//! Scripted in-memory cloud backend.
//!
//! Stands in for a vendor SDK in tests and simulator runs: execution
//! states play back from a script (the last state repeats), and every
//! mutating call is recorded so tests can assert on teardown behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::constants::TAG_INSTANCE;
use crate::error::{Error, Result};
use crate::logsfmt::LogChunk;

use super::cloud::{CloudApi, ExecutionState};
use super::jobspec::JobSpec;
use super::{ManagedResource, ProviderKind};

pub struct SimulatedCloudApi {
    kind: ProviderKind,
    script: Mutex<Vec<ExecutionState>>,
    cursor: AtomicUsize,
    address: Mutex<Option<String>>,
    logs: Mutex<Vec<LogChunk>>,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    tags: Mutex<HashMap<String, String>>,
    next_execution: AtomicU64,
    fail_create: AtomicBool,
    fail_teardown: AtomicBool,
}

impl SimulatedCloudApi {
    pub fn new(kind: ProviderKind) -> Self {
        SimulatedCloudApi {
            kind,
            script: Mutex::new(vec![ExecutionState::Running]),
            cursor: AtomicUsize::new(0),
            address: Mutex::new(Some("127.0.0.1".to_string())),
            logs: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            tags: Mutex::new(HashMap::new()),
            next_execution: AtomicU64::new(1),
            fail_create: AtomicBool::new(false),
            fail_teardown: AtomicBool::new(false),
        }
    }

    /// Replaces the state script; each poll advances one step and the
    /// final state repeats forever.
    pub fn script_states(&self, states: &[ExecutionState]) {
        *self.script.lock().unwrap() = states.to_vec();
        self.cursor.store(0, Ordering::SeqCst);
    }

    pub fn set_address(&self, ip: &str) {
        *self.address.lock().unwrap() = Some(ip.to_string());
    }

    pub fn push_log(&self, chunk: LogChunk) {
        self.logs.lock().unwrap().push(chunk);
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_teardown(&self) {
        self.fail_teardown.store(true, Ordering::SeqCst);
    }

    pub fn created_jobs(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn stopped_executions(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudApi for SimulatedCloudApi {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Internal("simulated create failure".into()));
        }
        let job_name = format!("sim-job-{}", &spec.container_id[..spec.container_id.len().min(12)]);
        self.created.lock().unwrap().push(job_name.clone());
        *self.tags.lock().unwrap() = spec.tags.clone();
        Ok(job_name)
    }

    async fn run_job(&self, job_name: &str) -> Result<String> {
        let n = self.next_execution.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{job_name}-exec-{n}"))
    }

    async fn execution_state(&self, _job: &str, _execution: &str) -> Result<ExecutionState> {
        let script = self.script.lock().unwrap();
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(*script.get(i).unwrap_or_else(|| {
            script.last().expect("script is never empty")
        }))
    }

    async fn execution_address(&self, _job: &str, _execution: &str) -> Result<Option<String>> {
        Ok(self.address.lock().unwrap().clone())
    }

    async fn stop_execution(&self, _job: &str, execution: &str) -> Result<()> {
        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(Error::Internal("simulated stop failure".into()));
        }
        self.stopped.lock().unwrap().push(execution.to_string());
        Ok(())
    }

    async fn delete_job(&self, job_name: &str) -> Result<()> {
        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(Error::Internal("simulated delete failure".into()));
        }
        self.deleted.lock().unwrap().push(job_name.to_string());
        Ok(())
    }

    async fn read_logs(
        &self,
        _job: &str,
        _execution: &str,
        cursor: u64,
    ) -> Result<(Vec<LogChunk>, u64)> {
        let logs = self.logs.lock().unwrap();
        let start = (cursor as usize).min(logs.len());
        let chunks = logs[start..].to_vec();
        Ok((chunks, logs.len() as u64))
    }

    async fn list_jobs(&self, instance_id: &str) -> Result<Vec<ManagedResource>> {
        let tags = self.tags.lock().unwrap().clone();
        if tags.get(TAG_INSTANCE).map(String::as_str) != Some(instance_id) {
            return Ok(Vec::new());
        }
        let deleted = self.deleted.lock().unwrap();
        Ok(self
            .created
            .lock()
            .unwrap()
            .iter()
            .filter(|job| !deleted.contains(job))
            .map(|job| ManagedResource {
                resource_id: job.clone(),
                resource_type: "job".to_string(),
                tags: tags.clone(),
            })
            .collect())
    }
}
