//! Shared test harness: in-memory provider fakes over a temp-dir store

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use berth::deploy::manager::DeployManager;
use berth::errors::OrchestratorError;
use berth::filesys::dir::Dir;
use berth::gates::approval::ApprovalGate;
use berth::models::app::{App, HealthCheckSpec};
use berth::notify::event::LifecycleEvent;
use berth::providers::{
    instance_name, ContainerRuntime, InstanceId, InstanceSpec, Repository, RoutingTable,
};
use berth::storage::layout::StorageLayout;
use berth::storage::store::AppStore;
use berth::utils::short_sha;

/// Container runtime fake recording starts/stops, with scriptable probes
#[derive(Default)]
pub struct FakeRuntime {
    pub started: Mutex<Vec<InstanceId>>,
    pub stopped: Mutex<Vec<InstanceId>>,

    /// Scripted health probe results, consumed front to back.
    /// An empty script means every probe passes.
    pub health_script: Mutex<VecDeque<bool>>,
}

impl FakeRuntime {
    pub fn script_health(&self, results: &[bool]) {
        let mut script = self.health_script.lock().unwrap();
        script.extend(results.iter().copied());
    }

    pub fn started_names(&self) -> Vec<String> {
        self.started.lock().unwrap().iter().map(|i| i.0.clone()).collect()
    }

    pub fn stopped_names(&self) -> Vec<String> {
        self.stopped.lock().unwrap().iter().map(|i| i.0.clone()).collect()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start_instance(&self, spec: &InstanceSpec) -> Result<InstanceId, OrchestratorError> {
        let id = instance_name(&spec.app, &spec.environment, spec.slot);
        self.started.lock().unwrap().push(id.clone());
        Ok(id)
    }

    async fn stop_instance(&self, id: &InstanceId) -> Result<(), OrchestratorError> {
        self.stopped.lock().unwrap().push(id.clone());
        Ok(())
    }

    async fn health_probe(
        &self,
        _id: &InstanceId,
        _spec: &HealthCheckSpec,
        _port: u16,
    ) -> Result<bool, OrchestratorError> {
        Ok(self.health_script.lock().unwrap().pop_front().unwrap_or(true))
    }

    async fn stream_logs(&self, id: &InstanceId, tail: usize) -> Result<String, OrchestratorError> {
        Ok(format!("{} logs (last {} lines)\n", id, tail))
    }
}

/// Routing table fake keeping the current upstream in memory
#[derive(Default)]
pub struct FakeRouting {
    pub routes: Mutex<HashMap<String, InstanceId>>,
    pub maintenance: Mutex<Vec<String>>,
}

impl FakeRouting {
    pub fn upstream_of(&self, app: &str) -> Option<String> {
        self.routes.lock().unwrap().get(app).map(|i| i.0.clone())
    }
}

#[async_trait]
impl RoutingTable for FakeRouting {
    async fn set_route(
        &self,
        app: &str,
        _domains: &[String],
        upstream: &InstanceId,
        _port: u16,
    ) -> Result<(), OrchestratorError> {
        self.routes
            .lock()
            .unwrap()
            .insert(app.to_string(), upstream.clone());
        Ok(())
    }

    async fn remove_route(&self, app: &str) -> Result<(), OrchestratorError> {
        self.routes.lock().unwrap().remove(app);
        Ok(())
    }

    async fn write_maintenance(
        &self,
        app: &str,
        _domains: &[String],
    ) -> Result<(), OrchestratorError> {
        self.routes.lock().unwrap().remove(app);
        self.maintenance.lock().unwrap().push(app.to_string());
        Ok(())
    }

    async fn current_upstream(&self, app: &str) -> Result<Option<InstanceId>, OrchestratorError> {
        Ok(self.routes.lock().unwrap().get(app).cloned())
    }
}

/// Repository fake resolving refs without touching git or docker
#[derive(Default)]
pub struct FakeRepository {
    pub builds: Mutex<Vec<String>>,
}

impl FakeRepository {
    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn resolve_commit(
        &self,
        _repo_url: &str,
        reference: &str,
    ) -> Result<String, OrchestratorError> {
        if reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(reference.to_string())
        } else {
            // Deterministic sha for branch names
            Ok(format!("{:0<40}", reference.replace(|c: char| !c.is_ascii_hexdigit(), "a")))
        }
    }

    async fn build_artifact(
        &self,
        app: &str,
        _repo_url: &str,
        commit_sha: &str,
    ) -> Result<String, OrchestratorError> {
        let tag = format!("{}:{}", app, short_sha(commit_sha));
        self.builds.lock().unwrap().push(tag.clone());
        Ok(tag)
    }
}

/// Everything a test needs wired together over a temp directory
pub struct Harness {
    pub store: Arc<AppStore>,
    pub manager: Arc<DeployManager>,
    pub approvals: Arc<ApprovalGate>,
    pub runtime: Arc<FakeRuntime>,
    pub routing: Arc<FakeRouting>,
    pub repository: Arc<FakeRepository>,

    /// Releases the keep-old grace window when notified
    pub retire_gate: Arc<Notify>,

    /// Kept open so lifecycle event sends never fail
    pub events: mpsc::Receiver<LifecycleEvent>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = Dir::create_temp_dir("berth-test").await.unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.setup().await.unwrap();

        let store = Arc::new(AppStore::new(layout));
        let approvals = Arc::new(ApprovalGate::new(store.clone()));
        let runtime = Arc::new(FakeRuntime::default());
        let routing = Arc::new(FakeRouting::default());
        let repository = Arc::new(FakeRepository::default());
        let (events_tx, events_rx) = mpsc::channel(64);

        let retire_gate = Arc::new(Notify::new());
        let gate = retire_gate.clone();
        let manager = Arc::new(
            DeployManager::new(
                store.clone(),
                runtime.clone(),
                routing.clone(),
                repository.clone(),
                approvals.clone(),
                events_tx,
            )
            .with_retire_sleep(Box::new(move |_wait| {
                let gate = gate.clone();
                Box::pin(async move { gate.notified().await })
            })),
        );

        Self {
            store,
            manager,
            approvals,
            runtime,
            routing,
            repository,
            retire_gate,
            events: events_rx,
        }
    }

    /// Register an app tuned for fast test pipelines
    pub async fn create_app(&self, name: &str) -> App {
        let mut app = App::new(name, 3000, "https://example.com/repo.git");
        app.domains = vec![format!("{}.example.com", name)];
        app.health_check = HealthCheckSpec {
            path: "/health".to_string(),
            interval_secs: 0,
            timeout_secs: 1,
            max_attempts: 3,
        };
        self.store.create_app(&app).await.unwrap();
        app
    }
}

/// A 40-hex sha built from a single repeated digit
pub fn sha(digit: char) -> String {
    std::iter::repeat(digit).take(40).collect()
}
