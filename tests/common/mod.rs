//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

use overseer::config::{AgentConfig, Config, RegistrySettings, SharedConfig};
use overseer::error::{MenuError, SessionError};
use overseer::runtime::AgentRuntime;
use overseer::services::{
    AgentFactory, AgentParts, AgentServices, BuildOptions, HealthService, Input, Maintenance,
    MaintenanceAction, MaintenanceNeeds, NoRoutines, ProcessDriver, ProcessHandle, SessionGateway,
    Task, TaskCatalog,
};
use overseer::types::{ExecutionPriority, Position};

/// What a single `advance_menu` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuStep {
    Enter,
    /// Succeeds without reaching a session.
    Stay,
    Loading,
    Transient,
    Unrecoverable,
    Hang,
}

/// Client state seen by both the driver and the menu gateway.
#[derive(Default)]
pub struct MockClient {
    pub in_session: AtomicBool,
    pub position: Mutex<Option<Position>>,
    pub level: Mutex<Option<u32>>,
    pub inputs: Mutex<Vec<Input>>,
    /// Menu steps in order; the last one repeats. Empty means `Enter`.
    pub menu: Mutex<VecDeque<MenuStep>>,
    pub menu_calls: AtomicUsize,
    /// When set, `exit_session` leaves the client in the session.
    pub stuck_in_session: AtomicBool,
}

impl MockClient {
    pub fn entered() -> Arc<Self> {
        let client = Self::default();
        client.in_session.store(true, Ordering::SeqCst);
        Arc::new(client)
    }

    pub fn scripted(steps: &[MenuStep]) -> Arc<Self> {
        let client = Self::default();
        client.script(steps);
        Arc::new(client)
    }

    pub fn script(&self, steps: &[MenuStep]) {
        *self.menu.lock().unwrap() = steps.iter().copied().collect();
    }

    fn next_step(&self) -> MenuStep {
        let mut menu = self.menu.lock().unwrap();
        if menu.len() > 1 {
            menu.pop_front().unwrap_or(MenuStep::Enter)
        } else {
            menu.front().copied().unwrap_or(MenuStep::Enter)
        }
    }

    pub fn set_position(&self, position: Option<Position>) {
        *self.position.lock().unwrap() = position;
    }

    pub fn set_level(&self, level: Option<u32>) {
        *self.level.lock().unwrap() = level;
    }
}

#[async_trait]
impl ProcessDriver for MockClient {
    async fn refresh_state(&self) -> Result<()> {
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.in_session.load(Ordering::SeqCst)
    }

    async fn current_position(&self) -> Option<Position> {
        *self.position.lock().unwrap()
    }

    async fn current_level(&self) -> Option<u32> {
        *self.level.lock().unwrap()
    }

    async fn latency_ms(&self) -> Option<u32> {
        None
    }

    async fn send_input(&self, input: Input) -> Result<()> {
        self.inputs.lock().unwrap().push(input);
        Ok(())
    }

    async fn exit_session(&self) -> Result<()> {
        if !self.stuck_in_session.load(Ordering::SeqCst) {
            self.in_session.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionGateway for MockClient {
    async fn in_session(&self) -> bool {
        self.in_session.load(Ordering::SeqCst)
    }

    async fn advance_menu(&self) -> Result<(), MenuError> {
        self.menu_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            MenuStep::Enter => {
                self.in_session.store(true, Ordering::SeqCst);
                Ok(())
            }
            MenuStep::Stay => {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(())
            }
            MenuStep::Loading => Err(MenuError::Loading),
            MenuStep::Transient => Err(MenuError::Transient("button not found".to_string())),
            MenuStep::Unrecoverable => Err(MenuError::Unrecoverable("modal stuck".to_string())),
            MenuStep::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[derive(Default)]
pub struct MockHealth {
    pub critical: AtomicBool,
}

#[async_trait]
impl HealthService for MockHealth {
    async fn check_health_and_react(&self, _runtime: &AgentRuntime) -> Result<(), SessionError> {
        if self.critical.load(Ordering::SeqCst) {
            Err(SessionError::health("hp below threshold"))
        } else {
            Ok(())
        }
    }
}

/// Reports pending needs once, then nothing until re-armed.
#[derive(Default)]
pub struct MockMaintenance {
    pub pending: Mutex<MaintenanceNeeds>,
    pub peeks: AtomicUsize,
    pub performed: Mutex<Vec<(MaintenanceAction, ExecutionPriority)>>,
}

impl MockMaintenance {
    pub fn arm(&self, needs: MaintenanceNeeds) {
        *self.pending.lock().unwrap() = needs;
    }

    pub fn performed(&self) -> Vec<(MaintenanceAction, ExecutionPriority)> {
        self.performed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Maintenance for MockMaintenance {
    async fn peek(&self, _runtime: &AgentRuntime) -> MaintenanceNeeds {
        self.peeks.fetch_add(1, Ordering::SeqCst);
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    async fn perform(
        &self,
        action: MaintenanceAction,
        runtime: &AgentRuntime,
    ) -> Result<(), SessionError> {
        self.performed
            .lock()
            .unwrap()
            .push((action, runtime.priority().get()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Ok,
    Fail,
    Interrupt,
    Sleep(Duration),
    /// Requests a clean stop, optionally naming the agent to start next.
    HandOver(Option<String>),
}

pub struct MockTask {
    pub name: String,
    pub outcome: Outcome,
    pub runs: Arc<AtomicUsize>,
}

impl MockTask {
    pub fn new(name: &str, outcome: Outcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Task for MockTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, runtime: &AgentRuntime) -> Result<(), SessionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Outcome::Ok => Ok(()),
            Outcome::Fail => Err(SessionError::task(&self.name, "boss not found")),
            Outcome::Interrupt => Err(SessionError::Interrupt),
            Outcome::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            Outcome::HandOver(next) => {
                runtime.request_stop(next.clone());
                Ok(())
            }
        }
    }
}

pub struct MockCatalog {
    pub tasks: Vec<(String, Outcome)>,
}

impl TaskCatalog for MockCatalog {
    fn build_tasks(&self) -> Vec<Arc<dyn Task>> {
        self.tasks
            .iter()
            .map(|(name, outcome)| Arc::new(MockTask::new(name, outcome.clone())) as Arc<dyn Task>)
            .collect()
    }
}

pub struct MockProcess {
    pub alive: AtomicBool,
    pub kills: AtomicUsize,
}

impl MockProcess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            kills: AtomicUsize::new(0),
        })
    }

    /// Simulates the client disappearing on its own.
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcessHandle for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn kill(&self) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Collaborators for a single executor run.
pub struct MockSet {
    pub client: Arc<MockClient>,
    pub health: Arc<MockHealth>,
    pub maintenance: Arc<MockMaintenance>,
}

impl MockSet {
    pub fn new() -> Self {
        Self {
            client: MockClient::entered(),
            health: Arc::new(MockHealth::default()),
            maintenance: Arc::new(MockMaintenance::default()),
        }
    }

    /// Starts outside a session, driven by `steps`.
    pub fn scripted(steps: &[MenuStep]) -> Self {
        Self {
            client: MockClient::scripted(steps),
            ..Self::new()
        }
    }

    pub fn services(&self) -> AgentServices {
        self.services_with(Vec::new())
    }

    pub fn services_with(&self, tasks: Vec<(&str, Outcome)>) -> AgentServices {
        AgentServices {
            driver: self.client.clone(),
            health: self.health.clone(),
            maintenance: self.maintenance.clone(),
            routines: Arc::new(NoRoutines),
            gateway: self.client.clone(),
            catalog: Arc::new(MockCatalog {
                tasks: tasks.into_iter().map(|(n, o)| (n.to_string(), o)).collect(),
            }),
        }
    }
}

/// Builds mock agents and remembers every client it launched.
pub struct MockFactory {
    pub builds: Mutex<Vec<(String, BuildOptions)>>,
    pub processes: Mutex<Vec<(String, Arc<MockProcess>)>>,
    pub tasks: HashMap<String, Vec<(String, Outcome)>>,
    pub menus: HashMap<String, Vec<MenuStep>>,
    /// When set, every build waits here before returning.
    pub barrier: Option<Arc<Barrier>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            builds: Mutex::new(Vec::new()),
            processes: Mutex::new(Vec::new()),
            tasks: HashMap::new(),
            menus: HashMap::new(),
            barrier: None,
        }
    }

    pub fn with_tasks(mut self, agent: &str, tasks: Vec<(&str, Outcome)>) -> Self {
        self.tasks.insert(
            agent.to_string(),
            tasks.into_iter().map(|(n, o)| (n.to_string(), o)).collect(),
        );
        self
    }

    pub fn with_menu(mut self, agent: &str, steps: &[MenuStep]) -> Self {
        self.menus.insert(agent.to_string(), steps.to_vec());
        self
    }

    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn build_count(&self, agent: &str) -> usize {
        self.builds
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == agent)
            .count()
    }

    pub fn last_process(&self, agent: &str) -> Option<Arc<MockProcess>> {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(name, _)| name == agent)
            .map(|(_, process)| process.clone())
    }
}

#[async_trait]
impl AgentFactory for MockFactory {
    async fn build(&self, name: &str, _config: &AgentConfig, opts: BuildOptions) -> Result<AgentParts> {
        self.builds.lock().unwrap().push((name.to_string(), opts));
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }

        let process = MockProcess::new();
        self.processes
            .lock()
            .unwrap()
            .push((name.to_string(), process.clone()));

        let client = MockClient::scripted(self.menus.get(name).map(Vec::as_slice).unwrap_or(&[]));
        let tasks = self
            .tasks
            .get(name)
            .cloned()
            .unwrap_or_else(|| vec![("work".to_string(), Outcome::Sleep(Duration::from_millis(20)))]);

        let services = AgentServices {
            driver: client.clone(),
            health: Arc::new(MockHealth::default()),
            maintenance: Arc::new(MockMaintenance::default()),
            routines: Arc::new(NoRoutines),
            gateway: client,
            catalog: Arc::new(MockCatalog { tasks }),
        };
        Ok(AgentParts { services, process })
    }
}

/// An agent with millisecond ticks and idles.
pub fn fast_agent() -> AgentConfig {
    let mut agent = AgentConfig::default();
    agent.executor.tick_min_ms = 1;
    agent.executor.tick_max_ms = 3;
    agent.session.idle_min_ms = 5;
    agent.session.idle_max_ms = 10;
    agent
}

pub fn fast_config(agents: &[&str]) -> SharedConfig {
    let mut config = Config::default();
    config.registry = RegistrySettings {
        restart_settle_ms: 10,
        auth_poll_ms: 10,
        crash_poll_ms: 10,
    };
    for name in agents {
        config.agents.insert(name.to_string(), fast_agent());
    }
    config.shared()
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Awaits `future` or fails the test after `timeout`.
pub async fn within<F: Future>(timeout: Duration, future: F) -> F::Output {
    tokio::time::timeout(timeout, future)
        .await
        .expect("timed out")
}
