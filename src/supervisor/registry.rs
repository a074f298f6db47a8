use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};

use super::crash::CrashDetector;
use super::instance::{AgentInstance, InstanceSettings};
use crate::config::{read_config, SharedConfig};
use crate::engine::ExecutorConfig;
use crate::error::RegistryError;
use crate::events::NotificationSink;
use crate::runtime::AgentRuntime;
use crate::services::{AgentFactory, BuildOptions};
use crate::types::{AgentName, DataSnapshot, Stats, SupervisorStatus};

/// The start/stop/status surface the scheduler and remote controls depend on.
#[async_trait]
pub trait AgentControl: Send + Sync {
    /// Blocks until the started instance finishes.
    async fn start(&self, name: &str, manual_mode: bool) -> Result<(), RegistryError>;
    async fn stop(&self, name: &str);
    fn status(&self, name: &str) -> Stats;
}

#[derive(Default)]
struct Entries {
    instances: HashMap<AgentName, Arc<AgentInstance>>,
    detectors: HashMap<AgentName, CrashDetector>,
}

struct Inner {
    config: SharedConfig,
    factory: Arc<dyn AgentFactory>,
    sink: Arc<dyn NotificationSink>,
    entries: RwLock<Entries>,
}

/// Owns every running agent instance, at most one per name.
///
/// The entry maps are only touched under the lock; starting, stopping and
/// running instances always happens after it is released.
#[derive(Clone)]
pub struct SupervisorRegistry {
    inner: Arc<Inner>,
}

impl SupervisorRegistry {
    pub fn new(
        config: SharedConfig,
        factory: Arc<dyn AgentFactory>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                sink,
                entries: RwLock::new(Entries::default()),
            }),
        }
    }

    /// Builds, registers and runs an agent. Returns once its run loop ends.
    pub async fn start(
        &self,
        name: &str,
        attach_to_existing: bool,
        manual_mode: bool,
    ) -> Result<(), RegistryError> {
        self.inner
            .start(name, BuildOptions {
                attach_to_existing,
                manual_mode,
            })
            .await
    }

    pub async fn stop(&self, name: &str) {
        self.inner.stop(name).await;
    }

    pub async fn stop_all(&self) {
        self.inner.stop_all().await;
    }

    pub fn status(&self, name: &str) -> Stats {
        self.inner
            .instance(name)
            .map(|i| i.stats())
            .unwrap_or_else(Stats::not_started)
    }

    pub async fn data(&self, name: &str) -> DataSnapshot {
        match self.inner.instance(name) {
            Some(instance) => instance.data().await,
            None => DataSnapshot::default(),
        }
    }

    pub fn context(&self, name: &str) -> Option<Arc<AgentRuntime>> {
        self.inner.instance(name).map(|i| i.runtime().clone())
    }

    /// Returns the new paused state, or `None` when the agent is not registered.
    pub fn toggle_pause(&self, name: &str) -> Option<bool> {
        self.inner.instance(name).map(|i| i.toggle_pause())
    }

    pub fn registered(&self) -> Vec<AgentName> {
        let mut names: Vec<_> = self.inner.read().instances.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn available(&self) -> Vec<AgentName> {
        read_config(&self.inner.config).agents.keys().cloned().collect()
    }
}

#[async_trait]
impl AgentControl for SupervisorRegistry {
    async fn start(&self, name: &str, manual_mode: bool) -> Result<(), RegistryError> {
        SupervisorRegistry::start(self, name, false, manual_mode).await
    }

    async fn stop(&self, name: &str) {
        SupervisorRegistry::stop(self, name).await;
    }

    fn status(&self, name: &str) -> Stats {
        SupervisorRegistry::status(self, name)
    }
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn instance(&self, name: &str) -> Option<Arc<AgentInstance>> {
        self.read().instances.get(name).cloned()
    }

    async fn start(self: &Arc<Self>, name: &str, opts: BuildOptions) -> Result<(), RegistryError> {
        if self.read().instances.contains_key(name) {
            return Err(RegistryError::AlreadyRunning(name.to_string()));
        }

        let (agent_config, crash_poll) = {
            let config = read_config(&self.config);
            let agent = config
                .agent(name)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownAgent(name.to_string()))?;
            (agent, Duration::from_millis(config.registry.crash_poll_ms))
        };

        let parts = self.factory.build(name, &agent_config, opts).await?;
        let runtime = Arc::new(AgentRuntime::new(name, opts.manual_mode));
        let instance = Arc::new(AgentInstance::new(
            runtime,
            parts.services,
            parts.process.clone(),
            self.sink.clone(),
            ExecutorConfig::from(&agent_config),
            InstanceSettings::from(&agent_config),
        ));
        log::info!(
            "{}: {} mode enabled",
            name,
            if opts.manual_mode { "manual" } else { "normal" }
        );

        let registered = {
            let mut entries = self.write();
            // Re-checked under the write lock: two starts may both have passed
            // the optimistic check above.
            if entries.instances.contains_key(name) {
                false
            } else {
                if let Some(old) = entries.detectors.remove(name) {
                    old.stop();
                }
                entries.instances.insert(name.to_string(), instance.clone());
                let detector = CrashDetector::spawn(
                    name,
                    parts.process.clone(),
                    crash_poll,
                    self.crash_callback(name),
                );
                entries.detectors.insert(name.to_string(), detector);
                true
            }
        };

        if !registered {
            if !opts.attach_to_existing {
                if let Err(e) = parts.process.kill().await {
                    log::warn!("{}: failed to discard duplicate client: {}", name, e);
                }
            }
            return Err(RegistryError::AlreadyRunning(name.to_string()));
        }

        if let Err(e) = instance.run().await {
            log::error!("{}: error running supervisor: {}", name, e);
        }
        Ok(())
    }

    fn crash_callback(self: &Arc<Self>, name: &str) -> Box<dyn FnOnce() + Send + 'static> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let name = name.to_string();
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(inner.handle_crash(name));
            }
        })
    }

    async fn stop(&self, name: &str) {
        let (instance, detector) = {
            let mut entries = self.write();
            (entries.instances.remove(name), entries.detectors.remove(name))
        };
        self.shutdown_entry(name, instance, detector).await;
    }

    async fn stop_all(&self) {
        let snapshot: Vec<(AgentName, Arc<AgentInstance>)> = self
            .read()
            .instances
            .iter()
            .map(|(name, instance)| (name.clone(), instance.clone()))
            .collect();

        for (name, instance) in snapshot {
            let detector = {
                let mut entries = self.write();
                // A crash restart may have replaced the entry since the snapshot.
                let same = entries
                    .instances
                    .get(&name)
                    .is_some_and(|current| Arc::ptr_eq(current, &instance));
                if same {
                    entries.instances.remove(&name);
                    entries.detectors.remove(&name)
                } else {
                    None
                }
            };
            self.shutdown_entry(&name, Some(instance), detector).await;
        }
    }

    async fn shutdown_entry(
        &self,
        name: &str,
        instance: Option<Arc<AgentInstance>>,
        detector: Option<CrashDetector>,
    ) {
        if instance.is_none() && detector.is_none() {
            return;
        }
        log::info!("{}: stopping supervisor instance", name);
        if let Some(detector) = detector {
            detector.stop();
        }
        if let Some(instance) = instance {
            instance.stop().await;
        }
    }

    /// Restart policy, run when a crash detector sees the client disappear.
    fn handle_crash(self: Arc<Self>, name: AgentName) -> BoxFuture<'static, ()> {
        async move {
            let Some(instance) = self.instance(&name) else {
                return;
            };
            instance.mark_crashed();
            let runtime = instance.runtime().clone();
            drop(instance);

            if runtime.manual_mode() {
                log::info!("{}: manual mode, client closed, stopping without restart", name);
                self.stop(&name).await;
                return;
            }

            let settle = Duration::from_millis(read_config(&self.config).registry.restart_settle_ms);

            if runtime.clean_stop_requested() {
                match runtime.restart_with() {
                    Some(next) => {
                        log::info!("{}: clean stop, handing over to {}", name, next);
                        self.stop(&name).await;
                        tokio::time::sleep(settle).await;
                        if let Err(e) = self.start(&next, BuildOptions::default()).await {
                            log::error!("{}: failed to start next agent {}: {}", name, next, e);
                        }
                    }
                    None => {
                        log::info!("{}: stopped cleanly, not restarting", name);
                        self.stop(&name).await;
                    }
                }
                return;
            }

            log::info!("{}: restarting after crash", name);
            self.stop(&name).await;
            tokio::time::sleep(settle).await;
            self.wait_for_exclusive_login(&name).await;

            if let Err(e) = self.start(&name, BuildOptions::default()).await {
                log::error!("{}: failed to restart: {}", name, e);
            }
        }
        .boxed()
    }

    /// Waits while another client that needs exclusive login is starting.
    async fn wait_for_exclusive_login(&self, name: &str) {
        loop {
            let (blocking, poll) = {
                let config = read_config(&self.config);
                let poll = Duration::from_millis(config.registry.auth_poll_ms);
                let own_exclusive = config
                    .agent(name)
                    .is_some_and(|a| a.auth_method.requires_exclusive_login());

                let entries = self.read();
                let blocking = entries.instances.iter().find_map(|(other, instance)| {
                    if other == name || instance.status() != SupervisorStatus::Starting {
                        return None;
                    }
                    let other_exclusive = config
                        .agent(other)
                        .is_some_and(|a| a.auth_method.requires_exclusive_login());
                    (own_exclusive || other_exclusive).then(|| other.clone())
                });
                (blocking, poll)
            };

            match blocking {
                Some(other) => {
                    log::info!(
                        "{}: waiting before restart, {} is starting with token auth",
                        name,
                        other
                    );
                    tokio::time::sleep(poll).await;
                }
                None => return,
            }
        }
    }
}
