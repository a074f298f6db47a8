//! Process-backed collaborators: each agent launches its configured client
//! command and runs its tasks as child processes.

pub mod process;
pub mod tasks;

pub use process::{ClientProcess, ClientSession, ProcessHealth};
pub use tasks::{CommandCatalog, CommandTask};

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::services::{
    AgentFactory, AgentParts, AgentServices, BuildOptions, NoMaintenance, NoRoutines,
};

pub struct ProcessLauncher;

#[async_trait]
impl AgentFactory for ProcessLauncher {
    async fn build(&self, name: &str, config: &AgentConfig, opts: BuildOptions) -> Result<AgentParts> {
        if opts.attach_to_existing {
            // TODO: attach by pid once clients write a pid file.
            bail!("{}: attaching to a running client is not supported", name);
        }

        let process = Arc::new(ClientProcess::spawn(name, &config.client)?);
        let session = Arc::new(ClientSession::new(process.clone()));

        let services = AgentServices {
            driver: session.clone(),
            health: Arc::new(ProcessHealth::new(process.clone())),
            maintenance: Arc::new(NoMaintenance),
            routines: Arc::new(NoRoutines),
            gateway: session.clone(),
            catalog: Arc::new(CommandCatalog::new(config, session)),
        };
        Ok(AgentParts { services, process })
    }
}
