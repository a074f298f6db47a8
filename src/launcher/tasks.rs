use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use super::process::ClientSession;
use crate::config::{AgentConfig, TaskConfig};
use crate::error::SessionError;
use crate::runtime::AgentRuntime;
use crate::services::{Input, ProcessDriver, Task, TaskCatalog};

/// A configured task. With a command it runs as a child process that is
/// killed when the task is cancelled; without one its name is forwarded to
/// the client as text.
pub struct CommandTask {
    config: TaskConfig,
    working_dir: Option<PathBuf>,
    session: Arc<ClientSession>,
}

impl CommandTask {
    pub fn new(config: TaskConfig, working_dir: Option<PathBuf>, session: Arc<ClientSession>) -> Self {
        Self {
            config,
            working_dir,
            session,
        }
    }
}

#[async_trait]
impl Task for CommandTask {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(&self, runtime: &AgentRuntime) -> Result<(), SessionError> {
        let Some(program) = &self.config.command else {
            return self
                .session
                .send_input(Input::Text(self.config.name.clone()))
                .await
                .map_err(|e| SessionError::task(&self.config.name, e.to_string()));
        };

        log::debug!("{}: running task {} ({})", runtime.name(), self.config.name, program);
        let mut command = Command::new(program);
        command
            .args(&self.config.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let status = command
            .status()
            .await
            .map_err(|e| SessionError::task(&self.config.name, format!("failed to launch {}: {}", program, e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(SessionError::task(&self.config.name, format!("exited with {}", status)))
        }
    }

    fn skip_pre_post_routines(&self) -> bool {
        self.config.skip_routines
    }
}

/// Builds a fresh task list from the agent's configuration each session.
pub struct CommandCatalog {
    tasks: Vec<TaskConfig>,
    working_dir: Option<PathBuf>,
    session: Arc<ClientSession>,
}

impl CommandCatalog {
    pub fn new(config: &AgentConfig, session: Arc<ClientSession>) -> Self {
        Self {
            tasks: config.tasks.clone(),
            working_dir: config.client.working_dir.clone(),
            session,
        }
    }
}

impl TaskCatalog for CommandCatalog {
    fn build_tasks(&self) -> Vec<Arc<dyn Task>> {
        self.tasks
            .iter()
            .map(|task| {
                Arc::new(CommandTask::new(
                    task.clone(),
                    self.working_dir.clone(),
                    self.session.clone(),
                )) as Arc<dyn Task>
            })
            .collect()
    }
}
