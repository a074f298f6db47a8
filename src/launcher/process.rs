use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::error::{MenuError, SessionError};
use crate::runtime::AgentRuntime;
use crate::services::{HealthService, Input, ProcessDriver, ProcessHandle, SessionGateway};
use crate::types::Position;

/// A launched client. Commands reach it as lines on its stdin.
pub struct ClientProcess {
    name: String,
    pid: Option<u32>,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
}

impl ClientProcess {
    pub fn spawn(name: &str, client: &ClientConfig) -> Result<Self> {
        if client.command.trim().is_empty() {
            bail!("{}: no client command configured", name);
        }

        let mut command = Command::new(&client.command);
        command
            .args(&client.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &client.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("{}: launching client {}", name, client.command))?;
        let pid = child.id();
        let stdin = child.stdin.take();
        log::info!("{}: launched client {} (pid {:?})", name, client.command, pid);

        Ok(Self {
            name: name.to_string(),
            pid,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
        })
    }

    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            bail!("{}: client input is closed", self.name);
        };
        let written = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.write_all(b"\n").await?;
            pipe.flush().await
        }
        .await;
        if let Err(e) = written {
            *stdin = None;
            return Err(e).with_context(|| format!("{}: writing to client", self.name));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessHandle for ClientProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    async fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if matches!(child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        log::info!("{}: killing client (pid {:?})", self.name, self.pid);
        child
            .kill()
            .await
            .with_context(|| format!("{}: killing client", self.name))
    }
}

fn encode(input: &Input) -> String {
    match input {
        Input::Key(key) => format!("key {}", key),
        Input::Click { x, y } => format!("click {} {}", x, y),
        Input::Text(text) => format!("text {}", text),
    }
}

/// Driver and menu gateway over a [`ClientProcess`]. The client has no
/// observable state beyond being alive, so position, level and latency are
/// never reported.
pub struct ClientSession {
    process: Arc<ClientProcess>,
    in_session: AtomicBool,
}

impl ClientSession {
    pub fn new(process: Arc<ClientProcess>) -> Self {
        Self {
            process,
            in_session: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ProcessDriver for ClientSession {
    async fn refresh_state(&self) -> Result<()> {
        if !self.process.is_alive().await {
            self.in_session.store(false, Ordering::SeqCst);
            bail!("client is not running");
        }
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.in_session.load(Ordering::SeqCst) && self.process.is_alive().await
    }

    async fn current_position(&self) -> Option<Position> {
        None
    }

    async fn current_level(&self) -> Option<u32> {
        None
    }

    async fn latency_ms(&self) -> Option<u32> {
        None
    }

    async fn send_input(&self, input: Input) -> Result<()> {
        self.process.write_line(&encode(&input)).await
    }

    async fn exit_session(&self) -> Result<()> {
        self.process.write_line("exit").await?;
        self.in_session.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SessionGateway for ClientSession {
    async fn in_session(&self) -> bool {
        self.is_running().await
    }

    async fn advance_menu(&self) -> Result<(), MenuError> {
        if !self.process.is_alive().await {
            return Err(MenuError::Unrecoverable("client exited".to_string()));
        }
        self.process
            .write_line("enter")
            .await
            .map_err(|e| MenuError::Transient(e.to_string()))?;
        self.in_session.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Health is the client being alive.
pub struct ProcessHealth {
    process: Arc<ClientProcess>,
}

impl ProcessHealth {
    pub fn new(process: Arc<ClientProcess>) -> Self {
        Self { process }
    }
}

#[async_trait]
impl HealthService for ProcessHealth {
    async fn check_health_and_react(&self, _runtime: &AgentRuntime) -> Result<(), SessionError> {
        if self.process.is_alive().await {
            Ok(())
        } else {
            Err(SessionError::Died)
        }
    }
}
