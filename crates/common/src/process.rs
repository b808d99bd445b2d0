//! Backend process management - spawning, readiness and shutdown

use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::rpc::{PendingTable, RpcChannel};

/// Grace period between SIGTERM and a forced kill.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// How to launch a backend.
#[derive(Debug, Clone, Default)]
pub struct BackendCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl BackendCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Handle to a running backend and its RPC channel
pub struct BackendProcess {
    name: String,
    pid: Option<u32>,
    channel: Arc<RpcChannel>,
    shutdown: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<Option<i32>>>,
}

impl BackendProcess {
    /// Spawn the backend with piped stdio. Stderr is forwarded to the log.
    pub fn spawn(name: &str, command: &BackendCommand, request_timeout: Duration) -> Result<Self> {
        info!("Spawning {} backend: {}", name, command.describe());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", command.describe(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(format!("{}: stdin not captured", name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(format!("{}: stdout not captured", name)))?;
        if let Some(stderr) = child.stderr.take() {
            let label = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{}] {}", label, line);
                }
            });
        }

        let pid = child.id();
        let channel = Arc::new(RpcChannel::new(name, stdout, stdin, request_timeout));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_child(
            name.to_string(),
            child,
            shutdown_rx,
            channel.pending_table(),
        ));

        Ok(Self {
            name: name.to_string(),
            pid,
            channel,
            shutdown: Some(shutdown),
            monitor: Some(monitor),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn channel(&self) -> Arc<RpcChannel> {
        Arc::clone(&self.channel)
    }

    /// Ping until the backend answers or `spawn_timeout` elapses.
    pub async fn wait_ready(&self, ping_method: &str, spawn_timeout: Duration) -> Result<Value> {
        let start = Instant::now();
        let mut attempts = 0u32;

        while start.elapsed() < spawn_timeout {
            attempts += 1;
            let remaining = spawn_timeout.saturating_sub(start.elapsed());
            let per_try = remaining.min(Duration::from_secs(1));

            match self
                .channel
                .call_with_timeout(ping_method, json!({}), per_try)
                .await
            {
                Ok(value) => {
                    info!("{} backend ready after {} attempt(s)", self.name, attempts);
                    return Ok(value);
                }
                Err(e @ Error::ProcessExited { .. }) => return Err(e),
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for {} backend to start...", self.name);
                    }
                    debug!("{} ping failed: {}", self.name, e);
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(Error::Spawn(format!(
            "{} backend not ready after {}ms",
            self.name,
            spawn_timeout.as_millis()
        )))
    }

    /// Stop the backend and reject anything still pending. Returns the exit code.
    pub async fn stop(&mut self) -> Option<i32> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let code = match self.monitor.take() {
            Some(monitor) => monitor.await.ok().flatten(),
            None => None,
        };
        self.channel.close(code);
        code
    }
}

impl Drop for BackendProcess {
    fn drop(&mut self) {
        // Dropping the sender tells the monitor to shut the child down.
        self.shutdown.take();
    }
}

async fn monitor_child(
    name: String,
    mut child: Child,
    shutdown: oneshot::Receiver<()>,
    pending: Arc<PendingTable>,
) -> Option<i32> {
    let status = tokio::select! {
        status = child.wait() => {
            warn!("{} backend exited on its own", name);
            status.ok()
        }
        _ = shutdown => {
            info!("Stopping {} backend (pid: {:?})", name, child.id());
            terminate(&mut child).await
        }
    };

    let code = status.and_then(|s| s.code());
    pending.close(code);
    code
}

async fn terminate(child: &mut Child) -> Option<std::process::ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                if let Ok(status) = timeout(SHUTDOWN_GRACE, child.wait()).await {
                    return status.ok();
                }
            }
        }
    }

    let _ = child.kill().await;
    child.wait().await.ok()
}
