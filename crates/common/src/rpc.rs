//! JSON-RPC over newline-delimited JSON
//!
//! Every call writes one request line and waits for the response line that
//! carries the same id. The pending table is the only state shared between the
//! calling side and the reader task, and it is only touched under its lock.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result, RpcErrorPayload};

const JSONRPC_VERSION: &str = "2.0";

type Reply = Result<Value>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorPayload>,
}

#[derive(Default)]
struct PendingState {
    entries: HashMap<u64, oneshot::Sender<Reply>>,
    /// Set once the backend is gone; holds its exit code when known.
    exited: Option<Option<i32>>,
}

/// Outstanding requests keyed by id.
#[derive(Default)]
pub(crate) struct PendingTable {
    state: Mutex<PendingState>,
}

impl PendingTable {
    fn register(&self, id: u64) -> Result<oneshot::Receiver<Reply>> {
        let mut state = self.state.lock();
        if let Some(code) = state.exited {
            return Err(Error::ProcessExited { code });
        }
        let (tx, rx) = oneshot::channel();
        state.entries.insert(id, tx);
        Ok(rx)
    }

    fn complete(&self, id: u64, reply: Reply) -> bool {
        let sender = self.state.lock().entries.remove(&id);
        match sender {
            // The caller may have given up already.
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    fn forget(&self, id: u64) {
        self.state.lock().entries.remove(&id);
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn exit_code(&self) -> Option<i32> {
        self.state.lock().exited.flatten()
    }

    /// Reject every outstanding request with a process-exited failure.
    pub(crate) fn close(&self, code: Option<i32>) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            if state.exited.is_none() || code.is_some() {
                state.exited = Some(code);
            }
            state.entries.drain().collect()
        };
        if !drained.is_empty() {
            debug!("Rejecting {} pending request(s): backend exited", drained.len());
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(Error::ProcessExited { code }));
        }
    }
}

/// Removes the pending entry when a call finishes or is abandoned.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.forget(self.id);
    }
}

/// Request/response channel over a backend's byte streams
pub struct RpcChannel {
    name: String,
    writer: AsyncMutex<BoxedWriter>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl RpcChannel {
    /// Wrap a reader/writer pair. The reader is consumed by a background task
    /// that routes responses to their callers.
    pub fn new<R, W>(name: impl Into<String>, reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.into();
        let pending = Arc::new(PendingTable::default());
        let reader_task = tokio::spawn(read_responses(name.clone(), reader, Arc::clone(&pending)));

        Self {
            name,
            writer: AsyncMutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader_task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn pending_table(&self) -> Arc<PendingTable> {
        Arc::clone(&self.pending)
    }

    /// Call a method with the channel's default timeout
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.request_timeout).await
    }

    /// Call a method with an explicit timeout
    pub async fn call_with_timeout(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rx = self.pending.register(id)?;
        let _guard = PendingGuard {
            table: &self.pending,
            id,
        };

        let line = serde_json::to_string(&RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params: &params,
        })?;
        trace!("{} -> {}", self.name, line);

        if let Err(e) = self.write_line(&line).await {
            return Err(match self.pending.state.lock().exited {
                Some(code) => Error::ProcessExited { code },
                None => Error::Io(e),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::ProcessExited {
                code: self.pending.exit_code(),
            }),
            Err(_) => {
                warn!("{}: request {} ({}) timed out", self.name, id, method);
                Err(Error::RequestTimeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Call a method and decode its result
    pub async fn call_typed<T: serde::de::DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Mark the backend as gone and fail everything still pending.
    pub fn close(&self, code: Option<i32>) {
        self.pending.close(code);
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_responses<R>(name: String, reader: R, pending: Arc<PendingTable>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_line(&name, &line, &pending),
            Ok(None) => break,
            Err(e) => {
                warn!("{}: read error: {}", name, e);
                break;
            }
        }
    }
    debug!("{}: output stream closed", name);
    pending.close(None);
}

/// Route one output line. Anything that is not a response to a pending
/// request is dropped, since backends may log to the same stream.
fn dispatch_line(name: &str, line: &str, pending: &PendingTable) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    let response: RpcResponse = match serde_json::from_str(trimmed) {
        Ok(response) => response,
        Err(_) => {
            trace!("{}: ignoring non-JSON line: {}", name, trimmed);
            return;
        }
    };
    let Some(id) = response.id.as_ref().and_then(Value::as_u64) else {
        trace!("{}: ignoring line without numeric id", name);
        return;
    };
    trace!("{} <- {}", name, trimmed);

    let reply = match response.error {
        Some(error) => Err(Error::Rpc(error)),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    if !pending.complete(id, reply) {
        trace!("{}: no pending request for id {}", name, id);
    }
}
