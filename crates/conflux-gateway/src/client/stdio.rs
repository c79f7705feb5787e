//! Newline-delimited JSON-RPC over a child process's stdin/stdout.
//!
//! One reader task routes responses to waiting requests by id, so several
//! requests may be in flight on the same process. When the process closes
//! stdout the transport is marked closed and every later request fails
//! at once.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use conflux_core::codes;
use conflux_core::ports::BackendError;

use super::{IncomingMessage, OutgoingNotification, OutgoingRequest, RpcTransport};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<IncomingMessage>>>>;

/// Everything needed to spawn a stdio backend.
#[derive(Debug, Clone)]
pub struct SpawnSpec<'a> {
    pub program: &'a Path,
    pub args: &'a [String],
    pub cwd: Option<&'a str>,
    /// Full PATH for the child.
    pub path: OsString,
    pub env: &'a [(String, String)],
}

/// Transport over a spawned child process.
pub struct StdioTransport {
    label: String,
    outgoing: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    /// Flips to `true` once stdout is gone or `close` ran.
    closed: Arc<watch::Sender<bool>>,
    next_id: AtomicU64,
    child: tokio::sync::Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the process and start the reader, writer and stderr tasks.
    pub fn spawn(label: impl Into<String>, spec: &SpawnSpec<'_>) -> Result<Self, BackendError> {
        let label = label.into();

        let mut command = Command::new(spec.program);
        command
            .args(spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PATH", &spec.path)
            .kill_on_drop(true);
        if let Some(cwd) = spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            BackendError::transport(format!(
                "Failed to spawn '{}': {e} (args: {:?}, cwd: {:?})",
                spec.program.display(),
                spec.args,
                spec.cwd
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::transport("Failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::transport("Failed to get stdout"))?;
        let stderr = child.stderr.take();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(watch::Sender::new(false));

        let mut tasks = vec![
            tokio::spawn(write_loop(label.clone(), stdin, outgoing_rx)),
            tokio::spawn(read_loop(
                label.clone(),
                stdout,
                pending.clone(),
                closed.clone(),
                outgoing.clone(),
            )),
        ];
        if let Some(stderr) = stderr {
            let stderr_label = label.clone();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %stderr_label, "{line}");
                }
            }));
        }

        tracing::debug!(server = %label, pid = ?child.id(), "Spawned backend process");

        Ok(Self {
            label,
            outgoing,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            child: tokio::sync::Mutex::new(Some(child)),
            tasks: Mutex::new(tasks),
        })
    }

    fn send_line(&self, line: String) -> Result<(), BackendError> {
        self.outgoing
            .send(line)
            .map_err(|_| BackendError::transport(format!("{} is not connected", self.label)))
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn closed_error(&self) -> BackendError {
        BackendError::transport(format!("{} closed the connection", self.label))
    }
}

/// A request awaiting its response.
///
/// Dropped before completion (deadline expired, caller went away) it
/// frees the slot and tells the backend to stop working on it.
struct InFlight<'a> {
    id: u64,
    pending: &'a PendingMap,
    outgoing: &'a mpsc::UnboundedSender<String>,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": self.id, "reason": "request abandoned by gateway" }
        });
        let _ = self.outgoing.send(format!("{notification}\n"));
        tracing::debug!(request_id = self.id, "Cancelled in-flight backend request");
    }
}

#[async_trait]
impl RpcTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&OutgoingRequest {
            jsonrpc: "2.0",
            id,
            method,
            params: params.as_ref(),
        })
        .map_err(|e| BackendError::transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| BackendError::transport("pending request table poisoned"))?
            .insert(id, tx);
        // The reader marks the transport closed before it drains `pending`,
        // so a waiter inserted after the drain is caught here.
        if self.is_closed() {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&id);
            }
            return Err(self.closed_error());
        }
        let mut in_flight = InFlight {
            id,
            pending: &self.pending,
            outgoing: &self.outgoing,
            finished: false,
        };

        if let Err(e) = self.send_line(line + "\n") {
            in_flight.finished = true;
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&id);
            }
            return Err(e);
        }

        let response = rx.await;
        in_flight.finished = true;
        response.map_err(|_| self.closed_error())?.into_result()
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BackendError> {
        let line = serde_json::to_string(&OutgoingNotification {
            jsonrpc: "2.0",
            method,
            params: params.as_ref(),
        })
        .map_err(|e| BackendError::transport(e.to_string()))?;
        self.send_line(line + "\n")
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(server = %self.label, error = %e, "Backend process already exited");
            }
            let _ = child.wait().await;
            tracing::debug!(server = %self.label, "Backend process stopped");
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    async fn closed(&self) -> String {
        let mut closed = self.closed.subscribe();
        // The sender lives in `self`, so this only ends once the flag is set.
        let _ = closed.wait_for(|closed| *closed).await;
        self.closed_error().message
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

async fn write_loop(
    label: String,
    mut stdin: ChildStdin,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = outgoing.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(server = %label, error = %e, "Failed to write to backend");
            break;
        }
    }
}

async fn read_loop(
    label: String,
    stdout: ChildStdout,
    pending: PendingMap,
    closed: Arc<watch::Sender<bool>>,
    outgoing: mpsc::UnboundedSender<String>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_line(&label, line.trim(), &pending, &outgoing),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(server = %label, error = %e, "Failed to read from backend");
                break;
            }
        }
    }

    tracing::debug!(server = %label, "Backend closed stdout");
    closed.send_replace(true);
    // Dropping the senders wakes every waiter with a closed-connection error.
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
}

fn dispatch_line(
    label: &str,
    line: &str,
    pending: &PendingMap,
    outgoing: &mpsc::UnboundedSender<String>,
) {
    if line.is_empty() {
        return;
    }
    // Package runners (npx, uvx) print banners before the server starts.
    let Ok(message) = serde_json::from_str::<IncomingMessage>(line) else {
        tracing::debug!(server = %label, line, "Skipping non-JSON-RPC output");
        return;
    };

    if message.is_response() {
        let Some(id) = message.id.as_ref().and_then(Value::as_u64) else {
            tracing::debug!(server = %label, "Response without a numeric id");
            return;
        };
        let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(message);
            }
            None => tracing::debug!(server = %label, id, "Response for abandoned request"),
        }
        return;
    }

    match (message.id, message.method.as_deref()) {
        (Some(id), Some("ping")) => {
            let reply = json!({ "jsonrpc": "2.0", "id": id, "result": {} });
            let _ = outgoing.send(format!("{reply}\n"));
        }
        (Some(id), Some(method)) => {
            let reply = json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": codes::METHOD_NOT_FOUND, "message": format!("Method not found: {method}") }
            });
            let _ = outgoing.send(format!("{reply}\n"));
        }
        (None, Some(method)) => {
            tracing::debug!(server = %label, method, "Backend notification");
        }
        _ => tracing::debug!(server = %label, "Ignoring unrecognized message"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> (Vec<String>, OsString) {
        (
            vec!["-c".to_string(), script.to_string()],
            std::env::var_os("PATH").unwrap_or_default(),
        )
    }

    #[tokio::test]
    async fn test_request_round_trip_skips_banner() {
        let (args, path) = sh(
            r#"read line; echo "starting server..."; echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'; sleep 1"#,
        );
        let spec = SpawnSpec {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            path,
            env: &[],
        };
        let transport = StdioTransport::spawn("echo", &spec).unwrap();

        let result = transport.request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_backend_error_is_verbatim() {
        let (args, path) = sh(
            r#"read line; echo '{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad args"}}'; sleep 1"#,
        );
        let spec = SpawnSpec {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            path,
            env: &[],
        };
        let transport = StdioTransport::spawn("err", &spec).unwrap();

        let err = transport.request("tools/call", None).await.unwrap_err();
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "bad args");
        transport.close().await;
    }

    #[tokio::test]
    async fn test_exit_fails_pending_request() {
        let (args, path) = sh("read line; exit 0");
        let spec = SpawnSpec {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            path,
            env: &[],
        };
        let transport = StdioTransport::spawn("quitter", &spec).unwrap();

        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(err.message.contains("closed"));
    }

    #[tokio::test]
    async fn test_request_after_stdout_closed_fails_fast() {
        let (args, path) = sh("exec >&-; exec sleep 30");
        let spec = SpawnSpec {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            path,
            env: &[],
        };
        let transport = StdioTransport::spawn("mute", &spec).unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(3), transport.closed())
            .await
            .expect("closed signal");
        assert!(reason.contains("mute"));

        let outcome =
            tokio::time::timeout(Duration::from_secs(3), transport.request("tools/list", None))
                .await
                .expect("request should not hang");
        let err = outcome.unwrap_err();
        assert!(err.message.contains("closed"));
        assert!(transport.pending.lock().unwrap().is_empty());
        transport.close().await;
    }

    #[tokio::test]
    async fn test_close_fails_later_requests() {
        let (args, path) = sh("sleep 30");
        let spec = SpawnSpec {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            path,
            env: &[],
        };
        let transport = StdioTransport::spawn("idle", &spec).unwrap();
        transport.close().await;

        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(err.message.contains("closed"));
    }

    #[tokio::test]
    async fn test_abandoned_request_sends_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("second-line");
        let script = format!("read a; read b; printf '%s\\n' \"$b\" > {}", out.display());
        let (args, path) = sh(&script);
        let spec = SpawnSpec {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            path,
            env: &[],
        };
        let transport = StdioTransport::spawn("slow", &spec).unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(200), transport.request("tools/call", None))
                .await;
        assert!(outcome.is_err());

        let mut written = String::new();
        for _ in 0..50 {
            if let Ok(text) = tokio::fs::read_to_string(&out).await {
                if !text.is_empty() {
                    written = text;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let notification: Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(notification["method"], "notifications/cancelled");
        assert_eq!(notification["params"]["requestId"], 1);
        transport.close().await;
    }
}
