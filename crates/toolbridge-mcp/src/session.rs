//! Session protocol engine for one MCP server connection.
//!
//! A [`Session`] owns a transport and a background reader task. The reader
//! drains incoming frames and routes each one: responses go to the caller
//! waiting on that correlation id, notifications go to subscribed listeners,
//! and server-initiated requests get an immediate answer.
//!
//! Lifecycle: `Connecting -> Negotiated -> Active -> Closed`, with any state
//! able to fall to `Failed` when the transport dies or the handshake is
//! rejected. Once terminal, every waiting caller is resolved with
//! [`McpError::ConnectionLost`].

use crate::config::SessionConfig;
use crate::error::McpError;
use crate::jsonrpc::{
    IncomingMessage, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse,
    METHOD_NOT_FOUND, Notification, ServerRequest,
};
use crate::protocol::{
    Implementation, InitializeResult, METHOD_INITIALIZE, METHOD_PING, NOTIFICATION_CANCELLED,
    NOTIFICATION_INITIALIZED, SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities,
};
use crate::transport::Transport;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Negotiated,
    Active,
    Closed,
    Failed,
}

impl SessionState {
    /// Closed and Failed sessions never leave their state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Negotiated => "negotiated",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the server told us during the handshake.
#[derive(Debug, Clone)]
pub struct ServerDetails {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    pub instructions: Option<String>,
}

type Reply = Result<Value, McpError>;

struct PendingRequest {
    method: String,
    deadline: Instant,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingTable {
    next_id: u64,
    requests: HashMap<u64, PendingRequest>,
    closed: bool,
}

impl PendingTable {
    /// Next id not currently in flight. Ids increase monotonically so a late
    /// response to a timed-out request can never reach a newer caller.
    fn allocate_id(&mut self) -> u64 {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id != 0 && !self.requests.contains_key(&self.next_id) {
                return self.next_id;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// State shared between the session handle and its reader task.
struct Shared {
    name: String,
    state: Mutex<SessionState>,
    pending: Mutex<PendingTable>,
    listeners: Mutex<HashMap<String, Vec<mpsc::Sender<Notification>>>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Move to `next` unless the session already ended.
    fn set_state(&self, next: SessionState) -> bool {
        let mut state = lock(&self.state);
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }

    fn lost(&self) -> McpError {
        McpError::ConnectionLost {
            server: self.name.clone(),
        }
    }

    fn register(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<(u64, oneshot::Receiver<Reply>), McpError> {
        let mut table = lock(&self.pending);
        if table.closed {
            return Err(self.lost());
        }
        let id = table.allocate_id();
        let (tx, rx) = oneshot::channel();
        table.requests.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                deadline: Instant::now() + timeout,
                tx,
            },
        );
        Ok((id, rx))
    }

    fn forget(&self, id: u64) {
        lock(&self.pending).requests.remove(&id);
    }

    /// End the session: record `state` and fail everything still waiting.
    fn terminate(&self, state: SessionState) {
        self.set_state(state);
        let drained: Vec<(u64, PendingRequest)> = {
            let mut table = lock(&self.pending);
            table.closed = true;
            table.requests.drain().collect()
        };
        lock(&self.listeners).clear();

        let now = Instant::now();
        for (id, request) in drained {
            tracing::debug!(
                server = %self.name,
                id,
                method = %request.method,
                remaining_ms = millis(request.deadline.saturating_duration_since(now)),
                "failing pending request"
            );
            let _ = request.tx.send(Err(self.lost()));
        }
    }

    fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.correlation_id() else {
            tracing::warn!(
                "MCP server '{}' sent a response without a usable id: {:?}",
                self.name,
                response.id
            );
            return;
        };
        let Some(request) = lock(&self.pending).requests.remove(&id) else {
            tracing::debug!(server = %self.name, id, "response for a request no longer pending");
            return;
        };
        let reply = match response.error {
            Some(err) => Err(McpError::Rpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        tracing::debug!(server = %self.name, id, method = %request.method, "response received");
        let _ = request.tx.send(reply);
    }

    /// Hand a notification to its listeners without ever waiting on them.
    fn dispatch(&self, notification: Notification) {
        let mut listeners = lock(&self.listeners);
        let Some(subscribers) = listeners.get_mut(&notification.method) else {
            tracing::trace!(
                server = %self.name,
                method = %notification.method,
                "no listener, dropping notification"
            );
            return;
        };
        subscribers.retain(|tx| match tx.try_send(notification.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    "Listener for '{}' on MCP server '{}' is full, dropping notification",
                    notification.method,
                    self.name
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        if subscribers.is_empty() {
            listeners.remove(&notification.method);
        }
    }
}

/// One negotiated connection to an MCP server.
pub struct Session {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    details: OnceLock<ServerDetails>,
    negotiating: AtomicBool,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Wrap a connected transport and start reading from it.
    ///
    /// Must be called from within a tokio runtime. The session starts in
    /// `Connecting`; call [`Session::negotiate`] before issuing requests.
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: name.into(),
            state: Mutex::new(SessionState::Connecting),
            pending: Mutex::new(PendingTable::default()),
            listeners: Mutex::new(HashMap::new()),
        });
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            Arc::clone(&shared),
            Arc::clone(&transport),
            cancel.clone(),
        ));

        Self {
            shared,
            transport,
            config,
            details: OnceLock::new(),
            negotiating: AtomicBool::new(false),
            cancel,
            reader: Mutex::new(Some(reader)),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Deadline applied when a caller has no better one.
    pub fn default_timeout(&self) -> Duration {
        self.config.request_timeout()
    }

    /// Handshake results, once negotiation has succeeded.
    pub fn server_details(&self) -> Option<&ServerDetails> {
        self.details.get()
    }

    /// Number of requests currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).requests.len()
    }

    /// Run the capability handshake. Succeeds at most once per session.
    pub async fn negotiate(&self) -> Result<&ServerDetails, McpError> {
        let already_started = self.negotiating.swap(true, Ordering::SeqCst);
        if already_started || self.state() != SessionState::Connecting {
            return Err(McpError::InvalidState {
                server: self.shared.name.clone(),
                state: self.state(),
            });
        }

        match self.handshake().await {
            Ok(details) => Ok(details),
            Err(e) => {
                tracing::warn!("Handshake with MCP server '{}' failed: {}", self.name(), e);
                self.shared.terminate(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<&ServerDetails, McpError> {
        let params = serde_json::json!({
            "protocolVersion": self.config.protocol_version,
            "capabilities": {},
            "clientInfo": {
                "name": self.config.client_name,
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let value = self
            .request(METHOD_INITIALIZE, Some(params), self.default_timeout())
            .await
            .map_err(|e| match e {
                McpError::Rpc { code, message, .. } => {
                    self.mismatch(format!("initialize rejected (code {code}): {message}"))
                }
                other => other,
            })?;

        let init: InitializeResult = serde_json::from_value(value)
            .map_err(|e| self.mismatch(format!("malformed initialize result: {e}")))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(self.mismatch(format!(
                "unsupported protocol version '{}'",
                init.protocol_version
            )));
        }

        let missing: Vec<&str> = self
            .config
            .required_capabilities
            .iter()
            .map(String::as_str)
            .filter(|cap| !init.capabilities.has(cap))
            .collect();
        if !missing.is_empty() {
            return Err(self.mismatch(format!(
                "server lacks required capabilities: {}",
                missing.join(", ")
            )));
        }

        let details = self.details.get_or_init(|| ServerDetails {
            protocol_version: init.protocol_version,
            capabilities: init.capabilities,
            server_info: init.server_info,
            instructions: init.instructions,
        });
        if !self.shared.set_state(SessionState::Negotiated) {
            return Err(self.shared.lost());
        }

        self.send_notification(NOTIFICATION_INITIALIZED, None)
            .await?;
        if !self.shared.set_state(SessionState::Active) {
            return Err(self.shared.lost());
        }

        tracing::info!(
            "MCP session '{}' active: {} {} (protocol {})",
            self.name(),
            details.server_info.name,
            details.server_info.version,
            details.protocol_version
        );
        Ok(details)
    }

    fn mismatch(&self, message: String) -> McpError {
        McpError::ProtocolMismatch {
            server: self.shared.name.clone(),
            message,
        }
    }

    /// Send a request and wait for its response, the deadline, or the end of
    /// the session, whichever comes first. Nothing is retried.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        self.ensure_active()?;
        self.request(method, params, timeout).await
    }

    /// Send a notification to the server.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.ensure_active()?;
        self.send_notification(method, params).await
    }

    /// Register a listener for server notifications with the given method.
    ///
    /// Notifications arrive in the order the server sent them. If the
    /// listener falls behind by more than the configured capacity, newer
    /// notifications are dropped for it. The receiver ends when the session
    /// does.
    pub fn subscribe(&self, method: &str) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(self.config.listener_capacity.max(1));
        let mut listeners = lock(&self.shared.listeners);
        if !self.state().is_terminal() {
            listeners.entry(method.to_string()).or_default().push(tx);
        }
        rx
    }

    /// Shut the session down: fail pending requests, stop the reader, close
    /// the transport. Safe to call more than once and from any state.
    pub async fn close(&self) {
        self.shared.terminate(SessionState::Closed);
        self.cancel.cancel();
        let reader = lock(&self.reader).take();
        if let Some(handle) = reader {
            let _ = handle.await;
        }
        self.transport.close().await;
        tracing::debug!(server = %self.name(), state = %self.state(), "MCP session closed");
    }

    fn ensure_active(&self) -> Result<(), McpError> {
        match self.state() {
            SessionState::Active => Ok(()),
            SessionState::Closed | SessionState::Failed => Err(self.shared.lost()),
            state => Err(McpError::InvalidState {
                server: self.shared.name.clone(),
                state,
            }),
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let (id, rx) = self.shared.register(method, timeout)?;
        // Removes the entry however this future ends, including being dropped
        let guard = PendingGuard {
            shared: &self.shared,
            id,
        };
        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(server = %self.name(), id, method, "sending request");

        let exchange = async {
            if let Err(e) = self.transport.send(frame).await {
                tracing::warn!("Failed to write to MCP server '{}': {}", self.name(), e);
                self.shared.terminate(SessionState::Failed);
                return Err(self.shared.lost());
            }
            rx.await.unwrap_or_else(|_| Err(self.shared.lost()))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => {
                drop(guard);
                tracing::debug!(server = %self.name(), id, method, "request timed out");
                self.cancel_request(id, "request timed out");
                Err(McpError::TimedOut {
                    method: method.to_string(),
                    timeout_ms: millis(timeout),
                })
            }
        }
    }

    /// Tell the server we stopped waiting. Best effort: never blocks the caller.
    fn cancel_request(&self, id: u64, reason: &str) {
        let notification = JsonRpcNotification::new(
            NOTIFICATION_CANCELLED,
            Some(serde_json::json!({ "requestId": id, "reason": reason })),
        );
        let Ok(frame) = serde_json::to_string(&notification) else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            let _ = transport.send(frame).await;
        });
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        if let Err(e) = self.transport.send(frame).await {
            tracing::warn!("Failed to write to MCP server '{}': {}", self.name(), e);
            self.shared.terminate(SessionState::Failed);
            return Err(self.shared.lost());
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.forget(self.id);
    }
}

async fn read_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            frame = transport.receive() => frame,
        };

        let Some(frame) = frame else {
            if !shared.state().is_terminal() {
                tracing::warn!("MCP server '{}' closed the connection", shared.name);
            }
            shared.terminate(SessionState::Failed);
            return;
        };

        match IncomingMessage::parse(&frame) {
            Ok(IncomingMessage::Response(response)) => shared.complete(response),
            Ok(IncomingMessage::Notification(notification)) => shared.dispatch(notification),
            Ok(IncomingMessage::Request(request)) => answer(&shared, &transport, request),
            Err(e) => {
                tracing::warn!("Failed to parse MCP message from '{}': {e}: {frame}", shared.name);
            }
        }
    }
}

/// Reply to a server-initiated request. Only `ping` is supported.
fn answer(shared: &Shared, transport: &Arc<dyn Transport>, request: ServerRequest) {
    let reply = if request.method == METHOD_PING {
        JsonRpcReply::result(request.id, serde_json::json!({}))
    } else {
        tracing::debug!(
            server = %shared.name,
            method = %request.method,
            "unsupported server request"
        );
        JsonRpcReply::error(
            request.id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        )
    };
    let frame = match serde_json::to_string(&reply) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Failed to encode reply for '{}': {e}", shared.name);
            return;
        }
    };
    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        let _ = transport.send(frame).await;
    });
}
