//! A scripted in-process MCP server for integration tests.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use toolbridge_mcp::{ChannelTransport, McpClient, SessionConfig, Transport};

/// How the server answers one request.
pub enum Reply {
    Result(Value),
    Error { code: i64, message: String },
    /// Never answer.
    Silent,
    /// Answer after a delay.
    After(Duration, Box<Reply>),
}

type Handler = dyn Fn(&str, &Value) -> Reply + Send + Sync;

pub struct ScriptedServer {
    pub transport: Arc<ChannelTransport>,
    received: Arc<Mutex<Vec<Value>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    /// Serve `transport`, answering each request through `handler`. Requests
    /// are answered concurrently, so delayed replies can overtake each other.
    pub fn start<F>(transport: ChannelTransport, handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        let transport = Arc::new(transport);
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let server_transport = Arc::clone(&transport);
        let log = Arc::clone(&received);
        let handle = tokio::spawn(async move {
            while let Some(frame) = server_transport.receive().await {
                let Ok(msg) = serde_json::from_str::<Value>(&frame) else {
                    continue;
                };
                log.lock().unwrap().push(msg.clone());

                let (Some(id), Some(method)) = (msg.get("id"), msg["method"].as_str()) else {
                    continue;
                };
                let reply = handler(method, msg.get("params").unwrap_or(&Value::Null));
                let id = id.clone();
                let transport = Arc::clone(&server_transport);
                tokio::spawn(async move { respond(&*transport, id, reply).await });
            }
        });

        Self {
            transport,
            received,
            handle,
        }
    }

    /// Every message the client sent, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Methods of every message the client sent.
    pub fn methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|m| m["method"].as_str().map(str::to_string))
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    /// Push a raw frame to the client.
    pub async fn send_raw(&self, frame: &str) {
        self.transport.send(frame.to_string()).await.unwrap();
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) {
        let mut msg = json!({"jsonrpc": "2.0", "method": method});
        if let Some(params) = params {
            msg["params"] = params;
        }
        self.send_raw(&msg.to_string()).await;
    }

    /// Hang up on the client.
    pub async fn disconnect(&self) {
        self.transport.close().await;
        self.handle.abort();
    }
}

async fn respond(transport: &ChannelTransport, id: Value, reply: Reply) {
    let mut reply = reply;
    loop {
        match reply {
            Reply::After(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
            Reply::Silent => return,
            Reply::Result(result) => {
                let frame = json!({"jsonrpc": "2.0", "id": id, "result": result});
                let _ = transport.send(frame.to_string()).await;
                return;
            }
            Reply::Error { code, message } => {
                let frame = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": code, "message": message}
                });
                let _ = transport.send(frame.to_string()).await;
                return;
            }
        }
    }
}

pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {"tools": {"listChanged": true}},
        "serverInfo": {"name": "everything", "version": "1.0.0"}
    })
}

pub fn echo_tool() -> Value {
    json!({
        "name": "echo",
        "description": "Echoes back the input",
        "inputSchema": {
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        }
    })
}

pub fn add_tool() -> Value {
    json!({
        "name": "add",
        "description": "Adds two numbers",
        "inputSchema": {
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a", "b"]
        },
        "annotations": {"readOnlyHint": true}
    })
}

pub fn fail_tool() -> Value {
    json!({
        "name": "fail",
        "description": "Always fails",
        "inputSchema": {"type": "object"}
    })
}

/// Handler modelled on the reference "everything" server.
pub fn everything(tools: Arc<Mutex<Vec<Value>>>) -> impl Fn(&str, &Value) -> Reply + Send + Sync {
    move |method, params| match method {
        "initialize" => Reply::Result(initialize_result()),
        "ping" => Reply::Result(json!({})),
        "tools/list" => Reply::Result(json!({"tools": tools.lock().unwrap().clone()})),
        "tools/call" => call_tool(params),
        other => Reply::Error {
            code: -32601,
            message: format!("Method not found: {other}"),
        },
    }
}

fn call_tool(params: &Value) -> Reply {
    let args = &params["arguments"];
    match params["name"].as_str() {
        Some("echo") => {
            let message = args["message"].as_str().unwrap_or("");
            Reply::Result(json!({
                "content": [{"type": "text", "text": format!("Echo: {message}")}]
            }))
        }
        Some("add") => {
            let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
            Reply::Result(json!({
                "content": [{"type": "text", "text": format!("The sum is {sum}")}],
                "structuredContent": {"sum": sum}
            }))
        }
        Some("fail") => Reply::Result(json!({
            "content": [{"type": "text", "text": "something broke"}],
            "isError": true
        })),
        Some(other) => Reply::Error {
            code: -32602,
            message: format!("Unknown tool: {other}"),
        },
        None => Reply::Error {
            code: -32602,
            message: "missing tool name".into(),
        },
    }
}

pub fn default_tools() -> Arc<Mutex<Vec<Value>>> {
    Arc::new(Mutex::new(vec![echo_tool(), add_tool(), fail_tool()]))
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        request_timeout_ms: 5000,
        ..SessionConfig::default()
    }
}

/// A client connected to an "everything" server over an in-memory pair.
pub async fn connect_everything(tools: Arc<Mutex<Vec<Value>>>) -> (McpClient, ScriptedServer) {
    let (client_side, server_side) = ChannelTransport::pair();
    let server = ScriptedServer::start(server_side, everything(tools));
    let client =
        McpClient::with_transport("everything".to_string(), Arc::new(client_side), test_config())
            .await
            .expect("client connects");
    (client, server)
}

impl ScriptedServer {
    /// Wait until the client has hung up on us.
    pub async fn wait_for_hangup(&self) -> bool {
        for _ in 0..200 {
            if self.handle.is_finished() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Wait until some received message satisfies `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&Value) -> bool) -> Option<Value> {
        for _ in 0..200 {
            if let Some(found) = self.received().into_iter().find(|m| pred(m)) {
                return Some(found);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}
