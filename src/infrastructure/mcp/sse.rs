use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use reqwest_eventsource::{Event, EventSource};
use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::McpError;
use super::{McpSession, PROTOCOL_VERSION, RemoteToolInfo, initialize_params, parse_tool_list};

/// HTTP+SSE session: the event stream delivers an `endpoint` event naming
/// the POST URL, JSON-RPC requests go out over POST, and responses come
/// back as `message` events on the stream.
pub struct SseSession {
    inner: Arc<SseInner>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

struct SseInner {
    label: String,
    http: Client,
    post_url: Url,
    pending: AsyncMutex<HashMap<String, oneshot::Sender<Result<Value, McpError>>>>,
    id_counter: AtomicU64,
}

impl SseSession {
    pub async fn open(url: Url) -> Result<Self, McpError> {
        let label = url.to_string();
        let http = Client::new();

        let request = http
            .get(url.clone())
            .header("Accept", "text/event-stream")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION);
        let mut stream = EventSource::new(request)
            .map_err(|err| McpError::transport(&label, err.to_string()))?;

        // The server must announce the message endpoint before anything else.
        let endpoint = loop {
            match stream.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(message))) if message.event == "endpoint" => {
                    break message.data;
                }
                Some(Ok(Event::Message(message))) => {
                    debug!(server = %label, event = %message.event, "ignoring pre-endpoint event");
                }
                Some(Err(err)) => {
                    return Err(McpError::transport(&label, err.to_string()));
                }
                None => {
                    return Err(McpError::Terminated {
                        server: label.clone(),
                    });
                }
            }
        };
        let post_url = url
            .join(endpoint.trim())
            .map_err(|err| McpError::transport(&label, format!("bad endpoint event: {err}")))?;
        debug!(server = %label, post_url = %post_url, "SSE endpoint negotiated");

        let inner = Arc::new(SseInner {
            label,
            http,
            post_url,
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
        });

        let reader_inner = Arc::clone(&inner);
        let reader = tokio::spawn(async move {
            reader_inner.reader_loop(stream).await;
        });

        let session = Self {
            inner,
            reader: std::sync::Mutex::new(Some(reader)),
        };

        match session.inner.initialize().await {
            Ok(()) => Ok(session),
            Err(err) => {
                session.close().await;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl McpSession for SseSession {
    async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>, McpError> {
        let result = self.inner.send_request("tools/list", json!({})).await?;
        Ok(parse_tool_list(&result))
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpError> {
        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        self.inner.send_request("tools/call", params).await
    }

    async fn close(&self) {
        if let Ok(mut handle) = self.reader.lock() {
            if let Some(reader) = handle.take() {
                reader.abort();
            }
        }
        self.inner
            .fail_pending(McpError::Terminated {
                server: self.inner.label.clone(),
            })
            .await;
    }
}

impl SseInner {
    async fn initialize(&self) -> Result<(), McpError> {
        self.send_request("initialize", initialize_params()).await?;
        self.post(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
            "params": {}
        }))
        .await
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = format!("req-{}", self.id_counter.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        if let Err(err) = self.post(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(McpError::Cancelled {
                server: self.label.clone(),
            }),
        }
    }

    async fn post(&self, payload: &Value) -> Result<(), McpError> {
        self.http
            .post(self.post_url.clone())
            .json(payload)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| McpError::transport(&self.label, err.to_string()))?;
        Ok(())
    }

    async fn reader_loop(self: Arc<Self>, mut stream: EventSource) {
        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) if message.event == "message" => {
                    match serde_json::from_str::<Value>(&message.data) {
                        Ok(value) => self.route_inbound(value).await,
                        Err(source) => {
                            warn!(
                                server = %self.label,
                                %source,
                                "received invalid JSON over SSE"
                            );
                        }
                    }
                }
                Ok(Event::Message(message)) => {
                    debug!(server = %self.label, event = %message.event, "ignoring SSE event");
                }
                Err(err) => {
                    warn!(server = %self.label, %err, "SSE stream error");
                    break;
                }
            }
        }

        self.fail_pending(McpError::Terminated {
            server: self.label.clone(),
        })
        .await;
    }

    async fn route_inbound(&self, value: Value) {
        if value.get("method").is_some() {
            if let Some(id) = value.get("id").cloned() {
                let method = value.get("method").and_then(Value::as_str).unwrap_or("");
                let answer = match method {
                    "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
                    other => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {
                            "code": -32601,
                            "message": format!("client does not implement method '{other}'"),
                        }
                    }),
                };
                if let Err(err) = self.post(&answer).await {
                    warn!(server = %self.label, %err, "failed to answer server request");
                }
            } else {
                let method = value.get("method").and_then(Value::as_str).unwrap_or("");
                debug!(server = %self.label, method, "notification from MCP server");
            }
            return;
        }

        let key = match value.get("id") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(num)) => num.to_string(),
            _ => return,
        };
        let responder = {
            let mut pending = self.pending.lock().await;
            pending.remove(&key)
        };
        let Some(sender) = responder else {
            debug!(server = %self.label, response_id = key, "response for unknown request");
            return;
        };

        let outcome = if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Err(McpError::Rpc {
                server: self.label.clone(),
                code,
                message,
            })
        } else {
            Ok(value)
        };
        let _ = sender.send(outcome);
    }

    async fn fail_pending(&self, error: McpError) {
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(match &error {
                McpError::Terminated { server } => McpError::Terminated {
                    server: server.clone(),
                },
                other => McpError::transport(&self.label, other.to_string()),
            }));
        }
    }
}
