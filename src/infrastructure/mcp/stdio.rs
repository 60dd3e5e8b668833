use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::{DecodeErrorPolicy, ServerConfig};
use super::error::McpError;
use super::{McpSession, RemoteToolInfo, initialize_params, parse_tool_list};

/// JSON-RPC 2.0 session over the stdin/stdout of a spawned server process.
///
/// The child is spawned with `kill_on_drop`, so the process cannot outlive
/// the session even when [`McpSession::close`] is skipped.
#[derive(Debug)]
pub struct StdioSession {
    inner: Arc<SessionInner>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct SessionInner {
    server: ServerConfig,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    child: AsyncMutex<Option<Child>>,
    pending: AsyncMutex<HashMap<String, oneshot::Sender<Result<Value, McpError>>>>,
    id_counter: AtomicU64,
}

impl StdioSession {
    /// Spawns the configured process and runs the initialize handshake.
    /// The process is torn down again if the handshake fails.
    pub async fn open(server: ServerConfig) -> Result<Self, McpError> {
        let mut command = Command::new(&server.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if !server.args.is_empty() {
            command.args(&server.args);
        }
        for (key, value) in &server.env {
            command.env(key, value);
        }
        if let Some(dir) = &server.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| McpError::Spawn {
            server: server.name.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            McpError::transport(&server.name, "failed to capture server stdin")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            McpError::transport(&server.name, "failed to capture server stdout")
        })?;

        let inner = Arc::new(SessionInner {
            server,
            writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
            child: AsyncMutex::new(Some(child)),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
        });

        let reader_inner = Arc::clone(&inner);
        let reader = tokio::spawn(async move {
            reader_inner.reader_loop(stdout).await;
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
impl McpSession for StdioSession {
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
        self.inner.shutdown().await;
    }
}

impl SessionInner {
    async fn initialize(self: &Arc<Self>) -> Result<(), McpError> {
        let result = self
            .send_request("initialize", initialize_params())
            .await?;
        if let Some(info) = result.get("serverInfo") {
            debug!(server = %self.server.name, server_info = %info, "MCP server initialized");
        }
        self.send_notification("notifications/initialized", json!({}))
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
        if let Err(err) = self.write_message(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(McpError::Cancelled {
                server: self.server.name.clone(),
            }),
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        self.write_message(&payload).await
    }

    async fn send_response(&self, id: Value, result: Value) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result
        });
        self.write_message(&payload).await
    }

    async fn send_error(&self, id: Value, code: i64, message: String) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        });
        self.write_message(&payload).await
    }

    async fn write_message(&self, message: &Value) -> Result<(), McpError> {
        let encoded = serde_json::to_string(message).map_err(|source| McpError::InvalidJson {
            server: self.server.name.clone(),
            source,
        })?;

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| McpError::Terminated {
                server: self.server.name.clone(),
            })?;
        let io_err = |source: std::io::Error| McpError::Transport {
            server: self.server.name.clone(),
            message: source.to_string(),
        };
        stream.write_all(encoded.as_bytes()).await.map_err(io_err)?;
        stream.write_all(b"\n").await.map_err(io_err)?;
        stream.flush().await.map_err(io_err)?;
        Ok(())
    }

    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut reader = BufReader::new(stdout);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(server = %self.server.name, %err, "failed to read from MCP server");
                    break;
                }
            }

            let line = match decode_line(&buffer, self.server.decode_errors) {
                Ok(line) => line,
                Err(message) => {
                    // Strict policy: a broken byte stream fails the session.
                    warn!(server = %self.server.name, message, "undecodable output from MCP server");
                    self.fail_pending(McpError::decode(&self.server.name, message))
                        .await;
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => self.route_inbound(value).await,
                Err(source) => {
                    warn!(
                        server = %self.server.name,
                        line = trimmed,
                        %source,
                        "received invalid JSON from MCP server"
                    );
                }
            }
        }

        self.fail_pending(McpError::Terminated {
            server: self.server.name.clone(),
        })
        .await;
    }

    async fn route_inbound(&self, value: Value) {
        match (value.get("id").cloned(), value.get("method").is_some()) {
            (Some(id), true) => self.handle_server_request(id, &value).await,
            (Some(id), false) => self.handle_response(id, value).await,
            (None, true) => {
                let method = value.get("method").and_then(Value::as_str).unwrap_or("");
                debug!(server = %self.server.name, method, "notification from MCP server");
            }
            (None, false) => {}
        }
    }

    async fn handle_response(&self, id: Value, value: Value) {
        let key = match &id {
            Value::String(text) => text.clone(),
            Value::Number(num) => num.to_string(),
            _ => return,
        };

        let responder = {
            let mut pending = self.pending.lock().await;
            pending.remove(&key)
        };
        let Some(sender) = responder else {
            debug!(server = %self.server.name, response_id = key, "response for unknown request");
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
                server: self.server.name.clone(),
                code,
                message,
            })
        } else {
            Ok(value)
        };
        let _ = sender.send(outcome);
    }

    async fn handle_server_request(&self, id: Value, value: &Value) {
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let result = match method {
            "ping" => self.send_response(id, json!({})).await,
            other => {
                warn!(server = %self.server.name, method = other, "server sent unsupported request");
                self.send_error(
                    id,
                    -32601,
                    format!("client does not implement method '{other}'"),
                )
                .await
            }
        };
        if let Err(err) = result {
            warn!(server = %self.server.name, %err, "failed to answer server request");
        }
    }

    async fn fail_pending(&self, error: McpError) {
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(clone_for_pending(&error, &self.server.name)));
        }
    }

    async fn shutdown(&self) {
        {
            let mut writer = self.writer.lock().await;
            writer.take();
        }
        {
            let mut child = self.child.lock().await;
            if let Some(mut running) = child.take() {
                if let Err(err) = running.kill().await {
                    debug!(
                        server = %self.server.name,
                        %err,
                        "failed to kill MCP server process (may have already exited)"
                    );
                }
                let _ = running.wait().await;
            }
        }
        self.fail_pending(McpError::Terminated {
            server: self.server.name.clone(),
        })
        .await;
    }
}

// McpError is not Clone (it can hold io/serde sources), so pending
// requests get a structural copy of the terminal error.
fn clone_for_pending(error: &McpError, server: &str) -> McpError {
    match error {
        McpError::Decode { message, .. } => McpError::decode(server, message.clone()),
        _ => McpError::Terminated {
            server: server.to_string(),
        },
    }
}

fn decode_line(bytes: &[u8], policy: DecodeErrorPolicy) -> Result<String, String> {
    match policy {
        DecodeErrorPolicy::Strict => std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|err| err.to_string()),
        DecodeErrorPolicy::Replace => Ok(String::from_utf8_lossy(bytes).into_owned()),
        DecodeErrorPolicy::Ignore => Ok(decode_skipping_invalid(bytes)),
    }
}

// Drops only invalid byte sequences; valid characters, including a literal
// U+FFFD, pass through untouched.
fn decode_skipping_invalid(mut bytes: &[u8]) -> String {
    let mut decoded = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(tail) => {
                decoded.push_str(tail);
                return decoded;
            }
            Err(err) => {
                let (valid, rest) = bytes.split_at(err.valid_up_to());
                if let Ok(prefix) = std::str::from_utf8(valid) {
                    decoded.push_str(prefix);
                }
                // error_len is None for a sequence truncated at the end.
                let Some(skip) = err.error_len() else {
                    return decoded;
                };
                bytes = &rest[skip..];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    const BROKEN: &[u8] = b"ok \xff end";

    // Canned JSON-RPC responses keyed off the request order: initialize,
    // the initialized notification (no reply), tools/list, tools/call.
    const SCRIPTED_SERVER: &str = r#"
n=0
while IFS= read -r line; do
  n=$((n+1))
  case $n in
    1) printf '{"jsonrpc":"2.0","id":"req-1","result":{"serverInfo":{"name":"scripted"}}}\n';;
    3) printf '{"jsonrpc":"2.0","id":"req-2","result":{"tools":[{"name":"echo","description":"Echoes its input","inputSchema":{"type":"object"}}]}}\n';;
    4) printf '{"jsonrpc":"2.0","id":"req-3","result":{"content":[{"type":"text","text":"pong"}]}}\n';;
  esac
done
"#;

    fn shell_server(script: &str) -> ServerConfig {
        ServerConfig {
            name: "scripted".to_string(),
            command: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
            cwd: None,
            encoding: "utf-8".to_string(),
            decode_errors: DecodeErrorPolicy::Strict,
        }
    }

    #[tokio::test]
    async fn session_round_trips_against_a_scripted_server() {
        let session = StdioSession::open(shell_server(SCRIPTED_SERVER))
            .await
            .expect("handshake succeeds");

        let tools = session.list_tools().await.expect("tools/list succeeds");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].description.as_deref(), Some("Echoes its input"));

        let result = session
            .call_tool("echo", json!({ "text": "ping" }))
            .await
            .expect("tools/call succeeds");
        assert_eq!(result["content"][0]["text"], json!("pong"));

        session.close().await;
        let err = session
            .call_tool("echo", json!({}))
            .await
            .expect_err("closed session rejects calls");
        assert!(matches!(err, McpError::Terminated { .. }));
    }

    #[tokio::test]
    async fn open_fails_when_the_server_exits_before_the_handshake() {
        let err = StdioSession::open(shell_server("exit 0"))
            .await
            .expect_err("handshake cannot complete");
        assert!(matches!(
            err,
            McpError::Terminated { .. } | McpError::Transport { .. }
        ));
    }

    #[tokio::test]
    async fn open_fails_for_a_missing_command() {
        let mut server = shell_server("");
        server.command = PathBuf::from("/nonexistent/mcp-server");
        let err = StdioSession::open(server)
            .await
            .expect_err("spawn must fail");
        assert!(matches!(err, McpError::Spawn { .. }));
    }

    #[test]
    fn strict_decoding_fails_on_invalid_bytes() {
        assert_eq!(
            decode_line(b"plain text", DecodeErrorPolicy::Strict).as_deref(),
            Ok("plain text")
        );
        assert!(decode_line(BROKEN, DecodeErrorPolicy::Strict).is_err());
    }

    #[test]
    fn replace_decoding_substitutes_invalid_bytes() {
        assert_eq!(
            decode_line(BROKEN, DecodeErrorPolicy::Replace).as_deref(),
            Ok("ok \u{FFFD} end")
        );
    }

    #[test]
    fn ignore_decoding_drops_invalid_bytes() {
        assert_eq!(
            decode_line(BROKEN, DecodeErrorPolicy::Ignore).as_deref(),
            Ok("ok  end")
        );
        // Truncated multi-byte sequence at the end of the line.
        assert_eq!(
            decode_line(b"ok \xe2\x82", DecodeErrorPolicy::Ignore).as_deref(),
            Ok("ok ")
        );
    }

    #[test]
    fn ignore_decoding_keeps_a_literal_replacement_character() {
        let encoded = "ok \u{FFFD} end".as_bytes();
        assert_eq!(
            decode_line(encoded, DecodeErrorPolicy::Ignore).as_deref(),
            Ok("ok \u{FFFD} end")
        );
        // Invalid bytes next to an encoded U+FFFD: only the former go.
        assert_eq!(
            decode_line(b"a\xff\xef\xbf\xbdb", DecodeErrorPolicy::Ignore).as_deref(),
            Ok("a\u{FFFD}b")
        );
    }
}
