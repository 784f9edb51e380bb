use crate::transport::{ContextInfo, PageInfo, Transport, TransportError, TransportHandle};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type PendingResponses = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Default per-command response timeout
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens browser-level CDP sessions: `/json/version` for the debugger URL,
/// then a raw WebSocket.
#[derive(Clone)]
pub struct CdpTransport {
    http: reqwest::Client,
    command_timeout: Duration,
}

impl CdpTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn debugger_url(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let url = format!("http://{}:{}/json/version", host, port);
        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Connect(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(TransportError::Connect(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let version: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("Bad /json/version body: {}", e)))?;

        version
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::Protocol("No webSocketDebuggerUrl in /json/version".to_string())
            })
    }
}

impl Default for CdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for CdpTransport {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        let ws_url = self.debugger_url(host, port, timeout).await?;
        tracing::debug!("Connecting to browser WebSocket: {}", ws_url);

        let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(ws_url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::Connect(format!("WebSocket connect failed: {}", e)))?;

        let handle = CdpHandle::start(port, ws_stream, self.command_timeout);
        Ok(Arc::new(handle))
    }
}

/// One browser-level CDP WebSocket plus its response router.
pub struct CdpHandle {
    port: u16,
    ws_tx: tokio::sync::Mutex<WsSink>,
    responses: PendingResponses,
    msg_id: AtomicU64,
    /// target_id -> flattened session id
    sessions: Mutex<HashMap<String, String>>,
    /// Set by the reader when the socket goes away, or by `close()`
    closed: Arc<AtomicBool>,
    close_requested: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
    command_timeout: Duration,
}

impl CdpHandle {
    fn start(
        port: u16,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        command_timeout: Duration,
    ) -> Self {
        let (tx, mut rx) = ws_stream.split();
        let responses: PendingResponses = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_responses = Arc::clone(&responses);
        let reader_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            while let Some(msg) = rx.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        tracing::trace!(
                            "WS received on {}: {}",
                            port,
                            text.chars().take(100).collect::<String>()
                        );
                        let Ok(json) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        // Events carry no id; only command responses are routed.
                        if let Some(id) = json.get("id").and_then(|i| i.as_u64()) {
                            if let Some(sender) = reader_responses.lock().remove(&id) {
                                let _ = sender.send(json);
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::debug!("WebSocket on port {} closed by peer", port);
                        break;
                    }
                    Err(e) => {
                        tracing::debug!("WebSocket error on port {}: {:?}", port, e);
                        break;
                    }
                    _ => {}
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            // Dropping the senders wakes every waiter with a closed channel.
            reader_responses.lock().clear();
        });

        Self {
            port,
            ws_tx: tokio::sync::Mutex::new(tx),
            responses,
            msg_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            closed,
            close_requested: AtomicBool::new(false),
            reader: Mutex::new(Some(reader)),
            command_timeout,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a CDP command and wait for its `result`.
    async fn send_command(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let id = self.msg_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.responses.lock().insert(id, tx);

        let mut command = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(session_id) = session_id {
            command["sessionId"] = json!(session_id);
        }

        let sent = self
            .ws_tx
            .lock()
            .await
            .send(WsMessage::Text(command.to_string()))
            .await;
        if let Err(e) = sent {
            self.responses.lock().remove(&id);
            return Err(TransportError::Protocol(format!(
                "Failed to send {}: {}",
                method, e
            )));
        }

        let response = match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(TransportError::Closed),
            Err(_) => {
                self.responses.lock().remove(&id);
                return Err(TransportError::Timeout(self.command_timeout));
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(TransportError::Protocol(format!("{}: {}", method, message)));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn page_targets(&self) -> Result<Vec<Value>, TransportError> {
        let result = self.send_command("Target.getTargets", json!({}), None).await?;
        let targets = result
            .get("targetInfos")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(targets
            .into_iter()
            .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
            .collect())
    }

    /// Attach to `page` (flattened) once and reuse the session id.
    async fn session_for(&self, page: &PageInfo) -> Result<String, TransportError> {
        if let Some(session_id) = self.sessions.lock().get(&page.target_id) {
            return Ok(session_id.clone());
        }

        let result = self
            .send_command(
                "Target.attachToTarget",
                json!({ "targetId": page.target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = result
            .get("sessionId")
            .and_then(|s| s.as_str())
            .ok_or_else(|| TransportError::Protocol("attachToTarget returned no sessionId".into()))?
            .to_string();

        self.sessions
            .lock()
            .insert(page.target_id.clone(), session_id.clone());
        Ok(session_id)
    }
}

fn context_id_of(target: &Value) -> String {
    target
        .get("browserContextId")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn page_from_target(target: &Value) -> Option<PageInfo> {
    Some(PageInfo {
        target_id: target.get("targetId")?.as_str()?.to_string(),
        context_id: context_id_of(target),
        title: target
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        url: target
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

/// Group page targets by context, keeping first-seen order.
fn contexts_from_targets(targets: &[Value], extra_context_ids: &[String]) -> Vec<ContextInfo> {
    let mut contexts: Vec<ContextInfo> = Vec::new();
    for target in targets {
        let id = context_id_of(target);
        match contexts.iter_mut().find(|c| c.id == id) {
            Some(context) => context.page_count += 1,
            None => contexts.push(ContextInfo { id, page_count: 1 }),
        }
    }
    for id in extra_context_ids {
        if !contexts.iter().any(|c| &c.id == id) {
            contexts.push(ContextInfo {
                id: id.clone(),
                page_count: 0,
            });
        }
    }
    contexts
}

#[async_trait]
impl TransportHandle for CdpHandle {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>, TransportError> {
        let targets = self.page_targets().await?;

        // Non-default contexts with no pages are still live contexts.
        let extra: Vec<String> = match self
            .send_command("Target.getBrowserContexts", json!({}), None)
            .await
        {
            Ok(result) => result
                .get("browserContextIds")
                .and_then(|ids| ids.as_array())
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| id.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                tracing::trace!("getBrowserContexts unavailable on {}: {}", self.port, e);
                Vec::new()
            }
        };

        Ok(contexts_from_targets(&targets, &extra))
    }

    async fn list_active_pages(
        &self,
        context: &ContextInfo,
    ) -> Result<Vec<PageInfo>, TransportError> {
        let targets = self.page_targets().await?;
        Ok(targets
            .iter()
            .filter(|t| context_id_of(t) == context.id)
            .filter_map(page_from_target)
            .collect())
    }

    async fn probe(&self, page: &PageInfo) -> Result<(), TransportError> {
        self.evaluate(page, "document.readyState").await.map(|_| ())
    }

    async fn evaluate(
        &self,
        page: &PageInfo,
        expression: &str,
    ) -> Result<Value, TransportError> {
        let session_id = self.session_for(page).await?;
        let result = match self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                Some(&session_id),
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                // A stale session id is re-attached on the next call.
                self.sessions.lock().remove(&page.target_id);
                return Err(e);
            }
        };

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or("exception");
            return Err(TransportError::Protocol(format!(
                "Evaluation failed: {}",
                text
            )));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn close(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let peer_gone = self.closed.swap(true, Ordering::SeqCst);
        if !peer_gone {
            let _ = self.ws_tx.lock().await.send(WsMessage::Close(None)).await;
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.responses.lock().clear();
        self.sessions.lock().clear();
        tracing::debug!("Closed CDP WebSocket for port {}", self.port);
    }
}

impl Drop for CdpHandle {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, kind: &str, ctx: Option<&str>) -> Value {
        let mut t = json!({
            "targetId": id,
            "type": kind,
            "title": format!("title-{}", id),
            "url": "vscode-file://vscode-app/workbench.html",
        });
        if let Some(ctx) = ctx {
            t["browserContextId"] = json!(ctx);
        }
        t
    }

    #[test]
    fn test_contexts_group_in_first_seen_order() {
        let targets = vec![
            target("a", "page", Some("ctx-2")),
            target("b", "page", Some("ctx-1")),
            target("c", "page", Some("ctx-2")),
        ];
        let contexts = contexts_from_targets(&targets, &["ctx-3".to_string()]);
        assert_eq!(
            contexts,
            vec![
                ContextInfo { id: "ctx-2".into(), page_count: 2 },
                ContextInfo { id: "ctx-1".into(), page_count: 1 },
                ContextInfo { id: "ctx-3".into(), page_count: 0 },
            ]
        );
    }

    #[test]
    fn test_page_from_target_defaults_context() {
        let page = page_from_target(&target("t1", "page", None)).unwrap();
        assert_eq!(page.target_id, "t1");
        assert_eq!(page.context_id, "");
        assert_eq!(page.title, "title-t1");
    }

    #[test]
    fn test_page_from_target_requires_id() {
        assert!(page_from_target(&json!({ "type": "page" })).is_none());
    }

    #[tokio::test]
    async fn test_close_after_peer_hangup_clears_sessions() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.close(None).await;
        });

        let (ws_stream, _) = connect_async(format!("ws://127.0.0.1:{}", port))
            .await
            .unwrap();
        let handle = CdpHandle::start(port, ws_stream, Duration::from_secs(1));
        handle
            .sessions
            .lock()
            .insert("target-1".to_string(), "session-1".to_string());

        for _ in 0..100 {
            if handle.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_closed());

        handle.close().await;
        assert!(handle.sessions.lock().is_empty());
        assert!(handle.reader.lock().is_none());
        let _ = server.await;
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = CdpTransport::new();
        let result = transport
            .connect("127.0.0.1", port, Duration::from_millis(500))
            .await;
        assert!(matches!(
            result,
            Err(TransportError::Connect(_)) | Err(TransportError::Timeout(_))
        ));
    }
}
