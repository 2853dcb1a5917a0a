use crate::transport::{ReadStream, WriteStream};
use chorus_protocol::*;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Response carried neither a result nor an error")]
    EmptyResponse,
}

type ResponseSender = oneshot::Sender<Result<JsonRpcResponse, SessionError>>;

struct OutgoingMessage {
    message: JsonRpcMessage,
    response_tx: Option<ResponseSender>,
}

/// JSON-RPC request/response correlation over one transport. A background task owns
/// both streams; callers only ever talk to it through a channel.
pub struct Session {
    request_tx: mpsc::Sender<OutgoingMessage>,
    abandon_tx: mpsc::UnboundedSender<u64>,
    id_counter: AtomicU64,
    is_closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
    background_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(read_stream: ReadStream, write_stream: WriteStream) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<OutgoingMessage>(32);
        let (abandon_tx, abandon_rx) = mpsc::unbounded_channel();
        let is_closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_session(
            read_stream,
            write_stream,
            request_rx,
            abandon_rx,
            is_closed.clone(),
            shutdown.clone(),
        ));

        Self {
            request_tx,
            abandon_tx,
            id_counter: AtomicU64::new(1),
            is_closed,
            shutdown,
            background_task: Mutex::new(Some(task)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }

    /// Stops the background task. Requests still in flight are told they were cancelled.
    pub async fn shutdown(&self) {
        self.is_closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        if let Some(task) = self.background_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
    }

    async fn send_message(
        &self,
        message: JsonRpcMessage,
        response_tx: Option<ResponseSender>,
    ) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.request_tx
            .send(OutgoingMessage {
                message,
                response_tx,
            })
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, SessionError> {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let (response_tx, response_rx) = oneshot::channel();
        self.send_message(JsonRpcMessage::Request(request), Some(response_tx))
            .await?;
        let mut guard = AbandonGuard {
            id,
            abandon_tx: &self.abandon_tx,
            armed: true,
        };
        let response = response_rx.await.map_err(|_| SessionError::Closed);
        guard.armed = false;
        let response = response??;

        match (response.error, response.result) {
            (Some(error), _) => Err(SessionError::Rpc {
                code: error.code,
                message: error.message,
            }),
            (_, Some(result)) => Ok(serde_json::from_value(result)?),
            (None, None) => Err(SessionError::EmptyResponse),
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        let notification = JsonRpcNotification::new(method, params);
        self.send_message(JsonRpcMessage::Notification(notification), None)
            .await
    }

    pub async fn initialize(
        &self,
        client_info: Implementation,
    ) -> Result<InitializeResult, SessionError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        };
        let result: InitializeResult = self
            .rpc_call(methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;
        self.notify(methods::INITIALIZED, None).await?;
        Ok(result)
    }

    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult, SessionError> {
        let params = match cursor {
            Some(cursor) => json!({ "cursor": cursor }),
            None => json!({}),
        };
        self.rpc_call(methods::TOOLS_LIST, Some(params)).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, SessionError> {
        self.rpc_call(
            methods::TOOLS_CALL,
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Tells the session task to forget a request whose caller stopped waiting.
struct AbandonGuard<'a> {
    id: u64,
    abandon_tx: &'a mpsc::UnboundedSender<u64>,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.abandon_tx.send(self.id);
        }
    }
}

fn cancelled_notification(id: u64, reason: &str) -> JsonRpcMessage {
    JsonRpcMessage::Notification(JsonRpcNotification::new(
        methods::CANCELLED,
        Some(json!({ "requestId": id, "reason": reason })),
    ))
}

async fn run_session(
    mut read_stream: ReadStream,
    write_stream: WriteStream,
    mut request_rx: mpsc::Receiver<OutgoingMessage>,
    mut abandon_rx: mpsc::UnboundedReceiver<u64>,
    is_closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let mut pending: HashMap<u64, ResponseSender> = HashMap::new();

    let failure = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                for id in pending.keys() {
                    let _ = write_stream.try_send(cancelled_notification(*id, "session shutting down"));
                }
                break SessionError::Closed;
            }

            outgoing = request_rx.recv() => {
                let Some(outgoing) = outgoing else {
                    break SessionError::Closed;
                };
                let request_id = match &outgoing.message {
                    JsonRpcMessage::Request(request) => Some(request.id),
                    _ => None,
                };
                if write_stream.send(outgoing.message).await.is_err() {
                    debug!("Write stream closed");
                    if let Some(tx) = outgoing.response_tx {
                        let _ = tx.send(Err(SessionError::Transport("write stream closed".into())));
                    }
                    break SessionError::Transport("write stream closed".into());
                }
                if let (Some(id), Some(tx)) = (request_id, outgoing.response_tx) {
                    pending.insert(id, tx);
                }
            }

            Some(id) = abandon_rx.recv() => {
                if pending.remove(&id).is_some() {
                    debug!("Request {} abandoned by caller", id);
                    let _ = write_stream
                        .send(cancelled_notification(id, "request abandoned"))
                        .await;
                }
            }

            incoming = read_stream.recv() => {
                match incoming {
                    Some(Ok(JsonRpcMessage::Response(response))) => {
                        match pending.remove(&response.id) {
                            Some(tx) => {
                                let _ = tx.send(Ok(response));
                            }
                            None => debug!("Dropping response for unknown request {}", response.id),
                        }
                    }
                    Some(Ok(JsonRpcMessage::Request(request))) => {
                        // Providers may ping us; everything else is unsupported
                        let reply = if request.method == methods::PING {
                            JsonRpcResponse::success(request.id, json!({}))
                        } else {
                            JsonRpcResponse::failure(request.id, ErrorData {
                                code: METHOD_NOT_FOUND,
                                message: format!("Method not supported: {}", request.method),
                                data: None,
                            })
                        };
                        let _ = write_stream.send(JsonRpcMessage::Response(reply)).await;
                    }
                    Some(Ok(JsonRpcMessage::Notification(notification))) => {
                        debug!(method = %notification.method, "provider notification");
                    }
                    Some(Err(e)) => {
                        warn!("Transport error: {}", e);
                        break SessionError::Transport(e.to_string());
                    }
                    None => break SessionError::Closed,
                }
            }
        }
    };

    is_closed.store(true, Ordering::SeqCst);
    for (_, tx) in pending.drain() {
        let err = match &failure {
            SessionError::Transport(message) => SessionError::Transport(message.clone()),
            _ => SessionError::Closed,
        };
        let _ = tx.send(Err(err));
    }
}
