use super::{Error, ReadStream, Transport, WriteStream};
use async_trait::async_trait;
use chorus_protocol::{ErrorData, JsonRpcMessage, JsonRpcResponse, INTERNAL_ERROR};
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use reqwest_eventsource::{Event, EventSource};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SseTransportParams {
    pub url: String,
    pub headers: HeaderMap,
}

/// Network-stream transport: frames arrive as `message` events on a long-lived
/// event stream and leave as POSTs to the endpoint announced by the server.
pub struct SseTransport {
    params: SseTransportParams,
    client: Client,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl SseTransport {
    pub fn new(params: SseTransportParams) -> Self {
        Self {
            params,
            client: Client::new(),
            shutdown: Mutex::new(None),
        }
    }
}

// POST with exponential backoff; only server errors and connect failures are retried
async fn send_with_retry(
    client: &Client,
    endpoint: &Url,
    headers: &HeaderMap,
    json: &serde_json::Value,
) -> Result<reqwest::Response, Error> {
    let retry_strategy = ExponentialBackoff::from_millis(100)
        .factor(2)
        .map(jitter)
        .take(3);

    Retry::spawn(retry_strategy, || async {
        let response = client
            .post(endpoint.clone())
            .headers(headers.clone())
            .json(json)
            .send()
            .await
            .map_err(|e| Error::HttpError {
                status: e.status().map(|s| s.as_u16()).unwrap_or_default(),
                message: e.to_string(),
            })?;

        if response.status().is_server_error() {
            return Err(Error::HttpError {
                status: response.status().as_u16(),
                message: "server error".to_string(),
            });
        }

        Ok(response)
    })
    .await
}

/// Resolves the announced endpoint against the stream URL and rejects foreign origins.
fn resolve_endpoint(base_url: &Url, endpoint: &str) -> Result<Url, Error> {
    let url = base_url.join(endpoint)?;
    if url.origin() != base_url.origin() {
        return Err(Error::OriginMismatch(url.to_string()));
    }
    Ok(url)
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self) -> Result<(ReadStream, WriteStream), Error> {
        info!("Connecting to event stream: {}", self.params.url);
        let base_url = Url::parse(&self.params.url)?;

        let request = self
            .client
            .get(base_url.clone())
            .headers(self.params.headers.clone());
        let mut event_source =
            EventSource::new(request).map_err(|e| Error::EventStream(e.to_string()))?;

        let token = CancellationToken::new();
        if let Some(previous) = self.shutdown.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let (tx_read, rx_read) = mpsc::channel(100);
        let (tx_write, mut rx_write) = mpsc::channel::<JsonRpcMessage>(100);
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Url>();

        let reader_token = token.clone();
        let to_reader = tx_read.clone();
        tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            loop {
                let event = tokio::select! {
                    _ = reader_token.cancelled() => break,
                    event = event_source.next() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                match event {
                    Ok(Event::Open) => debug!("Event stream opened"),
                    Ok(Event::Message(message)) => match message.event.as_str() {
                        "endpoint" => {
                            let url = match resolve_endpoint(&base_url, message.data.trim()) {
                                Ok(url) => url,
                                Err(e) => {
                                    error!("Rejected provider endpoint: {}", e);
                                    let _ = tx_read.send(Err(e)).await;
                                    break;
                                }
                            };
                            info!("Provider endpoint: {}", url);
                            match endpoint_tx.take() {
                                Some(sender) => {
                                    let _ = sender.send(url);
                                }
                                None => warn!("Ignoring repeated endpoint event"),
                            }
                        }
                        "message" => {
                            if endpoint_tx.is_some() {
                                warn!("Received message before endpoint");
                                continue;
                            }
                            match serde_json::from_str::<JsonRpcMessage>(&message.data) {
                                Ok(msg) => {
                                    debug!(frame = %message.data, "received from provider");
                                    if tx_read.send(Ok(msg)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("Skipping malformed frame ({}): {}", e, message.data),
                            }
                        }
                        other => debug!("Ignoring event type: {}", other),
                    },
                    Err(e) => {
                        error!("Event stream error: {}", e);
                        let _ = tx_read.send(Err(Error::EventStream(e.to_string()))).await;
                        break;
                    }
                }
            }
            // No reconnects at this layer
            event_source.close();
            debug!("Event stream reader ended");
        });

        let client = self.client.clone();
        let headers = self.params.headers.clone();
        tokio::spawn(async move {
            let endpoint = tokio::select! {
                _ = token.cancelled() => return,
                endpoint = endpoint_rx => match endpoint {
                    Ok(endpoint) => endpoint,
                    // Reader ended before the server announced where to post
                    Err(_) => return,
                },
            };

            loop {
                let message = tokio::select! {
                    _ = token.cancelled() => break,
                    message = rx_write.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                let json = match serde_json::to_value(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize frame: {}", e);
                        continue;
                    }
                };
                match send_with_retry(&client, &endpoint, &headers, &json).await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Frame delivered: {}", response.status());
                    }
                    Ok(response) => {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        error!("Provider rejected frame with {}: {}", status, text);
                        // Fail the request now rather than leaving it to time out
                        if let JsonRpcMessage::Request(request) = &message {
                            let reply = JsonRpcResponse::failure(
                                request.id,
                                ErrorData {
                                    code: INTERNAL_ERROR,
                                    message: format!("Provider rejected request with {}: {}", status, text),
                                    data: None,
                                },
                            );
                            if to_reader.send(Ok(JsonRpcMessage::Response(reply))).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Failed to deliver frame after retries: {}", e);
                        let _ = to_reader.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        Ok((rx_read, tx_write))
    }

    async fn close(&self) -> Result<(), Error> {
        if let Some(token) = self.shutdown.lock().await.take() {
            token.cancel();
        }
        Ok(())
    }
}
