use super::{Error, ReadStream, Transport, WriteStream};
use async_trait::async_trait;
use chorus_protocol::JsonRpcMessage;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct StdioTransportParams {
    pub command: String,
    pub args: Vec<String>,
    /// Layered over the inherited safe defaults; an entry here wins over a default.
    pub env: HashMap<String, String>,
}

/// Runs a provider as a child process and exchanges newline-delimited frames over its
/// stdin and stdout. Stderr is passed through so provider diagnostics stay visible.
pub struct StdioTransport {
    params: StdioTransportParams,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl StdioTransport {
    pub fn new(params: StdioTransportParams) -> Self {
        Self {
            params,
            shutdown: Mutex::new(None),
        }
    }

    fn default_environment() -> HashMap<String, String> {
        let default_vars: &[&str] = if cfg!(windows) {
            &["APPDATA", "PATH", "TEMP", "USERNAME"]
        } else {
            &["HOME", "PATH", "SHELL", "USER"]
        };

        std::env::vars()
            // Skip exported shell functions
            .filter(|(key, value)| default_vars.contains(&key.as_str()) && !value.starts_with("()"))
            .collect()
    }

    fn environment(&self) -> HashMap<String, String> {
        let mut env = Self::default_environment();
        env.extend(self.params.env.clone());
        env
    }

    async fn monitor_child(
        mut child: Child,
        tx_read: mpsc::Sender<Result<JsonRpcMessage, Error>>,
        token: CancellationToken,
    ) {
        tokio::select! {
            status = child.wait() => {
                let msg = match status {
                    Ok(status) if status.success() => format!("terminated normally with status: {}", status),
                    Ok(status) => format!("terminated with error status: {}", status),
                    Err(e) => format!("wait failed: {}", e),
                };
                info!("Provider process {}", msg);
                let _ = tx_read.send(Err(Error::ChildExited(msg))).await;
            }
            _ = token.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill provider process: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<(ReadStream, WriteStream), Error> {
        let mut child = Command::new(&self.params.command)
            .args(&self.params.args)
            .env_clear()
            .envs(self.environment())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                command: self.params.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(Error::NotConnected)?;
        let stdout = child.stdout.take().ok_or(Error::NotConnected)?;

        let token = CancellationToken::new();
        if let Some(previous) = self.shutdown.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let (tx_read, rx_read) = mpsc::channel(100);
        let (tx_write, mut rx_write) = mpsc::channel::<JsonRpcMessage>(100);

        tokio::spawn(Self::monitor_child(child, tx_read.clone(), token.clone()));

        let reader_token = token.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    _ = reader_token.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcMessage>(&line) {
                            Ok(msg) => {
                                debug!(frame = %line, "received from provider");
                                if tx_read.send(Ok(msg)).await.is_err() {
                                    break;
                                }
                            }
                            // Some providers print banners or logs to stdout
                            Err(e) => warn!("Skipping non-protocol output ({}): {}", e, line),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx_read.send(Err(Error::Io(e))).await;
                        break;
                    }
                }
            }
        });

        let mut stdin = stdin;
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = token.cancelled() => break,
                    message = rx_write.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                let mut json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize frame: {}", e);
                        continue;
                    }
                };
                json.push('\n');
                if stdin.write_all(json.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
                    break;
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
