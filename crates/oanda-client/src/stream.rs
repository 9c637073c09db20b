//! Long-lived streaming sessions
//!
//! A [`StreamingSession`] owns one logical subscription to a newline-delimited
//! JSON feed. It runs as a background task: connect with a pooled credential,
//! read and frame lines, normalize keys, drop heartbeats, and push messages to
//! the caller through a channel. When the connection dies it reconnects with
//! backoff and a fresh credential selection; messages lost while disconnected
//! are gone, the session resumes from the live edge.
//!
//! Callers hold a [`PriceStream`], which ends the session when dropped.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use oanda_pool::CredentialPool;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::config::ClientConfig;
use crate::decode;
use crate::error::{Error, Result};
use crate::request::{PreparedRequest, RequestBuilder, RequestSpec};

/// Observable lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Dialing (or re-dialing) the feed.
    Connecting,
    /// Connected and delivering messages.
    Open,
    /// Connection lost; a reconnect is pending.
    Faulted,
    /// Ended cleanly because the caller dropped the handle.
    Closed,
    /// Gave up after exhausting the reconnect budget or hitting a
    /// permanent rejection.
    Failed,
}

/// Why a connect attempt did not produce a byte stream.
#[derive(Debug)]
pub enum ConnectError {
    /// The credential was rejected; rotate to another key.
    Auth { status: u16 },
    /// The subscription itself was rejected; reconnecting will not help.
    Rejected { status: u16, body: String },
    /// Network-level trouble; retry with backoff.
    Transient { cause: String },
}

pub type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, String>> + Send>>;

/// Opens one streaming connection.
///
/// Dyn-compatible so sessions can run against a scripted connector in tests.
pub trait StreamConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        request: &'a PreparedRequest,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<ByteStream, ConnectError>> + Send + 'a>>;
}

/// Production connector over `reqwest`. Built without a total-request timeout;
/// read inactivity is policed by the session instead, a healthy feed stays
/// open indefinitely.
pub struct HttpStreamConnector {
    client: reqwest::Client,
}

impl HttpStreamConnector {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("stream client construction failed: {e}")))?;
        Ok(Self { client })
    }
}

impl StreamConnector for HttpStreamConnector {
    fn connect<'a>(
        &'a self,
        request: &'a PreparedRequest,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<ByteStream, ConnectError>> + Send + 'a>>
    {
        Box::pin(async move {
            let response = self
                .client
                .request(request.method.clone(), request.url.clone())
                .headers(request.headers.clone())
                .send()
                .await
                .map_err(|e| ConnectError::Transient {
                    cause: e.to_string(),
                })?;

            let status = response.status().as_u16();
            match status {
                200..=299 => {
                    let stream = response.bytes_stream().map_err(|e| e.to_string());
                    Ok(Box::pin(stream) as ByteStream)
                }
                401 | 403 => Err(ConnectError::Auth { status }),
                400..=428 | 430..=499 => {
                    let body = response.text().await.unwrap_or_default();
                    Err(ConnectError::Rejected { status, body })
                }
                // 429 and 5xx are outages from this side's point of view.
                _ => Err(ConnectError::Transient {
                    cause: format!("connect rejected with status {status}"),
                }),
            }
        })
    }
}

/// One logical streaming subscription, ready to spawn.
pub struct StreamingSession {
    pool: Arc<CredentialPool>,
    builder: RequestBuilder,
    connector: Arc<dyn StreamConnector>,
    spec: RequestSpec,
    read_timeout: Duration,
    max_reconnects: u32,
    backoff_initial: Duration,
    backoff_ceiling: Duration,
}

enum PumpEnd {
    /// The caller dropped the [`PriceStream`].
    ReceiverGone,
    /// The connection died; reconnect.
    Fault(String),
}

impl StreamingSession {
    pub fn new(
        pool: Arc<CredentialPool>,
        builder: RequestBuilder,
        connector: Arc<dyn StreamConnector>,
        spec: RequestSpec,
        config: &ClientConfig,
    ) -> Self {
        Self {
            pool,
            builder,
            connector,
            spec,
            read_timeout: config.stream_read_timeout,
            max_reconnects: config.max_reconnects,
            backoff_initial: config.backoff_initial,
            backoff_ceiling: config.backoff_ceiling,
        }
    }

    /// Start the session in a background task and hand back the consumer side.
    pub fn spawn(self) -> PriceStream {
        let (sender, receiver) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let task = tokio::spawn(async move {
            self.run(sender, state_tx).await;
        });
        PriceStream {
            receiver,
            state: state_rx,
            task,
        }
    }

    #[instrument(skip_all, fields(path = %self.spec.path))]
    async fn run(self, sender: mpsc::Sender<Result<Value>>, state: watch::Sender<StreamState>) {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut backoff = BackoffPolicy::new(self.backoff_initial, self.backoff_ceiling);
        // Consecutive failed connection cycles; reset on every successful
        // connect so a stable feed never runs out of reconnects.
        let mut failed_cycles = 0u32;

        loop {
            let _ = state.send(StreamState::Connecting);
            let lease = match self.pool.acquire(&excluded) {
                Ok(lease) => lease,
                Err(oanda_pool::Error::PoolExhausted { total, .. }) => {
                    warn!(total, "no eligible credential for stream");
                    let _ = state.send(StreamState::Failed);
                    let _ = sender.send(Err(Error::PoolExhausted)).await;
                    return;
                }
            };
            let identity = lease.identity().to_string();
            let prepared = match self.builder.build(&self.spec, lease.secret()) {
                Ok(prepared) => prepared,
                Err(e) => {
                    let _ = state.send(StreamState::Failed);
                    let _ = sender.send(Err(e)).await;
                    return;
                }
            };

            debug!(identity = %identity, "opening stream connection");
            // The connector only bounds the TCP connect; a server that
            // accepts and then never sends headers must still fault.
            let connected = match tokio::time::timeout(
                self.read_timeout,
                self.connector.connect(&prepared),
            )
            .await
            {
                Ok(connected) => connected,
                Err(_) => Err(ConnectError::Transient {
                    cause: format!("no response within {}s", self.read_timeout.as_secs()),
                }),
            };
            let fault = match connected {
                Ok(byte_stream) => {
                    info!(identity = %identity, "stream connected");
                    let _ = state.send(StreamState::Open);
                    backoff.reset();
                    failed_cycles = 0;
                    let end = self.pump(byte_stream, &sender).await;
                    drop(lease);
                    match end {
                        PumpEnd::ReceiverGone => {
                            debug!("stream handle dropped, closing session");
                            let _ = state.send(StreamState::Closed);
                            return;
                        }
                        PumpEnd::Fault(cause) => cause,
                    }
                }
                Err(ConnectError::Auth { status }) => {
                    warn!(status, identity = %identity, "stream credential rejected, rotating");
                    excluded.insert(identity);
                    drop(lease);
                    // Credential rotation is immediate; it does not consume
                    // the reconnect budget or wait out a backoff.
                    continue;
                }
                Err(ConnectError::Rejected { status, body }) => {
                    warn!(status, "stream subscription rejected");
                    let _ = state.send(StreamState::Failed);
                    let _ = sender.send(Err(Error::RejectedByRemote { status, body })).await;
                    return;
                }
                Err(ConnectError::Transient { cause }) => {
                    drop(lease);
                    cause
                }
            };

            let _ = state.send(StreamState::Faulted);
            failed_cycles += 1;
            if failed_cycles > self.max_reconnects {
                warn!(
                    attempts = self.max_reconnects,
                    cause = %fault,
                    "stream reconnect budget exhausted"
                );
                let _ = state.send(StreamState::Failed);
                let _ = sender
                    .send(Err(Error::ReconnectExhausted {
                        attempts: self.max_reconnects,
                    }))
                    .await;
                return;
            }
            let delay = backoff.next_delay();
            info!(
                cause = %fault,
                delay_ms = delay.as_millis() as u64,
                "stream faulted, reconnect scheduled"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Read the connection until it dies or the consumer goes away.
    ///
    /// Frames on newlines, tolerating messages split across chunks and
    /// multiple messages per chunk. Heartbeats keep the read timeout fed but
    /// are never delivered.
    async fn pump(&self, mut bytes: ByteStream, sender: &mpsc::Sender<Result<Value>>) -> PumpEnd {
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let chunk = match tokio::time::timeout(self.read_timeout, bytes.next()).await {
                Err(_) => {
                    return PumpEnd::Fault(format!(
                        "no data for {}s",
                        self.read_timeout.as_secs()
                    ));
                }
                Ok(None) => return PumpEnd::Fault("connection closed by remote".into()),
                Ok(Some(Err(cause))) => return PumpEnd::Fault(cause),
                Ok(Some(Ok(chunk))) => chunk,
            };

            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let value: Value = match serde_json::from_str(line) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(error = %e, "skipping unparseable stream line");
                        continue;
                    }
                };
                let value = decode::normalize_keys(value);
                if is_heartbeat(&value) {
                    debug!("heartbeat");
                    continue;
                }
                if sender.send(Ok(value)).await.is_err() {
                    return PumpEnd::ReceiverGone;
                }
            }
        }
    }
}

fn is_heartbeat(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("HEARTBEAT")
}

/// Consumer side of a streaming session.
///
/// `next` yields messages until the session ends: a terminal error arrives as
/// one final `Err`, then the channel closes. Dropping the handle tears the
/// background task down.
pub struct PriceStream {
    receiver: mpsc::Receiver<Result<Value>>,
    state: watch::Receiver<StreamState>,
    task: JoinHandle<()>,
}

impl PriceStream {
    pub async fn next(&mut self) -> Option<Result<Value>> {
        self.receiver.recv().await
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// End the session immediately. Messages already delivered to the channel
    /// remain readable; nothing new arrives.
    pub fn close(&mut self) {
        self.task.abort();
        self.receiver.close();
    }
}

impl Drop for PriceStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
