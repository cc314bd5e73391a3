//! Socket.IO client over `tokio-tungstenite`.
//!
//! A background task owns the WebSocket. It performs the Engine.IO and
//! Socket.IO handshakes, answers heartbeats, forwards server events to the
//! listener set and writes queued outbound frames. After an unexpected close
//! it waits `reconnection_delay` and tries again, giving up once
//! `reconnection_attempts` consecutive retries have failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use herald_core::TransportError;

use crate::config::TransportConfig;
use crate::listeners::{Listener, ListenerSet, Subscription};
use crate::packet::{self, EnginePacket, Handshake, SocketPacket};
use crate::transport::{Transport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLIENT_DISCONNECT: &str = "io client disconnect";
const SERVER_DISCONNECT: &str = "io server disconnect";
const TRANSPORT_CLOSE: &str = "transport close";
const TRANSPORT_ERROR: &str = "transport error";
const PING_TIMEOUT: &str = "ping timeout";

/// Production [`Transport`] speaking Socket.IO v5 over WebSocket.
pub struct SocketTransport {
    config: TransportConfig,
    listeners: ListenerSet<TransportEvent>,
    connected: Arc<AtomicBool>,
    active: Mutex<Option<ActiveConnection>>,
}

struct ActiveConnection {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl ActiveConnection {
    fn shutdown(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

impl SocketTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            listeners: ListenerSet::new(),
            connected: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
        }
    }

    /// Emit `Close` if a connection was open.
    fn mark_closed(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.listeners.dispatch(&TransportEvent::Close {
                reason: reason.to_string(),
            });
        }
    }
}

impl Transport for SocketTransport {
    fn connect(&self) {
        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            debug!("replacing existing connection");
            previous.shutdown();
            self.mark_closed(CLIENT_DISCONNECT);
        }

        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let worker = ConnectionWorker {
            config: self.config.clone(),
            listeners: self.listeners.clone(),
            connected: Arc::clone(&self.connected),
        };
        let task = tokio::spawn(worker.run(outbound_rx, cancel.clone()));

        let raced = self.active.lock().replace(ActiveConnection {
            cancel,
            outbound,
            task,
        });
        if let Some(raced) = raced {
            raced.shutdown();
        }
    }

    fn disconnect(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            info!("disconnecting");
            active.shutdown();
        }
        self.mark_closed(CLIENT_DISCONNECT);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let frame = packet::event_frame(event, &payload);
        let active = self.active.lock();
        let active = active.as_ref().ok_or(TransportError::NotConnected)?;
        trace!(event, "emit");
        active
            .outbound
            .send(frame)
            .map_err(|_| TransportError::NotConnected)
    }

    fn listen(&self, listener: Listener<TransportEvent>) -> Subscription {
        self.listeners.add(listener)
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.shutdown();
        }
    }
}

/// How a live connection ended.
enum Ended {
    Cancelled,
    Closed { reason: &'static str, reconnect: bool },
}

impl Ended {
    fn closed(reason: &'static str) -> Self {
        Self::Closed {
            reason,
            reconnect: true,
        }
    }
}

struct ConnectionWorker {
    config: TransportConfig,
    listeners: ListenerSet<TransportEvent>,
    connected: Arc<AtomicBool>,
}

impl ConnectionWorker {
    async fn run(self, mut outbound: mpsc::UnboundedReceiver<String>, cancel: CancellationToken) {
        let url = match self.config.socket_url() {
            Ok(url) => url,
            Err(error) => {
                error!(error = %error, "cannot build socket url");
                self.listeners.dispatch(&TransportEvent::Error { error });
                return;
            }
        };

        let mut failures: u32 = 0;
        loop {
            debug!(url = %url, attempt = failures + 1, "connecting");
            let attempt = tokio::select! {
                () = cancel.cancelled() => return,
                result = open_socket(&url, self.config.connect_timeout) => result,
            };

            match attempt {
                Ok((ws, handshake)) => {
                    failures = 0;
                    // Frames queued for a previous connection are stale.
                    while outbound.try_recv().is_ok() {}
                    self.connected.store(true, Ordering::SeqCst);
                    info!(sid = %handshake.sid, "socket connected");
                    self.listeners.dispatch(&TransportEvent::Open);

                    let ended = self.pump(ws, &handshake, &mut outbound, &cancel).await;
                    let was_connected = self.connected.swap(false, Ordering::SeqCst);
                    match ended {
                        Ended::Cancelled => return,
                        Ended::Closed { reason, reconnect } => {
                            info!(reason, reconnect, "socket closed");
                            if was_connected {
                                self.listeners.dispatch(&TransportEvent::Close {
                                    reason: reason.to_string(),
                                });
                            }
                            if !reconnect {
                                return;
                            }
                        }
                    }
                }
                Err(error) => {
                    failures += 1;
                    warn!(
                        attempt = failures,
                        error_kind = error.error_kind(),
                        error = %error,
                        "socket connect failed"
                    );
                    self.listeners.dispatch(&TransportEvent::Error { error });
                    if failures > self.config.reconnection_attempts {
                        let error = TransportError::RetriesExhausted { attempts: failures };
                        error!(attempts = failures, "giving up on reconnection");
                        self.listeners.dispatch(&TransportEvent::Error { error });
                        return;
                    }
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.config.reconnection_delay) => {}
            }
        }
    }

    /// Drive one open connection until it ends.
    async fn pump(
        &self,
        ws: WsStream,
        handshake: &Handshake,
        outbound: &mut mpsc::UnboundedReceiver<String>,
        cancel: &CancellationToken,
    ) -> Ended {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let liveness = handshake.liveness();
        let deadline = tokio::time::sleep(liveness);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = ws_tx.send(text(SocketPacket::Disconnect.to_frame())).await;
                    let _ = ws_tx.close().await;
                    return Ended::Cancelled;
                }
                () = &mut deadline => {
                    warn!(timeout = ?liveness, "no heartbeat from server");
                    return Ended::closed(PING_TIMEOUT);
                }
                frame = outbound.recv() => {
                    let Some(frame) = frame else { return Ended::Cancelled };
                    if let Err(e) = ws_tx.send(text(frame)).await {
                        warn!(error = %e, "socket write failed");
                        return Ended::closed(TRANSPORT_ERROR);
                    }
                }
                msg = ws_rx.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            warn!(error = %e, "socket read failed");
                            return Ended::closed(TRANSPORT_ERROR);
                        }
                        None => return Ended::closed(TRANSPORT_CLOSE),
                    };
                    let frame = match msg {
                        Message::Text(frame) => frame,
                        Message::Close(_) => return Ended::closed(TRANSPORT_CLOSE),
                        _ => continue,
                    };
                    deadline.as_mut().reset(tokio::time::Instant::now() + liveness);

                    match EnginePacket::decode(&frame) {
                        Ok(EnginePacket::Ping(data)) => {
                            if ws_tx.send(text(EnginePacket::Pong(data).encode())).await.is_err() {
                                return Ended::closed(TRANSPORT_ERROR);
                            }
                        }
                        Ok(EnginePacket::Message(body)) => {
                            if let Some(ended) = self.on_socket_packet(&body) {
                                return ended;
                            }
                        }
                        Ok(EnginePacket::Close) => return Ended::closed(TRANSPORT_CLOSE),
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "ignoring undecodable frame"),
                    }
                }
            }
        }
    }

    fn on_socket_packet(&self, body: &str) -> Option<Ended> {
        match SocketPacket::decode(body) {
            Ok(SocketPacket::Event { name, args, .. }) => {
                let payload = args.into_iter().next().unwrap_or(Value::Null);
                trace!(event = %name, "server event");
                self.listeners.dispatch(&TransportEvent::Message {
                    event: name,
                    payload,
                });
                None
            }
            Ok(SocketPacket::Disconnect) => Some(Ended::Closed {
                reason: SERVER_DISCONNECT,
                reconnect: false,
            }),
            Ok(other) => {
                trace!(packet = ?other, "ignoring socket packet");
                None
            }
            Err(e) => {
                debug!(error = %e, "ignoring undecodable socket packet");
                None
            }
        }
    }
}

fn text(frame: String) -> Message {
    Message::Text(frame.into())
}

/// Open the WebSocket and complete both handshakes within `timeout`.
async fn open_socket(
    url: &str,
    timeout: Duration,
) -> Result<(WsStream, Handshake), TransportError> {
    tokio::time::timeout(timeout, handshake(url))
        .await
        .map_err(|_| TransportError::ConnectTimeout(timeout))?
}

async fn handshake(url: &str) -> Result<(WsStream, Handshake), TransportError> {
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    let opened = loop {
        let frame = next_text(&mut ws).await?;
        match EnginePacket::decode(&frame) {
            Ok(EnginePacket::Open(opened)) => break opened,
            Ok(_) => continue,
            Err(e) => return Err(TransportError::Handshake(e.to_string())),
        }
    };

    ws.send(text(SocketPacket::Connect(None).to_frame()))
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    loop {
        let frame = next_text(&mut ws).await?;
        match EnginePacket::decode(&frame) {
            Ok(EnginePacket::Message(body)) => match SocketPacket::decode(&body) {
                Ok(SocketPacket::Connect(_)) => return Ok((ws, opened)),
                Ok(SocketPacket::ConnectError(data)) => {
                    return Err(TransportError::Rejected(
                        SocketPacket::connect_error_message(&data),
                    ))
                }
                _ => continue,
            },
            Ok(EnginePacket::Ping(data)) => {
                ws.send(text(EnginePacket::Pong(data).encode()))
                    .await
                    .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            }
            Ok(EnginePacket::Close) => {
                return Err(TransportError::Handshake("server closed during handshake".into()))
            }
            _ => continue,
        }
    }
}

async fn next_text(ws: &mut WsStream) -> Result<String, TransportError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(frame))) => return Ok(frame.to_string()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(TransportError::Handshake(
                    "connection closed during handshake".into(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::ConnectFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_before_connect_fails() {
        let transport = SocketTransport::new(TransportConfig::new("http://127.0.0.1:9"));
        assert!(!transport.is_connected());
        assert_eq!(
            transport.emit("join-session", Value::String("s1".into())),
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_silent() {
        let transport = SocketTransport::new(TransportConfig::new("http://127.0.0.1:9"));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = transport.listen(Arc::new(move |e: &TransportEvent| sink.lock().push(e.clone())));

        transport.disconnect();
        transport.disconnect();

        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn invalid_url_reports_error() {
        let transport = SocketTransport::new(TransportConfig::new("not a url"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = transport.listen(Arc::new(move |e: &TransportEvent| {
            let _ = tx.send(e.clone());
        }));

        transport.connect();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            TransportEvent::Error {
                error: TransportError::ConnectFailed(_)
            }
        ));
    }
}
