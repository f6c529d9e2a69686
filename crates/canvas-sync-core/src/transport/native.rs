//! WebSocket transport for native platforms.
//!
//! Uses a background thread per link for non-blocking operation.

use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, connect};
use url::Url;

use super::{Connector, EventSender, Link, TransportEvent};
use crate::error::TransportError;

/// Read timeout on the socket; bounds the latency of queued sends.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands sent to the WebSocket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// Opens `ws://` and `wss://` links with tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, url: &str, events: EventSender) -> Result<Box<dyn Link>, TransportError> {
        let parsed_url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!(
                "Invalid WebSocket URL scheme: {}",
                parsed_url.scheme()
            )));
        }

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let url = url.to_string();
        let handle = thread::Builder::new()
            .name("canvas-sync-ws".to_string())
            .spawn(move || run_socket(url, cmd_rx, events))
            .map_err(|e| TransportError::ConnectFailed(format!("Failed to spawn socket thread: {}", e)))?;

        Ok(Box::new(NativeLink {
            cmd_tx: Some(cmd_tx),
            _thread: Some(handle),
        }))
    }
}

/// Handle to a socket thread.
struct NativeLink {
    cmd_tx: Option<Sender<WsCommand>>,
    _thread: Option<JoinHandle<()>>,
}

impl Link for NativeLink {
    fn send(&self, text: String) -> Result<(), TransportError> {
        match self.cmd_tx {
            Some(ref tx) => tx
                .send(WsCommand::Send(text))
                .map_err(|e| TransportError::SendFailed(e.to_string())),
            None => Err(TransportError::Closed),
        }
    }

    fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        // The thread exits on its own once it sees the command; not joined so
        // that closing never blocks on a pending connect.
        self._thread = None;
    }
}

impl Drop for NativeLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn preview(text: &str) -> &str {
    let mut end = text.len().min(100);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn run_socket(url: String, cmd_rx: Receiver<WsCommand>, events: EventSender) {
    log::info!("WebSocket thread: connecting to {}", url);

    let (mut socket, response) = match connect(url.as_str()) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("WebSocket connection failed: {}", e);
            let _ = events.send(TransportEvent::Error(format!("Connection failed: {}", e)));
            let _ = events.send(TransportEvent::Closed);
            return;
        }
    };
    log::info!("WebSocket connected, status: {}", response.status());

    {
        let stream = socket.get_mut();
        let tcp = match stream {
            MaybeTlsStream::Plain(tcp) => Some(&*tcp),
            MaybeTlsStream::Rustls(tls) => Some(&tls.sock),
            #[allow(unreachable_patterns)]
            _ => None,
        };
        match tcp {
            Some(tcp) => {
                let _ = tcp.set_read_timeout(Some(READ_POLL_INTERVAL));
                let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
            }
            None => log::debug!("Unknown stream type - using default timeout handling"),
        }
    }

    if events.send(TransportEvent::Open).is_err() {
        // Nobody is listening any more.
        let _ = socket.close(None);
        return;
    }

    'outer: loop {
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("WebSocket sending: {}", preview(&msg));
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::error!("WebSocket send error: {}", e);
                        let _ = events.send(TransportEvent::Error(format!("Send failed: {}", e)));
                        break 'outer;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    break 'outer;
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("WebSocket command channel disconnected");
                    let _ = socket.close(None);
                    break 'outer;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(txt)) => {
                log::debug!("WebSocket received: {}", preview(&txt));
                if events.send(TransportEvent::Message(txt)).is_err() {
                    let _ = socket.close(None);
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("WebSocket received close frame");
                break;
            }
            Ok(_) => {} // Ignore binary, pong
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                break;
            }
            Err(e) => {
                log::error!("WebSocket read error: {}", e);
                let _ = events.send(TransportEvent::Error(format!("Read failed: {}", e)));
                break;
            }
        }
    }

    log::info!("WebSocket thread exiting");
    let _ = events.send(TransportEvent::Closed);
}
