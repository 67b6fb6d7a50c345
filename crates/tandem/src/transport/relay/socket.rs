use std::collections::VecDeque;

use futures::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Text(String),
    /// The socket closed without us asking.
    Closed { reason: String },
    /// An `open` attempt did not succeed.
    Failed { reason: String },
}

/// Text-frame socket to the relay server.
///
/// `open` starts a connection attempt and returns at once; the outcome
/// arrives as [`SocketEvent::Opened`] or [`SocketEvent::Failed`]. After an
/// explicit `close`, no further events are reported for that connection.
pub trait RelaySocket {
    fn open(&mut self, url: &str) -> Result<(), TransportError>;

    fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn poll_event(&mut self) -> Option<SocketEvent>;
}

struct WsConnection {
    outbound: UnboundedSender<String>,
    inbound: UnboundedReceiver<SocketEvent>,
    open: bool,
}

/// WebSocket client driven by a tokio runtime.
///
/// Each connection runs as a spawned task; frames cross into the caller's
/// thread through unbounded channels drained in `poll_event`.
pub struct WsSocket {
    runtime: Handle,
    connection: Option<WsConnection>,
}

impl WsSocket {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            connection: None,
        }
    }

    /// Uses the runtime of the calling context.
    pub fn from_current() -> Result<Self, TransportError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|err| TransportError::Socket(err.to_string()))
    }
}

async fn run_connection(
    url: String,
    mut outbound: UnboundedReceiver<String>,
    events: UnboundedSender<SocketEvent>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            let _ = events.send(SocketEvent::Failed {
                reason: err.to_string(),
            });
            return;
        }
    };
    log::debug!("Relay socket open to {}", url);
    let _ = events.send(SocketEvent::Opened);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(err) = write.send(Message::Text(text)).await {
                        let _ = events.send(SocketEvent::Closed { reason: err.to_string() });
                        break;
                    }
                }
                None => {
                    // Owner closed the socket.
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Text(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    let _ = events.send(SocketEvent::Closed { reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = events.send(SocketEvent::Closed { reason: err.to_string() });
                    break;
                }
                None => {
                    let _ = events.send(SocketEvent::Closed { reason: "stream ended".to_string() });
                    break;
                }
            }
        }
    }
}

impl RelaySocket for WsSocket {
    fn open(&mut self, url: &str) -> Result<(), TransportError> {
        self.close();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.runtime
            .spawn(run_connection(url.to_string(), outbound_rx, events_tx));

        self.connection = Some(WsConnection {
            outbound: outbound_tx,
            inbound: events_rx,
            open: false,
        });
        Ok(())
    }

    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        match &self.connection {
            Some(conn) if conn.open => conn
                .outbound
                .send(text)
                .map_err(|_| TransportError::Socket("connection task ended".into())),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn close(&mut self) {
        // Dropping the sender ends the task with a close frame.
        self.connection = None;
    }

    fn is_open(&self) -> bool {
        self.connection.as_ref().is_some_and(|conn| conn.open)
    }

    fn poll_event(&mut self) -> Option<SocketEvent> {
        let conn = self.connection.as_mut()?;
        match conn.inbound.try_recv() {
            Ok(event) => {
                match event {
                    SocketEvent::Opened => conn.open = true,
                    SocketEvent::Closed { .. } | SocketEvent::Failed { .. } => conn.open = false,
                    SocketEvent::Text(_) => {}
                }
                Some(event)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                let was_open = conn.open;
                self.connection = None;
                was_open.then(|| SocketEvent::Closed {
                    reason: "connection task ended".to_string(),
                })
            }
        }
    }
}

/// Scripted in-memory socket for driving a relay transport without a server.
///
/// Inspect what the transport sent with [`MemorySocket::take_sent`]; feed
/// server frames and failures with the `push_*` methods. A shared handle is
/// kept by cloning.
#[derive(Debug, Clone, Default)]
pub struct MemorySocket {
    inner: std::rc::Rc<std::cell::RefCell<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    open: bool,
    refuse_opens: bool,
    stall_opens: bool,
    open_attempts: Vec<String>,
    sent: Vec<String>,
    events: VecDeque<SocketEvent>,
}

impl MemorySocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every `open` fails.
    pub fn refuse_opens(&self, refuse: bool) {
        self.inner.borrow_mut().refuse_opens = refuse;
    }

    /// When set, `open` never completes.
    pub fn stall_opens(&self, stall: bool) {
        self.inner.borrow_mut().stall_opens = stall;
    }

    pub fn open_attempts(&self) -> Vec<String> {
        self.inner.borrow().open_attempts.clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.borrow_mut().sent)
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.inner
            .borrow_mut()
            .events
            .push_back(SocketEvent::Text(text.into()));
    }

    /// Simulates the server dropping the connection.
    pub fn push_close(&self, reason: &str) {
        let mut state = self.inner.borrow_mut();
        state.open = false;
        state.events.push_back(SocketEvent::Closed {
            reason: reason.to_string(),
        });
    }
}

impl RelaySocket for MemorySocket {
    fn open(&mut self, url: &str) -> Result<(), TransportError> {
        let mut state = self.inner.borrow_mut();
        state.open_attempts.push(url.to_string());
        state.events.clear();
        if state.stall_opens {
            return Ok(());
        }
        if state.refuse_opens {
            state.events.push_back(SocketEvent::Failed {
                reason: "connection refused".to_string(),
            });
        } else {
            state.open = true;
            state.events.push_back(SocketEvent::Opened);
        }
        Ok(())
    }

    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.inner.borrow_mut();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.inner.borrow_mut();
        state.open = false;
        state.events.clear();
    }

    fn is_open(&self) -> bool {
        self.inner.borrow().open
    }

    fn poll_event(&mut self) -> Option<SocketEvent> {
        self.inner.borrow_mut().events.pop_front()
    }
}
