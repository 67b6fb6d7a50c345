use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tandem::transport::{RoomEvent, RoomRequest};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::RelayServerConfig;
use crate::rooms::{Membership, Rooms};

/// WebSocket relay: pairs hosts and clients by room code and forwards
/// protocol messages between them.
pub struct RelayServer {
    listener: TcpListener,
    rooms: Arc<Mutex<Rooms>>,
}

impl RelayServer {
    pub async fn bind(addr: &str, config: RelayServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            rooms: Arc::new(Mutex::new(Rooms::new(config))),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let rooms = Arc::clone(&self.rooms);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, addr, rooms).await {
                    log::debug!("Connection {} ended with error: {}", addr, err);
                }
            });
        }
    }
}

fn lock(rooms: &Mutex<Rooms>) -> MutexGuard<'_, Rooms> {
    rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn flush_events(rooms: &mut Rooms) {
    for event in rooms.drain_events() {
        event.log();
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Arc<Mutex<Rooms>>,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    log::debug!("WebSocket connection from {}", addr);

    let (mut write, mut read) = ws.split();
    let (outbox, mut outgoing) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = outgoing.recv().await {
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });

    let mut membership: Option<Membership> = None;
    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                log::debug!("Read error from {}: {}", addr, err);
                break;
            }
        };

        let request = match RoomRequest::from_json(&text) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("Malformed request from {}: {}", addr, err);
                if let Ok(reply) = (RoomEvent::Error {
                    error: "Malformed request".to_string(),
                })
                .to_json()
                {
                    let _ = outbox.send(reply);
                }
                continue;
            }
        };

        let mut guard = lock(&rooms);
        membership = guard.handle(membership.take(), request, &outbox);
        flush_events(&mut guard);
    }

    if let Some(membership) = membership {
        let mut guard = lock(&rooms);
        guard.leave(&membership);
        flush_events(&mut guard);
    }

    drop(outbox);
    let _ = writer.await;
    log::debug!("Connection {} closed", addr);
    Ok(())
}
