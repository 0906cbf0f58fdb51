//! TCP listener for indicator lights
//!
//! Handles the accept loop and gives every light its own session task. A
//! session forwards hub messages as JSON lines and ends when the light
//! disconnects.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};

use crate::hub::{HubHandle, MIN_SUBSCRIBER_QUEUE, SubscriberId};
use crate::protocol::LightMessage;

// Longest line accepted from a light
const MAX_LINE_LENGTH: usize = 4096;

pub struct LightServer {
    listener: TcpListener,
    hub: HubHandle,
    queue_capacity: usize,
    next_id: AtomicU64,
}

impl LightServer {
    pub async fn bind(addr: SocketAddr, hub: HubHandle, queue_capacity: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Light server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            hub,
            queue_capacity: queue_capacity.max(MIN_SUBSCRIBER_QUEUE),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept lights until the task is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => self.handle_connection(socket, peer),
                Err(e) => log::error!("Failed to accept light connection: {}", e),
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        log::debug!("Light {} connected from {}", id, peer);

        if let Err(e) = socket.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY for light {}: {}", id, e);
        }

        let hub = self.hub.clone();
        let capacity = self.queue_capacity;
        tokio::spawn(async move {
            let (tx, rx) = mpsc::channel(capacity);
            hub.join(id, tx).await;

            if let Err(e) = session(id, socket, rx).await {
                log::debug!("Light {} session error: {}", id, e);
            }

            hub.leave(id).await;
            log::debug!("Light {} from {} closed", id, peer);
        });
    }
}

async fn session(
    id: SubscriberId,
    socket: TcpStream,
    mut queue: mpsc::Receiver<LightMessage>,
) -> Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        tokio::select! {
            message = queue.recv() => {
                let Some(message) = message else {
                    // Hub dropped us
                    return Ok(());
                };
                framed.send(message.encode()?).await?;
            }
            incoming = framed.next() => {
                match incoming {
                    Some(Ok(line)) => log::debug!("Ignoring message from light {}: {}", id, line),
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                }
            }
        }
    }
}
