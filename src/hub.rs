//! Distribution hub for indicator lights
//!
//! The hub owns the subscriber registry and the last published tally
//! vector. It runs as a single task fed by [`HubCommand`]s, so nothing else
//! ever touches either. Delivery is best effort: a light that misses a
//! message catches up on the next publish or when it reconnects.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::protocol::{Brightness, LightMessage};
use crate::tally::TallyVector;

pub type SubscriberId = u64;

const COMMAND_CAPACITY: usize = 100;

/// Smallest per-light queue that holds the join burst (brightness and replay)
pub const MIN_SUBSCRIBER_QUEUE: usize = 2;

// Commands sent to the hub task
#[derive(Debug)]
pub enum HubCommand {
    Join {
        id: SubscriberId,
        queue: mpsc::Sender<LightMessage>,
    },
    Leave {
        id: SubscriberId,
    },
    Publish(TallyVector),
}

enum Delivery {
    Sent,
    Dropped,
    Closed,
}

fn deliver(id: SubscriberId, queue: &mpsc::Sender<LightMessage>, message: LightMessage) -> Delivery {
    match queue.try_send(message) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => {
            log::warn!("Light {} is not keeping up, dropping message", id);
            Delivery::Dropped
        }
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

pub struct Hub {
    brightness: Brightness,
    subscribers: HashMap<SubscriberId, mpsc::Sender<LightMessage>>,
    last: Option<TallyVector>,
}

impl Hub {
    pub fn new(brightness: Brightness) -> Self {
        Self {
            brightness,
            subscribers: HashMap::new(),
            last: None,
        }
    }

    /// Register a light and bring it up to date.
    ///
    /// The light gets the brightness levels, then the last published vector
    /// if there is one.
    pub fn join(&mut self, id: SubscriberId, queue: mpsc::Sender<LightMessage>) {
        if let Delivery::Closed = deliver(id, &queue, LightMessage::SetBrightness(self.brightness)) {
            return;
        }
        if let Some(vector) = &self.last {
            if let Delivery::Closed = deliver(id, &queue, LightMessage::tally(vector)) {
                return;
            }
        }

        self.subscribers.insert(id, queue);
        log::info!("Light {} joined ({} connected)", id, self.subscribers.len());
    }

    pub fn leave(&mut self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            log::info!("Light {} left ({} connected)", id, self.subscribers.len());
        }
        removed
    }

    /// Send `vector` to every light and remember it.
    ///
    /// A vector equal to the last one published is not resent. Returns the
    /// number of lights the message was queued for.
    pub fn publish(&mut self, vector: TallyVector) -> usize {
        if self.last.as_ref() == Some(&vector) {
            log::debug!("Tally unchanged, not rebroadcasting");
            return 0;
        }

        let message = LightMessage::tally(&vector);
        let mut sent = 0;
        let mut closed = Vec::new();
        for (id, queue) in &self.subscribers {
            match deliver(*id, queue, message.clone()) {
                Delivery::Sent => sent += 1,
                Delivery::Dropped => {}
                Delivery::Closed => closed.push(*id),
            }
        }
        for id in closed {
            self.leave(id);
        }

        self.last = Some(vector);
        sent
    }

    pub fn last(&self) -> Option<&TallyVector> {
        self.last.as_ref()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Join { id, queue } => self.join(id, queue),
            HubCommand::Leave { id } => {
                self.leave(id);
            }
            HubCommand::Publish(vector) => {
                let sent = self.publish(vector);
                log::debug!("Published tally to {} lights", sent);
            }
        }
    }

    /// Move the hub onto its own task
    pub fn spawn(mut self) -> (HubHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<HubCommand>(COMMAND_CAPACITY);

        let task = tokio::spawn(async move {
            log::debug!("Hub task started");
            while let Some(command) = rx.recv().await {
                self.apply(command);
            }
            log::debug!("Hub task stopped");
        });

        (HubHandle { tx }, task)
    }
}

/// Cloneable sender side of a running hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn join(&self, id: SubscriberId, queue: mpsc::Sender<LightMessage>) {
        if let Err(e) = self.tx.send(HubCommand::Join { id, queue }).await {
            log::error!("Failed to register light {}: {}", id, e);
        }
    }

    pub async fn leave(&self, id: SubscriberId) {
        if let Err(e) = self.tx.send(HubCommand::Leave { id }).await {
            log::error!("Failed to deregister light {}: {}", id, e);
        }
    }

    pub async fn publish(&self, vector: TallyVector) {
        if let Err(e) = self.tx.send(HubCommand::Publish(vector)).await {
            log::error!("Failed to publish tally: {}", e);
        }
    }
}
