//! Broadcast hub: a single actor task that owns the observer set.
//!
//! All register/unregister/broadcast/count operations travel through the
//! actor's inbox, so the set is only ever touched by one task. Producers never
//! block: a full inbox drops the message, and an observer whose buffer is full
//! is disconnected.

use crate::job::{JobId, JobStatus};
use crate::progress::ProgressSink;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Payload of a progress message. The id is a decimal string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub id: String,
    pub progress: u8,
    pub status: JobStatus,
}

/// Message delivered to observers.
///
/// Serialises as `{"type":"progress","payload":{...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum HubMessage {
    Progress(ProgressPayload),
}

impl HubMessage {
    pub fn progress(job_id: JobId, progress: u8, status: JobStatus) -> Self {
        HubMessage::Progress(ProgressPayload {
            id: job_id.to_string(),
            progress,
            status,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub type ObserverId = u64;

/// A registered observer: its id and the receiving end of its channel.
#[derive(Debug)]
pub struct Observer {
    pub id: ObserverId,
    pub rx: mpsc::Receiver<HubMessage>,
}

impl Observer {
    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.rx.recv().await
    }
}

#[derive(Debug, thiserror::Error)]
#[error("broadcast hub has shut down")]
pub struct HubClosed;

enum Command {
    Register(oneshot::Sender<Observer>),
    Unregister(ObserverId),
    Broadcast(HubMessage),
    Count(oneshot::Sender<usize>),
}

/// The actor state. Only [`Hub::spawn`] creates one, and only its task uses it.
pub struct Hub {
    inbox: mpsc::Receiver<Command>,
    observers: HashMap<ObserverId, mpsc::Sender<HubMessage>>,
    next_id: ObserverId,
    observer_buffer: usize,
}

impl Hub {
    /// Start the actor on the current runtime and return a handle to it.
    pub fn spawn(inbox_capacity: usize, observer_buffer: usize) -> HubHandle {
        let (tx, rx) = mpsc::channel(inbox_capacity.max(1));
        let hub = Hub {
            inbox: rx,
            observers: HashMap::new(),
            next_id: 1,
            observer_buffer: observer_buffer.max(1),
        };
        tokio::spawn(hub.run());
        HubHandle { tx }
    }

    /// Runs until every handle is dropped; dropping the observer senders on
    /// exit closes every observer channel.
    async fn run(mut self) {
        while let Some(cmd) = self.inbox.recv().await {
            match cmd {
                Command::Register(reply) => {
                    let id = self.next_id;
                    self.next_id += 1;
                    let (tx, rx) = mpsc::channel(self.observer_buffer);
                    if reply.send(Observer { id, rx }).is_ok() {
                        self.observers.insert(id, tx);
                        debug!(observer = id, "observer registered");
                    }
                }
                Command::Unregister(id) => {
                    if self.observers.remove(&id).is_some() {
                        debug!(observer = id, "observer unregistered");
                    }
                }
                Command::Broadcast(msg) => self.deliver(msg),
                Command::Count(reply) => {
                    let _ = reply.send(self.observers.len());
                }
            }
        }
        debug!(observers = self.observers.len(), "hub stopped");
    }

    fn deliver(&mut self, msg: HubMessage) {
        self.observers.retain(|id, tx| match tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(observer = id, "observer too slow, disconnecting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(observer = id, "observer gone");
                false
            }
        });
    }
}

/// Cloneable handle to the hub actor.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
}

impl HubHandle {
    pub async fn register(&self) -> Result<Observer, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Register(reply))
            .await
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }

    /// Remove an observer and close its channel.
    pub async fn unregister(&self, id: ObserverId) -> Result<(), HubClosed> {
        self.tx
            .send(Command::Unregister(id))
            .await
            .map_err(|_| HubClosed)
    }

    /// Queue a message for every observer without waiting. Returns false when
    /// the message was dropped because the inbox is full or the hub is gone.
    pub fn broadcast(&self, msg: HubMessage) -> bool {
        match self.tx.try_send(Command::Broadcast(msg)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("hub inbox full, dropping update");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("hub closed, dropping update");
                false
            }
        }
    }

    /// Number of registered observers, answered by the actor.
    pub async fn observer_count(&self) -> Result<usize, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Count(reply))
            .await
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }
}

impl ProgressSink for HubHandle {
    fn notify(&self, job_id: JobId, percent: u8, status: JobStatus) {
        self.broadcast(HubMessage::progress(job_id, percent, status));
    }
}
