//! Page ↔ worker control protocol.
//!
//! Each request that expects an answer carries its own oneshot reply
//! channel, the typed equivalent of a transferable reply port.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::SwError;

/// Reply to a version query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    /// The active generation identifier.
    pub version: String,
}

/// Acknowledgment of a cache clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCacheReply {
    /// Whether every store was deleted.
    pub success: bool,
}

/// A message sent from the page to the worker.
#[derive(Debug)]
pub enum ControlMessage {
    /// Force the waiting worker to activate immediately. No reply.
    SkipWaiting,

    /// Read-only query for the active generation identifier.
    GetVersion { reply: oneshot::Sender<VersionReply> },

    /// Delete every cached generation, the current one included.
    ClearCache { reply: oneshot::Sender<ClearCacheReply> },
}

/// Page-side handle to a running engine's control loop.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ControlMessage>) -> Self {
        Self { tx }
    }

    /// Send a raw control message.
    pub fn send(&self, message: ControlMessage) -> Result<(), SwError> {
        self.tx.send(message).map_err(|_| SwError::ChannelClosed)
    }

    /// Force the waiting worker to activate.
    pub fn skip_waiting(&self) -> Result<(), SwError> {
        self.send(ControlMessage::SkipWaiting)
    }

    /// Query the active generation identifier.
    pub async fn get_version(&self) -> Result<VersionReply, SwError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMessage::GetVersion { reply })?;
        rx.await.map_err(|_| SwError::ChannelClosed)
    }

    /// Delete every cached generation.
    pub async fn clear_cache(&self) -> Result<ClearCacheReply, SwError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMessage::ClearCache { reply })?;
        rx.await.map_err(|_| SwError::ChannelClosed)
    }
}
