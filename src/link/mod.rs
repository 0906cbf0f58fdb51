//! Upstream switcher links
//!
//! A link owns the transport to one switcher. It surfaces the switcher's
//! native events as [`LinkEvent`]s and answers "which inputs are visible on
//! this bus" queries. The supervisor and reconciler only see the
//! [`SwitcherLink`] trait. [`Backend`] selects the concrete link from
//! configuration.

pub mod obs;
pub mod videohub;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::config::{Config, Mode};
use crate::mapping::SwitcherId;
use crate::snapshot::Bus;

pub use obs::ObsLink;
pub use videohub::VideohubLink;

/// Errors that can occur on an upstream link
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Not connected")]
    NotConnected,

    #[error("Switcher state not received yet")]
    NotReady,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed ({code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{request} rejected with code {code}")]
    Rejected {
        request: String,
        code: i64,
        comment: Option<String>,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl LinkError {
    /// Most specific description of what went wrong.
    ///
    /// Prefers the peer's message, then its numeric code, then the error
    /// itself.
    pub fn cause(&self) -> String {
        match self {
            LinkError::Rejected {
                comment: Some(comment),
                ..
            } if !comment.is_empty() => comment.clone(),
            LinkError::Rejected { code, .. } => format!("code {}", code),
            LinkError::Closed { reason, .. } if !reason.is_empty() => reason.clone(),
            LinkError::Closed { code, .. } => format!("code {}", code),
            other => other.to_string(),
        }
    }
}

/// Notification from an upstream link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Switcher state changed; bus contents may differ
    StateChanged,
    /// Transport closed by the peer
    Disconnected,
    /// Transport failed; the link no longer considers itself connected
    Error(String),
}

/// Capability contract for a switcher backend
pub trait SwitcherLink: Send {
    /// Open the transport. Replaces any previous one.
    fn connect(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Whether the transport is alive right now
    fn is_connected(&self) -> bool;

    /// Wait for the next event.
    ///
    /// Must be cancel safe. Pends forever once the transport is gone and no
    /// further events will arrive.
    fn next_event(&mut self) -> impl Future<Output = LinkEvent> + Send;

    /// Identifiers currently visible on `bus`
    fn visible_inputs(
        &mut self,
        bus: Bus,
    ) -> impl Future<Output = Result<Vec<SwitcherId>, LinkError>> + Send;

    /// Human readable address, for logs
    fn address(&self) -> String;
}

/// Switcher backend selected at startup
pub enum Backend {
    Videohub(VideohubLink),
    Obs(ObsLink),
}

impl Backend {
    pub fn from_config(config: &Config) -> Self {
        match config.mode {
            Mode::Videohub => Backend::Videohub(VideohubLink::new(
                config.videohub.host.clone(),
                config.videohub.port,
                config.videohub.program_outputs.clone(),
                config.videohub.preview_outputs.clone(),
            )),
            Mode::Obs => Backend::Obs(ObsLink::new(
                config.obs.host.clone(),
                config.obs.port,
                config.obs.password.clone(),
                config.timing.request_timeout(),
            )),
        }
    }
}

impl SwitcherLink for Backend {
    async fn connect(&mut self) -> Result<(), LinkError> {
        match self {
            Backend::Videohub(link) => link.connect().await,
            Backend::Obs(link) => link.connect().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Backend::Videohub(link) => link.is_connected(),
            Backend::Obs(link) => link.is_connected(),
        }
    }

    async fn next_event(&mut self) -> LinkEvent {
        match self {
            Backend::Videohub(link) => link.next_event().await,
            Backend::Obs(link) => link.next_event().await,
        }
    }

    async fn visible_inputs(&mut self, bus: Bus) -> Result<Vec<SwitcherId>, LinkError> {
        match self {
            Backend::Videohub(link) => link.visible_inputs(bus).await,
            Backend::Obs(link) => link.visible_inputs(bus).await,
        }
    }

    fn address(&self) -> String {
        match self {
            Backend::Videohub(link) => link.address(),
            Backend::Obs(link) => link.address(),
        }
    }
}
