//! # tally-lights
//!
//! Tally light base station and indicator client.
//!
//! The base station watches a switcher (a Blackmagic Videohub router or OBS
//! Studio) for changes to what is on program and preview, maps switcher
//! inputs onto tally channels and pushes the result to every connected
//! light. Lights that join late get the last known state straight away.

pub mod config;
pub mod hub;
pub mod light;
pub mod link;
pub mod mapping;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod service;
pub mod snapshot;
pub mod supervisor;
pub mod tally;

// Re-export the main service and commonly used types
pub use config::{Config, ConfigError};
pub use hub::{Hub, HubHandle};
pub use link::{Backend, LinkError, LinkEvent, SwitcherLink};
pub use mapping::{ChannelIndex, InputMap, SwitcherId};
pub use protocol::{Brightness, LightMessage};
pub use service::TallyService;
pub use snapshot::{Bus, BusSnapshot};
pub use supervisor::{LinkState, Supervisor};
pub use tally::{Precedence, TallyState, TallyVector};
