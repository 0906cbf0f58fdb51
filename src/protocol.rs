//! Messages sent from the base station to indicator lights
//!
//! Each message is one line of JSON on the hub's TCP socket.

use schemars::{JsonSchema, Schema};
use serde::{Deserialize, Serialize};

use crate::tally::{TallyEntry, TallyVector};

// Lamp intensities, 0-255
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Brightness {
    pub program: u8,
    pub preview: u8,
}

impl Default for Brightness {
    fn default() -> Self {
        Self {
            program: 100,
            preview: 100,
        }
    }
}

/// A message on the light protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum LightMessage {
    // Sent once to every light when it joins
    SetBrightness(Brightness),
    // Full tally vector, sent on every change and replayed on join
    SetTally(Vec<TallyEntry>),
}

impl LightMessage {
    pub fn tally(vector: &TallyVector) -> Self {
        LightMessage::SetTally(vector.entries())
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// JSON schema describing the light protocol
pub fn schema() -> Schema {
    schemars::schema_for!(LightMessage)
}
