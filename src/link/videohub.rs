//! Blackmagic Videohub link
//!
//! The router has no program/preview busses of its own. The inputs routed
//! to the configured program monitor outputs count as "program" and those
//! routed to the preview monitor outputs count as "preview".

use std::collections::HashMap;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use videohub::{DeviceInfo, VideohubCodec, VideohubMessage};

use super::{LinkError, LinkEvent, SwitcherLink};
use crate::mapping::SwitcherId;
use crate::snapshot::Bus;

// Last known state of the router
#[derive(Debug, Clone, Default)]
pub struct VideohubState {
    pub device_info: Option<DeviceInfo>,
    pub input_labels: HashMap<u32, String>,
    pub video_output_routing: HashMap<u32, u32>, // output -> input
    pub routing_received: bool,
    pub connected: bool,
}

impl VideohubState {
    /// Fold a message into the state.
    ///
    /// Returns true when routing changed.
    pub fn apply(&mut self, message: &VideohubMessage) -> bool {
        match message {
            VideohubMessage::DeviceInfo(info) => {
                log::info!(
                    "Device connected: {} | Inputs: {} | Outputs: {} | ID: {}",
                    info.model_name.as_deref().unwrap_or("Unknown"),
                    info.video_inputs.unwrap_or(0),
                    info.video_outputs.unwrap_or(0),
                    info.unique_id.as_deref().unwrap_or("Unknown")
                );
                self.device_info = Some(info.clone());
                false
            }
            VideohubMessage::InputLabels(labels) => {
                log::debug!("Received input labels: {} labels", labels.len());
                for label in labels {
                    self.input_labels.insert(label.id, label.name.clone());
                }
                false
            }
            VideohubMessage::VideoOutputRouting(routes) => {
                log::debug!("Received video output routing: {} routes", routes.len());
                // The first dump after connect always counts
                let mut changed = !self.routing_received;
                self.routing_received = true;
                for route in routes {
                    let previous = self
                        .video_output_routing
                        .insert(route.to_output, route.from_input);
                    if previous != Some(route.from_input) {
                        log::debug!(
                            "Route: output {} <- input {} ({})",
                            route.to_output,
                            route.from_input,
                            self.input_labels
                                .get(&route.from_input)
                                .map(String::as_str)
                                .unwrap_or("unlabelled")
                        );
                        changed = true;
                    }
                }
                changed
            }
            VideohubMessage::NAK => {
                log::warn!("Received NAK");
                false
            }
            _ => {
                log::trace!("Ignoring videohub message: {:?}", message);
                false
            }
        }
    }

    /// Inputs currently routed to any of `outputs`, in output order
    pub fn routed_inputs(&self, outputs: &[u32]) -> Vec<SwitcherId> {
        outputs
            .iter()
            .filter_map(|output| self.video_output_routing.get(output))
            .map(|input| SwitcherId::Input(*input))
            .collect()
    }
}

// Link to a Blackmagic Videohub over its TCP control protocol
pub struct VideohubLink {
    host: String,
    port: u16,
    program_outputs: Vec<u32>,
    preview_outputs: Vec<u32>,
    state: VideohubState,
    connection: Option<Framed<TcpStream, VideohubCodec>>,
}

impl VideohubLink {
    pub fn new(host: String, port: u16, program_outputs: Vec<u32>, preview_outputs: Vec<u32>) -> Self {
        Self {
            host,
            port,
            program_outputs,
            preview_outputs,
            state: VideohubState::default(),
            connection: None,
        }
    }
}

impl SwitcherLink for VideohubLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        log::debug!("Connecting to videohub at {}:{}", self.host, self.port);

        let stream = TcpStream::connect(format!("{}:{}", self.host, self.port)).await?;
        let framed = Framed::new(stream, VideohubCodec);

        // The router dumps its full state after connect
        self.state = VideohubState::default();
        self.connection = Some(framed);
        self.state.connected = true;

        log::debug!("Connected to videohub successfully");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected && self.connection.is_some()
    }

    async fn next_event(&mut self) -> LinkEvent {
        let Some(conn) = self.connection.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            match conn.next().await {
                Some(Ok(message)) => {
                    if self.state.apply(&message) {
                        return LinkEvent::StateChanged;
                    }
                }
                Some(Err(e)) => {
                    self.state.connected = false;
                    self.connection = None;
                    return LinkEvent::Error(format!("Failed to receive message: {}", e));
                }
                None => {
                    self.state.connected = false;
                    self.connection = None;
                    return LinkEvent::Disconnected;
                }
            }
        }
    }

    async fn visible_inputs(&mut self, bus: Bus) -> Result<Vec<SwitcherId>, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        if !self.state.routing_received {
            return Err(LinkError::NotReady);
        }
        let outputs = match bus {
            Bus::Program => &self.program_outputs,
            Bus::Preview => &self.preview_outputs,
        };
        Ok(self.state.routed_inputs(outputs))
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
