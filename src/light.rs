//! Indicator light client
//!
//! Connects to the base station, keeps only the tally entry for its own
//! channel and drives two lamps through an [`OutputDriver`]. Hardware
//! drivers live behind the trait; [`LogDriver`] just logs.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::config::Config;
use crate::mapping::ChannelIndex;
use crate::protocol::{Brightness, LightMessage};
use crate::tally::{TallyEntry, TallyState};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lamp {
    Program,
    Preview,
}

impl fmt::Display for Lamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lamp::Program => f.write_str("program"),
            Lamp::Preview => f.write_str("preview"),
        }
    }
}

/// Physical output for one light's two lamps
pub trait OutputDriver: Send {
    /// Set a lamp's intensity. Zero is off.
    fn set_output(&mut self, lamp: Lamp, level: u8) -> Result<()>;
}

// Driver that only logs lamp changes
#[derive(Debug, Default)]
pub struct LogDriver {
    levels: HashMap<Lamp, u8>,
}

impl LogDriver {
    pub fn level(&self, lamp: Lamp) -> u8 {
        self.levels.get(&lamp).copied().unwrap_or(0)
    }
}

impl OutputDriver for LogDriver {
    fn set_output(&mut self, lamp: Lamp, level: u8) -> Result<()> {
        if self.levels.insert(lamp, level) != Some(level) {
            log::info!("{} lamp -> {}", lamp, level);
        }
        Ok(())
    }
}

/// One light's view of the tally
pub struct Indicator<D> {
    channel: ChannelIndex,
    brightness: Brightness,
    state: TallyState,
    driver: D,
}

impl<D: OutputDriver> Indicator<D> {
    pub fn new(channel: ChannelIndex, brightness: Brightness, driver: D) -> Self {
        Self {
            channel,
            brightness,
            state: TallyState::None,
            driver,
        }
    }

    pub fn state(&self) -> TallyState {
        self.state
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Turn both lamps off and forget the current state
    pub fn reset(&mut self) -> Result<()> {
        self.state = TallyState::None;
        self.apply()
    }

    pub fn handle(&mut self, message: LightMessage) -> Result<()> {
        match message {
            LightMessage::SetBrightness(brightness) => {
                log::info!(
                    "setBrightness | preview: {}, program: {}",
                    brightness.preview,
                    brightness.program
                );
                self.brightness = brightness;
                self.apply()
            }
            LightMessage::SetTally(entries) => self.handle_tally(&entries),
        }
    }

    fn handle_tally(&mut self, entries: &[TallyEntry]) -> Result<()> {
        let Some(entry) = entries.iter().find(|e| e.channel == self.channel) else {
            return Ok(());
        };
        if entry.state != self.state {
            log::info!("setTally | {:?}", entry.state);
        }
        self.state = entry.state;
        self.apply()
    }

    fn apply(&mut self) -> Result<()> {
        let (program, preview) = match self.state {
            TallyState::Program => (self.brightness.program, 0),
            TallyState::Preview => (0, self.brightness.preview),
            TallyState::None => (0, 0),
        };
        // Off before on, so both lamps are never lit together
        if program == 0 {
            self.driver.set_output(Lamp::Program, 0)?;
            self.driver.set_output(Lamp::Preview, preview)
        } else {
            self.driver.set_output(Lamp::Preview, 0)?;
            self.driver.set_output(Lamp::Program, program)
        }
    }
}

/// Run a light until the process exits, reconnecting on loss
pub async fn run(config: &Config) -> Result<()> {
    let address = config.base_station_addr();
    let mut indicator = Indicator::new(config.light.channel, config.brightness(), LogDriver::default());

    log::info!("Zeroing lamps...");
    indicator.reset()?;
    log::info!("Light for channel {} ready", config.light.channel);

    loop {
        match TcpStream::connect(&address).await {
            Ok(stream) => {
                log::info!("Connected to base station at {}", address);
                if let Err(e) = follow(stream, &mut indicator).await {
                    log::warn!("Base station connection error: {}", e);
                }
                log::warn!("Lost base station, retrying in {:?}", RECONNECT_DELAY);
            }
            Err(e) => {
                log::warn!(
                    "Failed to reach base station at {}: {}, retrying in {:?}",
                    address,
                    e,
                    RECONNECT_DELAY
                );
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn follow<D: OutputDriver>(stream: TcpStream, indicator: &mut Indicator<D>) -> Result<()> {
    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        let line = line?;
        match LightMessage::decode(&line) {
            Ok(message) => indicator.handle(message)?,
            Err(e) => log::warn!("Ignoring malformed message: {}", e),
        }
    }
    Ok(())
}
