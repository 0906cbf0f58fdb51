//! Upstream connection supervision
//!
//! The supervisor owns the switcher link and is the only writer of its
//! [`LinkState`]. It retries on a fixed interval after link loss and polls
//! the transport so a missed disconnect notification is corrected within
//! one poll period. Connection errors are logged here and never escape.

use std::fmt;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at};

use crate::config::TimingConfig;
use crate::link::{LinkEvent, SwitcherLink};

/// Supervisor's belief about the upstream link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Error => "error",
        };
        f.write_str(s)
    }
}

/// What the reconciler needs to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    /// A connect attempt just succeeded
    Connected,
    /// The switcher reported a state change
    StateChanged,
}

pub struct Supervisor<L> {
    link: L,
    state: LinkState,
    retry_interval: Duration,
    connect_timeout: Duration,
    retry: Option<Interval>,
    poll: Interval,
}

impl<L: SwitcherLink> Supervisor<L> {
    pub fn new(link: L, timing: &TimingConfig) -> Self {
        let mut poll = interval(timing.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            link,
            state: LinkState::Disconnected,
            retry_interval: timing.retry_interval(),
            connect_timeout: timing.connect_timeout(),
            retry: None,
            poll,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_retrying(&self) -> bool {
        self.retry.is_some()
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Make the first connect attempt.
    ///
    /// Returns true on success. On failure the state becomes `Error` and the
    /// retry loop takes over.
    pub async fn start(&mut self) -> bool {
        log::info!("Connecting to switcher at {}", self.link.address());
        self.state = LinkState::Connecting;

        match self.try_connect().await {
            Ok(()) => {
                self.on_connected();
                true
            }
            Err(cause) => {
                self.state = LinkState::Error;
                log::error!("Failed to connect to switcher at {}: {}", self.link.address(), cause);
                self.schedule_retry();
                false
            }
        }
    }

    /// Enter the retry loop. No-op if already retrying.
    pub fn start_retry(&mut self) {
        if self.retry.is_some() {
            return;
        }
        self.state = LinkState::Connecting;
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        if self.retry.is_some() {
            return;
        }
        log::warn!(
            "Switcher link down, will attempt to reconnect every {:?}",
            self.retry_interval
        );
        let mut retry = interval_at(Instant::now() + self.retry_interval, self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.retry = Some(retry);
    }

    /// Correct a stale `Connected` belief
    pub fn poll_health(&mut self) {
        if self.state == LinkState::Connected && !self.link.is_connected() {
            log::warn!("Thought we were connected, but the automatic poll detected we were not. Correcting.");
            self.retry = None;
            self.start_retry();
        }
    }

    /// One attempt from the retry loop. Failures are swallowed.
    pub async fn retry_once(&mut self) -> bool {
        if self.state == LinkState::Connected {
            self.retry = None;
            return false;
        }

        self.state = LinkState::Connecting;
        match self.try_connect().await {
            Ok(()) => {
                self.on_connected();
                true
            }
            Err(cause) => {
                log::debug!("Reconnect attempt failed: {}", cause);
                false
            }
        }
    }

    /// Apply a link event to the connection state.
    ///
    /// Returns true for events the reconciler must see.
    pub fn handle_event(&mut self, event: LinkEvent) -> bool {
        match event {
            LinkEvent::StateChanged => true,
            LinkEvent::Disconnected => {
                log::info!("Switcher disconnected");
                self.start_retry();
                false
            }
            LinkEvent::Error(detail) => {
                log::error!("Switcher link error: {}", detail);
                false
            }
        }
    }

    /// Drive timers and the link until something needs reconciling
    pub async fn next(&mut self) -> Upstream {
        loop {
            let connected = self.state == LinkState::Connected;

            tokio::select! {
                _ = self.poll.tick() => self.poll_health(),
                _ = tick(&mut self.retry) => {
                    if self.retry_once().await {
                        return Upstream::Connected;
                    }
                }
                event = self.link.next_event(), if connected => {
                    if self.handle_event(event) {
                        return Upstream::StateChanged;
                    }
                }
            }
        }
    }

    async fn try_connect(&mut self) -> Result<(), String> {
        match tokio::time::timeout(self.connect_timeout, self.link.connect()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.cause()),
            Err(_) => Err(format!("timed out after {:?}", self.connect_timeout)),
        }
    }

    fn on_connected(&mut self) {
        log::info!("Connected to switcher at {}", self.link.address());
        self.retry = None;
        self.state = LinkState::Connected;
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
