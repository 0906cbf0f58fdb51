//! Tally base station service - switcher supervision, reconciliation and light distribution

use anyhow::Result;
use tokio::time::{Duration, interval};

use crate::config::Config;
use crate::hub::{Hub, HubHandle};
use crate::link::{Backend, SwitcherLink};
use crate::mapping::InputMap;
use crate::reconcile::Reconciler;
use crate::server::LightServer;
use crate::supervisor::{Supervisor, Upstream};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

// Main service tying a switcher to the tally lights
pub struct TallyService {
    config: Config,
    map: InputMap,
}

impl TallyService {
    pub fn new(config: Config) -> Result<Self> {
        let map = config.input_map()?;
        Ok(Self { config, map })
    }

    pub async fn start(self) -> Result<()> {
        log::info!("Starting tally service in {} mode", self.config.mode);
        log::info!(
            "Mapping {} switcher identifiers onto {} channels, {:?} wins collisions",
            self.map.len(),
            self.map.channels().len(),
            self.config.precedence
        );

        let (hub, _hub_task) = Hub::new(self.config.brightness()).spawn();

        self.start_light_server(hub.clone()).await?;
        self.start_monitoring();

        let backend = Backend::from_config(&self.config);
        let reconciler = Reconciler::new(self.map.clone(), self.config.precedence);
        let supervisor = Supervisor::new(backend, &self.config.timing);

        log::info!("Service started successfully, running indefinitely...");
        run_switcher_loop(supervisor, reconciler, hub).await;
        Ok(())
    }

    async fn start_light_server(&self, hub: HubHandle) -> Result<()> {
        let server = LightServer::bind(
            self.config.hub_bind_addr(),
            hub,
            self.config.base_station.subscriber_queue,
        )
        .await?;
        tokio::spawn(server.run());
        Ok(())
    }

    fn start_monitoring(&self) {
        tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            let mut count: u64 = 0;
            loop {
                ticker.tick().await;
                log::debug!("Heartbeat #{}", count);
                count += 1;
            }
        });
    }
}

/// Reconcile on every connect and state change, forever
pub async fn run_switcher_loop<L: SwitcherLink>(
    mut supervisor: Supervisor<L>,
    mut reconciler: Reconciler,
    hub: HubHandle,
) {
    if supervisor.start().await {
        reconciler.sync(supervisor.link_mut(), &hub).await;
    }

    loop {
        match supervisor.next().await {
            Upstream::Connected => {
                log::debug!("Switcher (re)connected, running full update");
                reconciler.sync(supervisor.link_mut(), &hub).await;
            }
            Upstream::StateChanged => {
                reconciler.sync(supervisor.link_mut(), &hub).await;
            }
        }
    }
}
