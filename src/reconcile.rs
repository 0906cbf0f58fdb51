//! Switcher state -> tally vector reconciliation

use crate::hub::HubHandle;
use crate::link::{LinkError, SwitcherLink};
use crate::mapping::InputMap;
use crate::snapshot::{Bus, BusSnapshot, BusState};
use crate::tally::{Precedence, TallyState, TallyVector, compute};

pub struct Reconciler {
    map: InputMap,
    precedence: Precedence,
    busses: BusState,
    primed: bool,
}

impl Reconciler {
    pub fn new(map: InputMap, precedence: Precedence) -> Self {
        Self {
            map,
            precedence,
            busses: BusState::new(),
            primed: false,
        }
    }

    pub fn busses(&self) -> &BusState {
        &self.busses
    }

    /// Re-read both busses and compute a new vector if anything changed.
    ///
    /// A bus that cannot be read keeps its previous snapshot. The first
    /// refresh always yields a vector so lights get an initial state.
    pub async fn refresh<L: SwitcherLink>(&mut self, link: &mut L) -> Option<TallyVector> {
        let mut changed = false;
        for bus in [Bus::Program, Bus::Preview] {
            match link.visible_inputs(bus).await {
                Ok(ids) => {
                    let fresh = BusSnapshot::from(ids);
                    if self.busses.update(bus, fresh) {
                        log::debug!("{} bus changed", bus);
                        changed = true;
                    }
                }
                Err(LinkError::NotReady) => {
                    log::debug!("{} bus not reported yet, keeping previous state", bus);
                }
                Err(e) => {
                    log::warn!("Error updating {} bus, keeping previous state: {}", bus, e.cause());
                }
            }
        }

        if !changed && self.primed {
            return None;
        }
        self.primed = true;

        let vector = compute(
            self.busses.program(),
            self.busses.preview(),
            &self.map,
            self.precedence,
        );
        log::info!(
            "Updating tally lights... program {} | preview {} | {} live, {} preview",
            self.busses.program(),
            self.busses.preview(),
            vector.count(TallyState::Program),
            vector.count(TallyState::Preview)
        );
        Some(vector)
    }

    /// Refresh and hand any new vector to the hub
    pub async fn sync<L: SwitcherLink>(&mut self, link: &mut L, hub: &HubHandle) {
        if let Some(vector) = self.refresh(link).await {
            hub.publish(vector).await;
        }
    }
}
