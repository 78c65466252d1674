//! Every modem the daemon currently watches, keyed by object path.
//!
//! The registry is the only owner of per-modem state. Removing an entry drops its
//! registration subscription and cancels its kick, if one is in flight.

use crate::{
    daemon::{Event, EventSender},
    kick::{KickId, KickOperation, Kicker, Progress},
    modem::{ModemControl, ModemObject, ModemPath},
    registration::{RegistrationState, StuckChange, StuckTracker},
};
use color_eyre::Result;
use futures::StreamExt as _;
use std::{collections::HashMap, sync::Arc};
use tokio::{task, time::Instant};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info};

/// Why a modem is not worth watching.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Ineligible {
    #[error("modem had no modem interface")]
    NoModemInterface,
    #[error("modem had no primary port")]
    NoPrimaryPort,
    #[error("modem is not a 3GPP modem")]
    NotThreeGpp,
}

pub struct ModemContext {
    path: ModemPath,
    primary_port: String,
    control: Arc<dyn ModemControl>,
    _registration_changes: AbortOnDropHandle<()>,
    stuck: StuckTracker,
    kick: Option<KickOperation>,
}

impl ModemContext {
    pub fn path(&self) -> &ModemPath {
        &self.path
    }

    pub fn primary_port(&self) -> &str {
        &self.primary_port
    }

    pub fn stuck(&self) -> &StuckTracker {
        &self.stuck
    }

    pub fn stuck_since(&self) -> Option<Instant> {
        self.stuck.since()
    }

    pub fn kick(&self) -> Option<&KickOperation> {
        self.kick.as_ref()
    }

    pub(crate) fn observe_registration(&mut self, state: RegistrationState, now: Instant) {
        let path = &self.path;
        info!("{path}: registration changed to {state}");

        match self.stuck.observe(state, now) {
            StuckChange::Began => info!("{path}: saving idle/denied timestamp"),
            StuckChange::Cleared => info!("{path}: registered; clearing idle/denied timestamp"),
            StuckChange::Unchanged => {}
        }
    }

    /// Cancels the kick in flight, if any, and starts over from the first step.
    pub(crate) fn start_kick(&mut self, kicker: &mut Kicker) {
        if let Some(previous) = self.kick.take() {
            info!(
                "{}: cancelling previous kick at step {}",
                self.path,
                previous.step()
            );
        }

        self.kick = Some(kicker.start(&self.path));
    }

    pub(crate) fn on_step_due(&mut self, kicker: &Kicker, kick: KickId) {
        let Some(op) = self.kick.as_mut().filter(|op| op.id() == kick) else {
            debug!("{}: ignoring timer of a cancelled kick", self.path);
            return;
        };

        if kicker.step_due(op, &self.path, &self.control) == Progress::Finished {
            if op.is_exhausted() {
                info!("{}: gave up kicking after {} failures", self.path, op.tries());
            } else {
                info!("{}: modem kicked", self.path);
            }
            self.kick = None;
        }
    }

    pub(crate) fn on_step_done(&mut self, kicker: &Kicker, kick: KickId, result: Result<()>) {
        let Some(op) = self
            .kick
            .as_mut()
            .filter(|op| op.id() == kick && !op.is_cancelled())
        else {
            debug!("{}: ignoring reply for a cancelled kick", self.path);
            return;
        };

        kicker.step_done(op, &self.path, result);
    }
}

pub struct Registry {
    modems: HashMap<ModemPath, ModemContext>,
    events: EventSender,
}

impl Registry {
    pub fn new(events: EventSender) -> Self {
        Self {
            modems: HashMap::new(),
            events,
        }
    }

    /// Starts watching `modem`.
    ///
    /// Its current registration state is evaluated right away, so a modem that
    /// is already idle or denied counts as stuck from now on. An entry already
    /// present under the same path is replaced.
    pub fn add(&mut self, modem: ModemObject, now: Instant) -> Result<(), Ineligible> {
        let ModemObject {
            path,
            modem,
            modem_3gpp,
        } = modem;

        let modem = modem.ok_or(Ineligible::NoModemInterface)?;
        let primary_port = modem
            .primary_port
            .filter(|port| !port.is_empty())
            .ok_or(Ineligible::NoPrimaryPort)?;
        let modem_3gpp = modem_3gpp.ok_or(Ineligible::NotThreeGpp)?;

        let registration_changes = {
            let events = self.events.clone();
            let path = path.clone();
            let mut changes = modem_3gpp.registration_changes;
            task::spawn(async move {
                while let Some(state) = changes.next().await {
                    let event = Event::RegistrationChanged {
                        path: path.clone(),
                        state,
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
            })
        };

        let mut ctx = ModemContext {
            path: path.clone(),
            primary_port,
            control: modem.control,
            _registration_changes: AbortOnDropHandle::new(registration_changes),
            stuck: StuckTracker::default(),
            kick: None,
        };
        ctx.observe_registration(modem_3gpp.registration_state, now);

        info!("{path}: added (primary port {})", ctx.primary_port);
        if self.modems.insert(path, ctx).is_some() {
            debug!("replaced a modem that was already tracked");
        }

        Ok(())
    }

    /// Stops watching the modem at `path`. Returns whether it was tracked.
    pub fn remove(&mut self, path: &ModemPath) -> bool {
        let Some(ctx) = self.modems.remove(path) else {
            return false;
        };

        if let Some(op) = ctx.kick() {
            info!("{path}: cancelling kick at step {}", op.step());
        }
        info!("{path}: removed");

        true
    }

    /// Stops watching every modem. Returns how many were tracked.
    pub fn clear_all(&mut self) -> usize {
        let count = self.modems.len();
        if count > 0 {
            info!("clearing {count} modems");
        }
        self.modems.clear();

        count
    }

    pub fn get(&self, path: &ModemPath) -> Option<&ModemContext> {
        self.modems.get(path)
    }

    pub(crate) fn get_mut(&mut self, path: &ModemPath) -> Option<&mut ModemContext> {
        self.modems.get_mut(path)
    }

    pub fn contains(&self, path: &ModemPath) -> bool {
        self.modems.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.modems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modems.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &ModemPath> {
        self.modems.keys()
    }

    /// Visits every tracked modem in unspecified order. `f` cannot add or remove
    /// entries while the iteration is running.
    pub(crate) fn for_each_mut(&mut self, mut f: impl FnMut(&mut ModemContext)) {
        for ctx in self.modems.values_mut() {
            f(ctx);
        }
    }
}
