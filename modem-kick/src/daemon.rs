//! The daemon's event loop.
//!
//! Everything that changes modem state goes through [`Daemon::handle`], one event
//! at a time: supervisor notifications, registration changes, kick timers and
//! ModemManager replies. The periodic sweep runs on the same loop.

use crate::{
    config::Config,
    idle::{self, Verdict},
    kick::{KickId, Kicker},
    modem::{ModemObject, ModemPath},
    registration::RegistrationState,
    registry::{Ineligible, Registry},
};
use color_eyre::Result;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub enum Event {
    /// ModemManager (re)appeared on the bus. Whatever we tracked belongs to the
    /// previous instance.
    ServiceAppeared,
    ServiceVanished,
    ModemAdded(ModemObject),
    ModemRemoved(ModemPath),
    RegistrationChanged {
        path: ModemPath,
        state: RegistrationState,
    },
    /// The delay in front of the current step of a kick elapsed.
    StepDue { path: ModemPath, kick: KickId },
    /// The ModemManager call for the current step of a kick returned.
    StepDone {
        path: ModemPath,
        kick: KickId,
        result: Result<()>,
    },
}

pub type EventSender = UnboundedSender<Event>;

pub struct Daemon {
    config: Config,
    registry: Registry,
    kicker: Kicker,
    events: UnboundedReceiver<Event>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Returns the daemon together with the sender the rest of the program uses to
    /// feed it.
    pub fn new(config: Config, shutdown: CancellationToken) -> (Self, EventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let daemon = Self {
            registry: Registry::new(tx.clone()),
            kicker: Kicker::new(tx.clone(), config.step_delay, config.max_retries),
            config,
            events: rx,
            shutdown,
        };

        (daemon, tx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs until the shutdown token is cancelled. All tracked modems, and with
    /// them every kick in flight, are dropped on the way out.
    pub async fn run(mut self) -> Result<()> {
        let period = self.config.sweep_interval;
        let mut sweep = time::interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.shutdown.clone();

        info!(
            "sweeping every {}s, kicking modems stuck for more than {}s",
            period.as_secs(),
            self.config.kick_threshold.as_secs()
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = sweep.tick() => self.sweep(Instant::now()),
                Some(event) = self.events.recv() => self.handle(event),
            }
        }

        info!("shutting down");
        self.registry.clear_all();

        Ok(())
    }

    /// Waits for the next event and handles it. Returns `false` once every sender
    /// is gone.
    pub async fn process_one(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle(event);
                true
            }
            None => false,
        }
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::ServiceAppeared | Event::ServiceVanished => {
                self.registry.clear_all();
            }
            Event::ModemAdded(modem) => {
                let path = modem.path.clone();
                match self.registry.add(modem, Instant::now()) {
                    Ok(()) => {}
                    Err(Ineligible::NotThreeGpp) => info!("ignoring non-3GPP modem {path}"),
                    Err(e) => warn!("not watching modem {path}: {e}"),
                }
            }
            Event::ModemRemoved(path) => {
                if !self.registry.remove(&path) {
                    debug!("{path}: removed but was never tracked");
                }
            }
            Event::RegistrationChanged { path, state } => {
                if let Some(ctx) = self.registry.get_mut(&path) {
                    ctx.observe_registration(state, Instant::now());
                }
            }
            Event::StepDue { path, kick } => match self.registry.get_mut(&path) {
                Some(ctx) => ctx.on_step_due(&self.kicker, kick),
                None => debug!("{path}: ignoring kick timer for a modem no longer tracked"),
            },
            Event::StepDone { path, kick, result } => match self.registry.get_mut(&path) {
                Some(ctx) => ctx.on_step_done(&self.kicker, kick, result),
                None => debug!("{path}: ignoring kick reply for a modem no longer tracked"),
            },
        }
    }

    /// Kicks every modem that has been idle or denied for longer than the
    /// threshold. Only arms the first step of each kick.
    pub fn sweep(&mut self, now: Instant) {
        let threshold = self.config.kick_threshold;
        let simulate_stuck = self.config.simulate_stuck;
        let kicker = &mut self.kicker;

        self.registry.for_each_mut(|ctx| {
            let verdict = if simulate_stuck {
                Verdict::Kick {
                    stuck_for: ctx.stuck().stuck_for(now).unwrap_or(threshold),
                }
            } else {
                idle::assess(ctx.stuck(), now, threshold)
            };

            match verdict {
                Verdict::NotStuck => {}
                Verdict::Wait { remaining } => info!(
                    "{}: not kicking yet; wait {} seconds",
                    ctx.path(),
                    remaining.as_secs()
                ),
                Verdict::Kick { stuck_for } => {
                    info!(
                        "{}: idle/denied for {} seconds; kicking...",
                        ctx.path(),
                        stuck_for.as_secs()
                    );
                    ctx.start_kick(kicker);
                }
            }
        });
    }
}
