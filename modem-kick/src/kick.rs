//! The kick: disable, drop to low power and re-enable a modem, one step at a
//! time, each step behind a fixed delay.
//!
//! A [`KickOperation`] never does anything by itself. Timers and ModemManager
//! calls run as detached tasks that report back through [`Event::StepDue`] and
//! [`Event::StepDone`], and the daemon feeds those back into the operation via
//! [`Kicker`]. Both events carry the [`KickId`] they were issued for, so anything
//! arriving for a cancelled or superseded operation can be told apart and dropped.

use crate::{
    daemon::{Event, EventSender},
    modem::{ModemControl, ModemPath},
};
use color_eyre::Result;
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::{task, time};
use tokio_util::{sync::CancellationToken, task::AbortOnDropHandle};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickStep {
    Disable,
    LowPower,
    Enable,
    Finish,
}

impl KickStep {
    pub fn next(self) -> Self {
        match self {
            Self::Disable => Self::LowPower,
            Self::LowPower => Self::Enable,
            Self::Enable | Self::Finish => Self::Finish,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::LowPower => "low-power",
            Self::Enable => "enable",
            Self::Finish => "finish",
        }
    }

    async fn invoke(self, control: &dyn ModemControl) -> Result<()> {
        match self {
            Self::Disable => control.disable().await,
            Self::LowPower => control.set_power_state_low().await,
            Self::Enable => control.enable().await,
            Self::Finish => Ok(()),
        }
    }
}

impl Display for KickStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique for the lifetime of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KickId(u64);

/// One in-flight recovery attempt for one modem.
///
/// Dropping it cancels it: the pending timer is aborted and the in-flight call,
/// if any, observes the cancellation token and reports nothing.
#[derive(Debug)]
pub struct KickOperation {
    id: KickId,
    step: KickStep,
    tries: u32,
    exhausted: bool,
    cancel: CancellationToken,
    pending: Option<AbortOnDropHandle<()>>,
}

impl KickOperation {
    pub fn id(&self) -> KickId {
        self.id
    }

    pub fn step(&self) -> KickStep {
        self.step
    }

    /// Failed calls so far, across all steps.
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Whether the retry budget ran out and the operation is winding down.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn has_pending_timer(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for KickOperation {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Returned by [`Kicker::step_due`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Running,
    /// The operation reached [`KickStep::Finish`] and must be released.
    Finished,
}

/// Creates kick operations and drives them from step to step.
pub struct Kicker {
    events: EventSender,
    step_delay: Duration,
    max_retries: u32,
    next_id: u64,
}

impl Kicker {
    pub fn new(events: EventSender, step_delay: Duration, max_retries: u32) -> Self {
        Self {
            events,
            step_delay,
            max_retries,
            next_id: 0,
        }
    }

    /// Creates a new operation with its first step armed.
    pub fn start(&mut self, path: &ModemPath) -> KickOperation {
        self.next_id += 1;
        let mut op = KickOperation {
            id: KickId(self.next_id),
            step: KickStep::Disable,
            tries: 0,
            exhausted: false,
            cancel: CancellationToken::new(),
            pending: None,
        };
        self.arm(&mut op, path, KickStep::Disable);

        op
    }

    /// The timer armed for `op` fired.
    pub fn step_due(
        &self,
        op: &mut KickOperation,
        path: &ModemPath,
        control: &Arc<dyn ModemControl>,
    ) -> Progress {
        op.pending = None;

        match op.step {
            KickStep::Finish => Progress::Finished,
            step => {
                info!("{path}: kick step {step} (failures so far: {})", op.tries);
                self.call(op, path, step, Arc::clone(control));
                Progress::Running
            }
        }
    }

    /// The call issued for the current step of `op` returned.
    pub fn step_done(&self, op: &mut KickOperation, path: &ModemPath, result: Result<()>) {
        let step = op.step;
        match result {
            Ok(()) => self.arm(op, path, step.next()),
            Err(e) => {
                warn!("{path}: kick step {step} failed: {e}");
                op.tries += 1;
                if op.tries > self.max_retries {
                    warn!("{path}: too many retries; failing kick");
                    op.exhausted = true;
                    self.arm(op, path, KickStep::Finish);
                } else {
                    self.arm(op, path, step);
                }
            }
        }
    }

    fn arm(&self, op: &mut KickOperation, path: &ModemPath, step: KickStep) {
        assert!(
            op.pending.is_none(),
            "{path}: kick step {step} armed while another step is still pending"
        );

        op.step = step;

        let events = self.events.clone();
        let path = path.clone();
        let kick = op.id;
        let delay = self.step_delay;
        let timer = task::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(Event::StepDue { path, kick });
        });

        op.pending = Some(AbortOnDropHandle::new(timer));
    }

    fn call(
        &self,
        op: &KickOperation,
        path: &ModemPath,
        step: KickStep,
        control: Arc<dyn ModemControl>,
    ) {
        let events = self.events.clone();
        let path = path.clone();
        let kick = op.id;
        let cancel = op.cancel.clone();

        task::spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = step.invoke(control.as_ref()) => result,
            };

            let _ = events.send(Event::StepDone { path, kick, result });
        });
    }
}
