//! 3GPP registration state and the "stuck since" bookkeeping derived from it.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use std::{fmt::Display, time::Duration};
use tokio::time::Instant;

/// `MMModem3gppRegistrationState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum RegistrationState {
    Idle = 0,
    Home = 1,
    Searching = 2,
    Denied = 3,
    Unknown = 4,
    Roaming = 5,
    HomeSmsOnly = 6,
    RoamingSmsOnly = 7,
    EmergencyOnly = 8,
    HomeCsfbNotPreferred = 9,
    RoamingCsfbNotPreferred = 10,
    AttachedRlos = 11,
}

impl RegistrationState {
    /// Values ModemManager may add in the future map to [`RegistrationState::Unknown`].
    pub fn from_raw(raw: u32) -> Self {
        Self::from_u32(raw).unwrap_or(Self::Unknown)
    }

    /// Not attached to a network and not trying to attach either.
    pub fn is_stuck(self) -> bool {
        matches!(self, Self::Idle | Self::Denied)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Home => "home",
            Self::Searching => "searching",
            Self::Denied => "denied",
            Self::Unknown => "unknown",
            Self::Roaming => "roaming",
            Self::HomeSmsOnly => "home-sms-only",
            Self::RoamingSmsOnly => "roaming-sms-only",
            Self::EmergencyOnly => "emergency-only",
            Self::HomeCsfbNotPreferred => "home-csfb-not-preferred",
            Self::RoamingCsfbNotPreferred => "roaming-csfb-not-preferred",
            Self::AttachedRlos => "attached-rlos",
        }
    }
}

impl Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single observation did to a [`StuckTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckChange {
    /// The modem just became idle/denied.
    Began,
    /// Still idle/denied, or still registered.
    Unchanged,
    /// The modem left idle/denied.
    Cleared,
}

/// Remembers since when a modem has been continuously idle or denied.
///
/// `since` is `Some` iff the last observed state was idle or denied. Repeated
/// idle/denied observations keep the original onset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StuckTracker {
    since: Option<Instant>,
}

impl StuckTracker {
    pub fn observe(&mut self, state: RegistrationState, now: Instant) -> StuckChange {
        match (state.is_stuck(), self.since) {
            (true, None) => {
                self.since = Some(now);
                StuckChange::Began
            }
            (false, Some(_)) => {
                self.since = None;
                StuckChange::Cleared
            }
            _ => StuckChange::Unchanged,
        }
    }

    pub fn since(&self) -> Option<Instant> {
        self.since
    }

    pub fn stuck_for(&self, now: Instant) -> Option<Duration> {
        self.since.map(|since| now.saturating_duration_since(since))
    }
}
