//! Decides, on every sweep, whether a stuck modem is due for a kick.

use crate::registration::StuckTracker;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    NotStuck,
    Wait { remaining: Duration },
    Kick { stuck_for: Duration },
}

/// A modem is due once it has been stuck for strictly longer than `threshold`.
pub fn assess(stuck: &StuckTracker, now: Instant, threshold: Duration) -> Verdict {
    let Some(stuck_for) = stuck.stuck_for(now) else {
        return Verdict::NotStuck;
    };

    if stuck_for > threshold {
        Verdict::Kick { stuck_for }
    } else {
        Verdict::Wait {
            remaining: threshold - stuck_for,
        }
    }
}
