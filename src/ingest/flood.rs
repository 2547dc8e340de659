//! Flood gate — per-sender cooldown on standalone submissions.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a flood-gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Within the cooldown window; the submission is refused.
    Throttled,
    /// Refused, and the sender hit the strike limit; intake escalates
    /// this to a timed mute.
    Escalated,
}

struct SenderState {
    last_seen: Instant,
    strikes: u32,
}

/// Decides whether an incoming unit is accepted for aggregation.
///
/// Album fragments are always admitted; dropping one would truncate the
/// album. For everything else, a sender is admitted only when the cooldown
/// has elapsed since their last call. The last-seen timestamp updates on
/// every call, admitted or not, so a burst keeps pushing its own window
/// out. Each refusal counts a strike; reaching the strike limit yields
/// `Escalated` once and resets the counter, as does any admitted call.
pub struct FloodGate {
    cooldown: Duration,
    strike_limit: u32,
    senders: Mutex<HashMap<i64, SenderState>>,
}

impl FloodGate {
    pub fn new(cooldown: Duration, strike_limit: u32) -> Self {
        Self {
            cooldown,
            strike_limit: strike_limit.max(1),
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// Check one unit. No side effects beyond the per-sender state.
    pub fn admit(&self, sender_id: i64, correlation_id: Option<&str>) -> Admission {
        self.admit_at(sender_id, correlation_id, Instant::now())
    }

    fn admit_at(&self, sender_id: i64, correlation_id: Option<&str>, now: Instant) -> Admission {
        if correlation_id.is_some() {
            return Admission::Admitted;
        }
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        let Some(state) = senders.get_mut(&sender_id) else {
            senders.insert(
                sender_id,
                SenderState {
                    last_seen: now,
                    strikes: 0,
                },
            );
            return Admission::Admitted;
        };

        if now.duration_since(state.last_seen) >= self.cooldown {
            state.last_seen = now;
            state.strikes = 0;
            return Admission::Admitted;
        }

        state.last_seen = now;
        state.strikes += 1;
        if state.strikes >= self.strike_limit {
            state.strikes = 0;
            Admission::Escalated
        } else {
            Admission::Throttled
        }
    }

    /// Drop entries idle for longer than `idle`.
    pub fn sweep(&self, idle: Duration) {
        self.sweep_at(idle, Instant::now());
    }

    fn sweep_at(&self, idle: Duration, now: Instant) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|_, state| now.duration_since(state.last_seen) < idle);
    }

    #[cfg(test)]
    fn tracked_senders(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(4);

    fn gate() -> FloodGate {
        FloodGate::new(COOLDOWN, 3)
    }

    #[test]
    fn second_submission_within_cooldown_is_refused() {
        let gate = gate();
        let t0 = Instant::now();
        assert_eq!(gate.admit_at(42, None, t0), Admission::Admitted);
        assert_eq!(
            gate.admit_at(42, None, t0 + Duration::from_secs(3)),
            Admission::Throttled
        );
    }

    #[test]
    fn submission_after_cooldown_is_admitted() {
        let gate = gate();
        let t0 = Instant::now();
        assert_eq!(gate.admit_at(42, None, t0), Admission::Admitted);
        assert_eq!(
            gate.admit_at(42, None, t0 + Duration::from_secs(5)),
            Admission::Admitted
        );
    }

    #[test]
    fn burst_does_not_reset_the_window() {
        let gate = gate();
        let t0 = Instant::now();
        assert_eq!(gate.admit_at(42, None, t0), Admission::Admitted);
        // Each refused call still updates the timestamp, so a steady burst
        // stays refused even past the original window.
        assert_ne!(
            gate.admit_at(42, None, t0 + Duration::from_secs(3)),
            Admission::Admitted
        );
        assert_ne!(
            gate.admit_at(42, None, t0 + Duration::from_secs(6)),
            Admission::Admitted
        );
    }

    #[test]
    fn third_strike_escalates_then_resets() {
        let gate = gate();
        let t0 = Instant::now();
        assert_eq!(gate.admit_at(42, None, t0), Admission::Admitted);
        assert_eq!(
            gate.admit_at(42, None, t0 + Duration::from_secs(1)),
            Admission::Throttled
        );
        assert_eq!(
            gate.admit_at(42, None, t0 + Duration::from_secs(2)),
            Admission::Throttled
        );
        assert_eq!(
            gate.admit_at(42, None, t0 + Duration::from_secs(3)),
            Admission::Escalated
        );
        // The counter restarts after an escalation; the next refusal is a
        // plain throttle again.
        assert_eq!(
            gate.admit_at(42, None, t0 + Duration::from_millis(3500)),
            Admission::Throttled
        );
    }

    #[test]
    fn admitted_call_clears_accumulated_strikes() {
        let gate = gate();
        let t0 = Instant::now();
        gate.admit_at(42, None, t0);
        gate.admit_at(42, None, t0 + Duration::from_secs(1));
        gate.admit_at(42, None, t0 + Duration::from_secs(2));
        // Quiet period, then a clean submission.
        assert_eq!(
            gate.admit_at(42, None, t0 + Duration::from_secs(7)),
            Admission::Admitted
        );
        // Two fresh refusals must not inherit the earlier strikes.
        assert_eq!(
            gate.admit_at(42, None, t0 + Duration::from_secs(8)),
            Admission::Throttled
        );
        assert_eq!(
            gate.admit_at(42, None, t0 + Duration::from_secs(9)),
            Admission::Throttled
        );
    }

    #[test]
    fn album_fragments_are_always_admitted() {
        let gate = gate();
        let t0 = Instant::now();
        assert_eq!(gate.admit_at(42, None, t0), Admission::Admitted);
        for i in 0..5 {
            assert_eq!(
                gate.admit_at(42, Some("grp_1"), t0 + Duration::from_millis(i)),
                Admission::Admitted
            );
        }
    }

    #[test]
    fn senders_are_independent() {
        let gate = gate();
        let t0 = Instant::now();
        assert_eq!(gate.admit_at(1, None, t0), Admission::Admitted);
        assert_eq!(gate.admit_at(2, None, t0), Admission::Admitted);
    }

    #[test]
    fn sweep_drops_idle_entries() {
        let gate = gate();
        let t0 = Instant::now();
        gate.admit_at(1, None, t0);
        gate.admit_at(2, None, t0 + Duration::from_secs(3000));
        assert_eq!(gate.tracked_senders(), 2);

        gate.sweep_at(Duration::from_secs(3600), t0 + Duration::from_secs(3700));
        assert_eq!(gate.tracked_senders(), 1);
    }
}
