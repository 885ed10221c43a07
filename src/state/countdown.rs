//! Countdown derived from the shared round start instant.

use crate::dao::models::Millis;

/// Whole seconds left in a round started at `started_at` lasting `duration_sec`.
///
/// A local clock behind the shared instant counts as zero elapsed time.
pub fn remaining(started_at: Millis, duration_sec: u32, now: Millis) -> u32 {
    let elapsed_sec = (now - started_at).max(0) / 1000;
    (i64::from(duration_sec) - elapsed_sec).max(0) as u32
}

/// Local view of the round timer.
///
/// The underlying value always follows the shared `started_at`; only the
/// displayed value can be frozen after this client submits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Countdown {
    started_at: Option<Millis>,
    duration_sec: u32,
    frozen: Option<u32>,
}

impl Countdown {
    /// Track the round started at `started_at`.
    pub fn new(started_at: Millis, duration_sec: u32) -> Self {
        Self {
            started_at: Some(started_at),
            duration_sec,
            frozen: None,
        }
    }

    /// Adopt a newly observed origin. Returns whether anything changed.
    ///
    /// A different `started_at` means a new or restarted round, so a frozen
    /// display is released.
    pub fn resync(&mut self, started_at: Millis, duration_sec: u32) -> bool {
        if self.started_at == Some(started_at) && self.duration_sec == duration_sec {
            return false;
        }
        if self.started_at != Some(started_at) {
            self.frozen = None;
        }
        self.started_at = Some(started_at);
        self.duration_sec = duration_sec;
        true
    }

    /// Seconds left on the shared timer; `None` before any round is known.
    pub fn remaining(&self, now: Millis) -> Option<u32> {
        self.started_at
            .map(|started_at| remaining(started_at, self.duration_sec, now))
    }

    /// Seconds shown to this player.
    pub fn displayed(&self, now: Millis) -> Option<u32> {
        self.frozen.or_else(|| self.remaining(now))
    }

    /// Pin the displayed value to what is left at `now`.
    pub fn freeze(&mut self, now: Millis) {
        if self.frozen.is_none() {
            self.frozen = self.remaining(now);
        }
    }

    /// Whether the displayed value is pinned.
    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Millis = 1_700_000_000_000;

    #[test]
    fn remaining_floors_elapsed_seconds() {
        assert_eq!(remaining(T0, 60, T0), 60);
        assert_eq!(remaining(T0, 60, T0 + 999), 60);
        assert_eq!(remaining(T0, 60, T0 + 1_000), 59);
        assert_eq!(remaining(T0, 60, T0 + 59_999), 1);
        assert_eq!(remaining(T0, 60, T0 + 60_000), 0);
        assert_eq!(remaining(T0, 60, T0 + 61_000), 0);
    }

    #[test]
    fn clock_behind_origin_shows_full_duration() {
        assert_eq!(remaining(T0, 30, T0 - 5_000), 30);
    }

    #[test]
    fn freeze_pins_display_but_not_shared_timer() {
        let mut countdown = Countdown::new(T0, 60);
        countdown.freeze(T0 + 12_500);
        assert!(countdown.is_frozen());
        assert_eq!(countdown.displayed(T0 + 40_000), Some(48));
        assert_eq!(countdown.remaining(T0 + 40_000), Some(20));
    }

    #[test]
    fn new_origin_releases_freeze() {
        let mut countdown = Countdown::new(T0, 60);
        countdown.freeze(T0 + 10_000);
        assert!(!countdown.resync(T0, 60));
        assert!(countdown.is_frozen());

        assert!(countdown.resync(T0 + 90_000, 60));
        assert!(!countdown.is_frozen());
        assert_eq!(countdown.displayed(T0 + 91_000), Some(59));
    }

    #[test]
    fn unknown_round_has_no_countdown() {
        let countdown = Countdown::default();
        assert_eq!(countdown.remaining(T0), None);
        assert_eq!(countdown.displayed(T0), None);
    }
}
