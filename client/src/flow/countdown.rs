//! Pure purchase-window countdown.
//!
//! The countdown is plain state ticked by the reducer at 1 Hz; the runtime
//! supplies the seconds via a cancellable delay chain. Keeping the arithmetic
//! here makes the exactly-once expiry property a unit test instead of a
//! timing assertion.

/// Countdown state: seconds remaining, whether ticking, whether it already
/// fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownState {
    remaining: u32,
    running: bool,
    fired: bool,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running - a stale tick from a cancelled or paused chain
    Idle,
    /// Still counting; seconds remaining
    Running(u32),
    /// Reached zero on this tick. Reported exactly once per start.
    Expired,
}

impl CountdownState {
    /// A countdown that has never been started.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            remaining: 0,
            running: false,
            fired: false,
        }
    }

    /// Start (or restart) at the given number of seconds.
    pub fn start(&mut self, seconds: u32) {
        self.remaining = seconds;
        self.running = seconds > 0;
        self.fired = false;
    }

    /// Stop without firing; a later [`CountdownState::start`] rearms.
    pub fn cancel(&mut self) {
        self.running = false;
    }

    /// Suspend ticking, keeping the remaining seconds.
    pub fn pause(&mut self) {
        if !self.fired {
            self.running = false;
        }
    }

    /// Resume after a pause.
    pub fn resume(&mut self) {
        if !self.fired && self.remaining > 0 {
            self.running = true;
        }
    }

    /// Advance one second.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.running {
            return TickOutcome::Idle;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.running = false;
            self.fired = true;
            TickOutcome::Expired
        } else {
            TickOutcome::Running(self.remaining)
        }
    }

    /// Seconds remaining.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Whether the countdown is ticking.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Whether expiry has already been reported.
    #[must_use]
    pub const fn has_fired(&self) -> bool {
        self.fired
    }
}

impl Default for CountdownState {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_run_fires_exactly_once() {
        let mut countdown = CountdownState::idle();
        countdown.start(900);

        let mut expirations = 0;
        for _ in 0..900 {
            if countdown.tick() == TickOutcome::Expired {
                expirations += 1;
            }
        }
        assert_eq!(countdown.remaining(), 0);
        assert_eq!(expirations, 1);

        // Ticks after expiry are inert.
        assert_eq!(countdown.tick(), TickOutcome::Idle);
        assert!(countdown.has_fired());
    }

    #[test]
    fn pause_and_resume_keep_remaining() {
        let mut countdown = CountdownState::idle();
        countdown.start(10);
        assert_eq!(countdown.tick(), TickOutcome::Running(9));

        countdown.pause();
        assert_eq!(countdown.tick(), TickOutcome::Idle);
        assert_eq!(countdown.remaining(), 9);

        countdown.resume();
        assert_eq!(countdown.tick(), TickOutcome::Running(8));
    }

    #[test]
    fn restart_rearms_after_fire() {
        let mut countdown = CountdownState::idle();
        countdown.start(1);
        assert_eq!(countdown.tick(), TickOutcome::Expired);

        countdown.start(2);
        assert!(!countdown.has_fired());
        assert_eq!(countdown.tick(), TickOutcome::Running(1));
        assert_eq!(countdown.tick(), TickOutcome::Expired);
    }

    #[test]
    fn cancelled_countdown_ignores_ticks() {
        let mut countdown = CountdownState::idle();
        countdown.start(5);
        countdown.cancel();
        assert_eq!(countdown.tick(), TickOutcome::Idle);
        assert!(!countdown.has_fired());
    }

    #[test]
    fn starting_at_zero_never_runs() {
        let mut countdown = CountdownState::idle();
        countdown.start(0);
        assert!(!countdown.is_running());
        assert_eq!(countdown.tick(), TickOutcome::Idle);
    }
}
