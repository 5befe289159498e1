// The authoritative per-auction countdown.

/// Outcome of advancing the countdown by one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Still running. `persist` is set every `persist_every` seconds.
    Running { remaining: u32, persist: bool },
    /// Reached zero on this tick. Reported once per countdown.
    Expired,
    /// Already at zero and reported; nothing to do.
    Stopped,
}

/// Seconds remaining on the active auction.
///
/// Pure bookkeeping: the engine drives it once per second and acts on the
/// returned [`Tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
    persist_every: u32,
    since_persist: u32,
    expired_reported: bool,
}

impl Countdown {
    pub fn start(secs: u32, persist_every: u32) -> Self {
        Countdown {
            remaining: secs,
            persist_every: persist_every.max(1),
            since_persist: 0,
            expired_reported: false,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    pub fn tick(&mut self) -> Tick {
        if self.remaining == 0 {
            if self.expired_reported {
                return Tick::Stopped;
            }
            self.expired_reported = true;
            return Tick::Expired;
        }

        self.remaining -= 1;
        if self.remaining == 0 {
            self.expired_reported = true;
            return Tick::Expired;
        }

        self.since_persist += 1;
        let persist = self.since_persist >= self.persist_every;
        if persist {
            self.since_persist = 0;
        }
        Tick::Running {
            remaining: self.remaining,
            persist,
        }
    }

    /// Raise the remaining time to at least `secs`. Never shortens.
    pub fn extend_to(&mut self, secs: u32) {
        if secs > self.remaining {
            self.remaining = secs;
            self.expired_reported = false;
        }
    }

    /// Whether a client claiming expiry is close enough to be believed.
    pub fn within_grace(&self, grace_secs: u32) -> bool {
        self.remaining <= grace_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_and_expires_once() {
        let mut countdown = Countdown::start(3, 10);
        assert_eq!(
            countdown.tick(),
            Tick::Running {
                remaining: 2,
                persist: false
            }
        );
        assert_eq!(
            countdown.tick(),
            Tick::Running {
                remaining: 1,
                persist: false
            }
        );
        assert_eq!(countdown.tick(), Tick::Expired);
        assert!(countdown.is_expired());
        assert_eq!(countdown.tick(), Tick::Stopped);
        assert_eq!(countdown.tick(), Tick::Stopped);
    }

    #[test]
    fn persists_at_bounded_frequency() {
        let mut countdown = Countdown::start(60, 5);
        let persisted: Vec<u32> = (0..20)
            .filter_map(|_| match countdown.tick() {
                Tick::Running {
                    remaining,
                    persist: true,
                } => Some(remaining),
                _ => None,
            })
            .collect();
        assert_eq!(persisted, vec![55, 50, 45, 40]);
    }

    #[test]
    fn extension_never_shortens() {
        let mut countdown = Countdown::start(60, 5);
        countdown.extend_to(30);
        assert_eq!(countdown.remaining(), 60);

        for _ in 0..50 {
            countdown.tick();
        }
        assert_eq!(countdown.remaining(), 10);
        countdown.extend_to(30);
        assert_eq!(countdown.remaining(), 30);
    }

    #[test]
    fn resumed_at_zero_expires_on_first_tick() {
        let mut countdown = Countdown::start(0, 5);
        assert_eq!(countdown.tick(), Tick::Expired);
        assert_eq!(countdown.tick(), Tick::Stopped);
    }

    #[test]
    fn grace_window() {
        let mut countdown = Countdown::start(3, 5);
        assert!(!countdown.within_grace(1));
        countdown.tick();
        countdown.tick();
        assert!(countdown.within_grace(1));
    }
}
