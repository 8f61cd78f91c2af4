use std::time::{Duration, Instant};

/// Wall clock cutoff handed down into every oracle call.
///
/// `Deadline::never()` means no limit. All remaining-time computations
/// saturate at zero, so an expired deadline reports `Duration::ZERO`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    #[inline]
    pub fn never() -> Self {
        Deadline { at: None }
    }

    #[inline]
    pub fn at(instant: Instant) -> Self {
        Deadline { at: Some(instant) }
    }

    /// Deadline `budget` from now. Budgets too large to represent mean no limit.
    pub fn after(budget: Duration) -> Self {
        Deadline {
            at: Instant::now().checked_add(budget),
        }
    }

    #[inline]
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        match self.at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Remaining time, `None` when unlimited.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Remaining seconds, `f64::INFINITY` when unlimited.
    pub fn remaining_secs(&self) -> f64 {
        self.remaining()
            .map_or(f64::INFINITY, |r| r.as_secs_f64())
    }

    /// The earlier of both deadlines.
    pub fn earliest(self, other: Deadline) -> Deadline {
        match (self.at, other.at) {
            (Some(a), Some(b)) => Deadline::at(a.min(b)),
            (Some(_), None) => self,
            (None, _) => other,
        }
    }

    /// Sub-deadline granting at most `budget` from now, never past `self`.
    pub fn slice(&self, budget: Duration) -> Deadline {
        Deadline::after(budget).earliest(*self)
    }

    /// Deadline placed at `fraction` of the way from `start` to `self`.
    /// Unlimited deadlines stay unlimited.
    pub fn fraction_from(&self, start: Instant, fraction: f64) -> Deadline {
        match self.at {
            Some(at) => {
                let span = at.saturating_duration_since(start);
                let fraction = fraction.clamp(0.0, 1.0);
                Deadline::at(start + span.mul_f64(fraction))
            }
            None => *self,
        }
    }

    /// Extends an expired or nearly expired deadline so that at least
    /// `grace` remains from now.
    pub fn at_least(&self, grace: Duration) -> Deadline {
        match self.remaining() {
            Some(rem) if rem < grace => Deadline::after(grace),
            _ => *self,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::never()
    }
}
