//! Injectable time source.
//!
//! Certificate validity checks compare against "now". Reading the wall
//! clock directly would make the single-current-alias invariant impossible
//! to test deterministically, so every component that needs the current
//! instant takes a [`Clock`] instead.

use chrono::NaiveDateTime;
use parking_lot::RwLock;

/// Source of the current instant, in the service's local time zone.
///
/// Caller-supplied timestamps and stored validity windows are all naive
/// local date-times; the clock produces instants in the same frame.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Manually controlled clock for tests.
///
/// # Examples
///
/// ```
/// use keymint_keymanager::clock::{Clock, FixedClock};
///
/// let clock = FixedClock::at("2024-01-01T00:00:00".parse().unwrap());
/// assert_eq!(clock.now().to_string(), "2024-01-01 00:00:00");
///
/// clock.set("2024-06-01T12:00:00".parse().unwrap());
/// assert_eq!(clock.now().to_string(), "2024-06-01 12:00:00");
/// ```
#[derive(Debug)]
pub struct FixedClock {
    instant: RwLock<NaiveDateTime>,
}

impl FixedClock {
    /// Creates a clock pinned at the given instant.
    #[must_use]
    pub fn at(instant: NaiveDateTime) -> Self {
        Self { instant: RwLock::new(instant) }
    }

    /// Moves the clock to a new instant.
    pub fn set(&self, instant: NaiveDateTime) {
        *self.instant.write() = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.instant.read()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_fixed_clock_stays_put_until_set() {
        let clock = FixedClock::at("2024-01-01T00:00:00".parse().unwrap());
        assert_eq!(clock.now(), clock.now());

        clock.set("2025-01-01T00:00:00".parse().unwrap());
        assert_eq!(clock.now(), "2025-01-01T00:00:00".parse::<chrono::NaiveDateTime>().unwrap());
    }
}
