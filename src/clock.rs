//! Millisecond time source used for integral timing.

/// A monotonically non-decreasing millisecond counter.
///
/// The counter may wrap around at `u32::MAX`; use [`elapsed_millis`] to take
/// differences.
pub trait Clock {
    fn now_millis(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_millis(&self) -> u32 {
        (**self).now_millis()
    }
}

/// Milliseconds from `since` to `now`, correct across a counter rollover.
#[inline]
pub fn elapsed_millis(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// [`Clock`] backed by the embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_millis(&self) -> u32 {
        // Truncation is the rollover handled by `elapsed_millis`.
        embassy_time::Instant::now().as_millis() as u32
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::cell::Cell;

    /// Test clock advanced by hand.
    #[derive(Debug, Default)]
    pub(crate) struct ManualClock {
        now: Cell<u32>,
    }

    impl ManualClock {
        pub(crate) fn starting_at(millis: u32) -> Self {
            Self {
                now: Cell::new(millis),
            }
        }

        pub(crate) fn advance(&self, millis: u32) {
            self.now.set(self.now.get().wrapping_add(millis));
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u32 {
            self.now.get()
        }
    }

    #[test]
    fn elapsed_is_plain_difference_without_rollover() {
        assert_eq!(elapsed_millis(1_500, 1_000), 500);
        assert_eq!(elapsed_millis(7, 7), 0);
    }

    #[test]
    fn elapsed_survives_counter_rollover() {
        let before = u32::MAX - 99;
        let after = before.wrapping_add(250);
        assert_eq!(elapsed_millis(after, before), 250);
    }

    #[test]
    fn manual_clock_advances_through_reference() {
        let clock = ManualClock::starting_at(10);
        let by_ref = &clock;
        clock.advance(15);
        assert_eq!(by_ref.now_millis(), 25);
    }
}
