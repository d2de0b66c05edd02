/// Counts consecutive provider failures and trips after a limit.
///
/// Tripping resets the count, so the engine degrades once per run of
/// `limit` failures rather than on every failure after the first trip.
#[derive(Debug, Clone)]
pub struct FailureBreaker {
    limit: u32,
    consecutive: u32,
    trips: u64,
}

impl FailureBreaker {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            consecutive: 0,
            trips: 0,
        }
    }

    /// Returns true when this failure trips the breaker
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        if self.consecutive >= self.limit {
            self.consecutive = 0;
            self.trips += 1;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn trips(&self) -> u64 {
        self.trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_limit_and_rearms() {
        let mut breaker = FailureBreaker::new(3);
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());
        assert_eq!(breaker.consecutive(), 0);
        assert!(!breaker.record_failure());
        assert_eq!(breaker.trips(), 1);
    }

    #[test]
    fn success_clears_the_count() {
        let mut breaker = FailureBreaker::new(2);
        breaker.record_failure();
        breaker.record_success();
        assert!(!breaker.record_failure());
    }
}
