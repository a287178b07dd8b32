//! Session id generation
//!
//! Ids are derived from the wall clock in ten-second buckets and rendered
//! as lowercase hex. The generator bumps past the clock-derived value when
//! it would collide, so ids are strictly increasing within a process
//! lifetime even when sessions arrive in the same bucket.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::id::{BUCKET_SECS, EPOCH_OFFSET};

/// Strictly monotonic session id source; owned by the daemon behind a mutex.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Issue the next id as lowercase hex.
    pub fn next_id(&mut self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.next_from(now)
    }

    fn next_from(&mut self, now_secs: u64) -> String {
        let candidate = now_secs.saturating_sub(EPOCH_OFFSET) / BUCKET_SECS;
        let value = if candidate > self.last {
            candidate
        } else {
            self.last + 1
        };
        self.last = value;
        format!("{:x}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_lowercase_hex() {
        let mut generator = IdGenerator::new();
        let id = generator.next_from(EPOCH_OFFSET + 0xabc * BUCKET_SECS);
        assert_eq!(id, "abc");
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_collision_bumps_past_last() {
        let mut generator = IdGenerator::new();
        let now = EPOCH_OFFSET + 500 * BUCKET_SECS;

        let first = generator.next_from(now);
        let second = generator.next_from(now);
        let third = generator.next_from(now);

        assert_eq!(first, format!("{:x}", 500));
        assert_eq!(second, format!("{:x}", 501));
        assert_eq!(third, format!("{:x}", 502));
    }

    #[test]
    fn test_strictly_increasing_even_when_clock_stalls() {
        let mut generator = IdGenerator::new();
        let mut previous = 0u64;
        for _ in 0..50 {
            let id = generator.next_from(EPOCH_OFFSET);
            let value = u64::from_str_radix(&id, 16).unwrap();
            assert!(value > previous || previous == 0);
            previous = value;
        }
    }

    #[test]
    fn test_clock_ahead_of_last_wins() {
        let mut generator = IdGenerator::new();
        generator.next_from(EPOCH_OFFSET + 10 * BUCKET_SECS);
        let id = generator.next_from(EPOCH_OFFSET + 9000 * BUCKET_SECS);
        assert_eq!(id, format!("{:x}", 9000));
    }

    #[test]
    fn test_pre_epoch_clock_saturates() {
        let mut generator = IdGenerator::new();
        assert_eq!(generator.next_from(0), "1");
        assert_eq!(generator.next_from(0), "2");
    }
}
