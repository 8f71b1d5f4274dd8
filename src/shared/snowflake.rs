//! Snowflake ID Generator
//!
//! Twitter-style distributed unique ID generation. Used to assign final
//! message IDs at buffer-append time, so clients never see a temporary ID
//! that later has to be remapped after the write-behind flush.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Custom epoch (2024-01-01T00:00:00.000Z)
const RELAY_EPOCH: u64 = 1704067200000;

/// Highest sequence value that fits in the 12 sequence bits.
const SEQUENCE_MAX: u64 = 0xFFF;

/// Snowflake ID generator
pub struct SnowflakeGenerator {
    machine_id: u64,
    node_id: u64,
    /// (last timestamp, next sequence within that millisecond). Updated
    /// under one lock so concurrent calls never reuse a sequence slot.
    state: Mutex<(u64, u64)>,
}

impl SnowflakeGenerator {
    /// Create a new snowflake generator
    pub fn new(machine_id: u64, node_id: u64) -> Self {
        Self {
            machine_id: machine_id & 0x1F, // 5 bits
            node_id: node_id & 0x1F,       // 5 bits
            state: Mutex::new((0, 0)),
        }
    }

    /// Generate a new snowflake ID
    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock();
        let (last, next_seq) = *state;
        let mut timestamp = self.current_timestamp().max(last);

        let sequence = if timestamp > last {
            0
        } else if next_seq <= SEQUENCE_MAX {
            next_seq
        } else {
            // Sequence space exhausted, wait out the millisecond.
            while timestamp <= last {
                timestamp = self.current_timestamp();
            }
            0
        };
        *state = (timestamp, sequence + 1);

        let id = ((timestamp - RELAY_EPOCH) << 22)
            | (self.machine_id << 17)
            | (self.node_id << 12)
            | sequence;

        id as i64
    }

    /// Get current timestamp in milliseconds
    fn current_timestamp(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }
}

/// Extract timestamp from snowflake ID
pub fn extract_timestamp(snowflake: i64) -> u64 {
    ((snowflake as u64) >> 22) + RELAY_EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique() {
        let gen = SnowflakeGenerator::new(1, 0);
        let mut ids = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(gen.generate()));
        }
    }

    #[test]
    fn test_ids_monotonic_per_generator() {
        let gen = SnowflakeGenerator::new(1, 0);
        let a = gen.generate();
        let b = gen.generate();
        assert!(b > a);
    }

    #[test]
    fn test_burst_ids_strictly_increase() {
        // More IDs than one millisecond's sequence space holds, so the
        // rollover into the next millisecond is exercised too.
        let gen = SnowflakeGenerator::new(1, 0);
        let mut prev = gen.generate();
        for _ in 0..5000 {
            let next = gen.generate();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_extract_timestamp() {
        let gen = SnowflakeGenerator::new(1, 0);
        let id = gen.generate();
        let ts = extract_timestamp(id);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert!(now - ts < 5000);
    }
}
