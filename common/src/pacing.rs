use crate::types::Reading;

/// A DHT22 needs this long between two conversions.
pub const DHT22_MIN_READ_INTERVAL_MS: u64 = 2_000;

/// Remembers the last sensor result so a read requested before the sensor is
/// ready again returns that result instead of touching the bus.
///
/// Failed reads are remembered too; retrying inside the window would only
/// fail again.
#[derive(Debug, Clone)]
pub struct ReadCache {
    min_interval_ms: u64,
    last: Option<(u64, Reading)>,
}

impl ReadCache {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last: None,
        }
    }

    /// Returns the cached reading while it is fresh, otherwise calls `read`.
    pub fn read_with(&mut self, now_ms: u64, read: impl FnOnce() -> Reading) -> Reading {
        if let Some((taken_ms, reading)) = self.last {
            if now_ms.saturating_sub(taken_ms) < self.min_interval_ms {
                return reading;
            }
        }

        let reading = read();
        self.last = Some((now_ms, reading));
        reading
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new(DHT22_MIN_READ_INTERVAL_MS)
    }
}
