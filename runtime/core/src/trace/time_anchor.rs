/// Correlates a wall-clock time with a monotonic instant.
///
/// Event timestamps are monotonic nanoseconds relative to the anchor;
/// consumers use the anchor's wall-clock time to recover real timestamps.
#[derive(Debug, Clone)]
pub struct TimeAnchor {
    /// The wall-clock time at anchor creation.
    pub system_time: chrono::DateTime<chrono::Utc>,

    /// The monotonic instant at anchor creation.
    pub instant: std::time::Instant,
}

impl Default for TimeAnchor {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeAnchor {
    pub fn new() -> Self {
        TimeAnchor {
            system_time: chrono::Utc::now(),
            instant: std::time::Instant::now(),
        }
    }

    /// Monotonic nanoseconds since the anchor was created.
    pub fn nanos_since_start(&self) -> u64 {
        let nanos = self.instant.elapsed().as_nanos();
        if nanos > u64::MAX as u128 {
            u64::MAX
        } else {
            nanos as u64
        }
    }

    /// The anchor's wall-clock time in RFC 3339 form, for handing to
    /// consumers alongside the stream.
    pub fn wall_clock(&self) -> String {
        self.system_time
            .to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
    }
}
