use std::time::Duration;

/// Tail configuration. Always a concrete value: `SyncOptions::default()`
/// covers "unspecified" rather than callers passing a null sentinel.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Enables periodic persistence of the in-memory checkpoint.
    pub checkpoint: bool,
    /// Interval between checkpoint flushes.
    pub check_point_period: Duration,
    /// Overrides the starting oplog epoch; 0 means "use the stored checkpoint".
    ///
    /// The checkpoint this produces is advanced on dispatch, not on
    /// acknowledged SQL apply: an op that errors is dropped while the
    /// checkpoint races past it. This is an intentional at-least-once
    /// tradeoff, not an oversight (see DESIGN.md).
    pub last_epoch: i64,
    /// Interval between reporter ticks.
    pub report_period: Duration,
    /// Size of the shared overflow worker pool.
    pub overflow_workers: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            checkpoint: true,
            check_point_period: Duration::from_secs(60),
            last_epoch: 0,
            report_period: Duration::from_secs(60),
            overflow_workers: 500,
        }
    }
}

impl SyncOptions {
    pub fn with_checkpoint(mut self, checkpoint: bool) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn with_check_point_period(mut self, period: Duration) -> Self {
        self.check_point_period = period;
        self
    }

    pub fn with_last_epoch(mut self, epoch: i64) -> Self {
        self.last_epoch = epoch;
        self
    }

    pub fn with_report_period(mut self, period: Duration) -> Self {
        self.report_period = period;
        self
    }

    pub fn with_overflow_workers(mut self, workers: usize) -> Self {
        self.overflow_workers = workers;
        self
    }
}

/// Options for the one-shot full replicator.
#[derive(Debug, Clone)]
pub struct FullReplicateOptions {
    /// Size of the write-side worker pool.
    pub workers: usize,
}

impl Default for FullReplicateOptions {
    fn default() -> Self {
        FullReplicateOptions { workers: 500 }
    }
}

impl FullReplicateOptions {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let o = SyncOptions::default();
        assert!(o.checkpoint);
        assert_eq!(o.check_point_period, Duration::from_secs(60));
        assert_eq!(o.last_epoch, 0);
        assert_eq!(o.report_period, Duration::from_secs(60));
        assert_eq!(o.overflow_workers, 500);
    }

    #[test]
    fn builder_overrides_compose() {
        let o = SyncOptions::default()
            .with_checkpoint(false)
            .with_last_epoch(42);
        assert!(!o.checkpoint);
        assert_eq!(o.last_epoch, 42);
        assert_eq!(o.report_period, Duration::from_secs(60));
    }
}
