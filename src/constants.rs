//! # System Constants
//!
//! Fixed values shared by the poller, the gateways and the orchestration
//! facade, plus the status groupings of the job execution service.

pub use crate::state_machine::LifecycleStatus;

/// Status groupings used by the poller
pub mod status_groups {
    use super::LifecycleStatus;

    /// Statuses after which the job will not change again
    pub const END_STATUSES: &[LifecycleStatus] = &[
        LifecycleStatus::Completed,
        LifecycleStatus::Failed,
        LifecycleStatus::Cancelled,
        LifecycleStatus::PartialResult,
    ];

    /// Terminal statuses that permit result collection
    pub const RESULT_STATUSES: &[LifecycleStatus] =
        &[LifecycleStatus::Completed, LifecycleStatus::PartialResult];
}

/// System-wide constants
pub mod system {
    use std::time::Duration;

    /// Interval between status queries and between result collection rounds
    pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(10);

    /// Upper bound on a single poll before it reports a timeout
    pub const DEFAULT_POLLING_TIMEOUT: Duration = Duration::from_secs(60 * 60);

    pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

    /// File name every site writes its partial result to, before the extension
    pub const RESULT_OBJECT_STEM: &str = "output";

    pub const DEFAULT_OUTPUT_FORMAT: &str = "json";

    /// Column holding the count in contingency table payloads
    pub const COUNT_COLUMN: &str = "n";

    /// Delimiter used by the delimited-text payload encoding
    pub const FIELD_DELIMITER: char = ',';

    /// Compression bound for merged percentile sketches
    pub const SKETCH_MAX_CENTROIDS: usize = 100;
}

/// Field names of the sufficient statistics
pub mod fields {
    pub const N: &str = "n";
    pub const TOTAL: &str = "total";
    pub const SUM_X: &str = "sum_x";
    pub const SUM_Y: &str = "sum_y";
    pub const SUM_XY: &str = "sum_xy";
    pub const SUM_X2: &str = "sum_x2";
    pub const SUM_Y2: &str = "sum_y2";
    pub const CONTINGENCY_TABLE: &str = "contingency_table";
    pub const PERCENTILE_SKETCH: &str = "percentile_sketch";
}
