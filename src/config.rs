use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the QoS and SPOR scenario drivers.
///
/// The sleep/timeout values are settling-time heuristics inherited from
/// field testing, not derived constants. The tolerance band absorbs the
/// race between workload ramp-up and limit application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Delay after starting a workload or applying a limit before
    /// telemetry is trusted to reflect it.
    pub settling_window: Duration,

    /// Upper bound on waiting for an in-flight workload during a QoS
    /// step. A timeout does not cancel the workload.
    pub join_timeout: Duration,

    /// Relative tolerance for band checks (0.10 = +-10%).
    pub tolerance: f64,

    /// Number of trailing telemetry samples inspected per validation.
    pub tail_window: usize,

    /// Fraction of the planned write duration after which a SPOR is
    /// triggered in single-volume fault scenarios.
    pub crash_fraction: f64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            settling_window: Duration::from_secs(1),
            join_timeout: Duration::from_secs(60),
            tolerance: 0.10,
            tail_window: 3,
            crash_fraction: 0.5,
        }
    }
}

impl HarnessConfig {
    /// Config with near-zero sleeps, for tests that should not wait on
    /// real settling windows.
    pub fn fast() -> Self {
        Self {
            settling_window: Duration::from_millis(5),
            join_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}
