use crate::baseline::Perf;
use crate::config::HarnessConfig;
use crate::limits::LimitKind;
use crate::telemetry::TelemetrySeries;

/// What the sampled tail is expected to look like after a limit was
/// applied. The original sentinel integers (None / -1 / 0 / explicit)
/// made tagged variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expectation {
    /// Log samples only, no judgement.
    None,
    /// Nothing should have moved: every sample within the tolerance band
    /// around the carried continuity value.
    Unchanged,
    /// Throttle cleared (or never effective): every sample within the
    /// tolerance band around baseline.
    Baseline,
    /// Throttle active: a ceiling, not a target band. Samples may sit
    /// below it, never above.
    Ceiling(f64),
}

/// Last observed `{bw, iops}`, carried between sequential test steps so
/// "unchanged" assertions compare against reality rather than plan.
/// `iops` is raw, matching telemetry units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuityState {
    pub bw: f64,
    pub iops: f64,
}

impl ContinuityState {
    pub fn from_perf(perf: &Perf) -> Self {
        Self {
            bw: perf.bw,
            iops: perf.iops,
        }
    }

    fn value_for(&self, kind: LimitKind) -> f64 {
        match kind {
            LimitKind::Bw => self.bw,
            LimitKind::Iops => self.iops,
        }
    }
}

/// Outcome of one convergence check. A comparison miss is a reported
/// failure, never an error.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub passed: bool,
    pub samples_checked: usize,
    pub detail: Option<String>,
}

/// Inspect the trailing samples of `series` against `expectation`.
///
/// Always refreshes `continuity` from the newest sample, pass or fail,
/// so the next step compares against what actually happened.
pub fn check(
    series: &TelemetrySeries,
    kind: LimitKind,
    expectation: Expectation,
    continuity: &mut ContinuityState,
    baseline: &Perf,
    config: &HarnessConfig,
) -> Verdict {
    let tail = series.tail(config.tail_window);
    let mut passed = true;
    let mut detail = None;

    for sample in tail {
        let actual = match kind {
            LimitKind::Bw => sample.bw,
            LimitKind::Iops => sample.iops,
        };
        tracing::debug!(
            bw_mbps = sample.bw,
            kiops = sample.iops / 1000.0,
            "telemetry sample"
        );

        let miss = match expectation {
            Expectation::None => None,
            Expectation::Unchanged => {
                band_miss(actual, continuity.value_for(kind), config.tolerance)
            }
            Expectation::Baseline => {
                band_miss(actual, baseline.value_for(kind), config.tolerance)
            }
            Expectation::Ceiling(limit) => {
                if actual > limit {
                    Some(format!(
                        "expected {kind} <= {limit}, actual = {actual}"
                    ))
                } else {
                    None
                }
            }
        };

        if let Some(msg) = miss {
            tracing::warn!("throttling check failed: {msg}");
            passed = false;
            detail.get_or_insert(msg);
        }
    }

    if let Some(last) = series.last() {
        continuity.bw = last.bw;
        continuity.iops = last.iops;
    }

    Verdict {
        passed,
        samples_checked: tail.len(),
        detail,
    }
}

fn band_miss(actual: f64, expected: f64, tolerance: f64) -> Option<String> {
    let low = expected * (1.0 - tolerance);
    let high = expected * (1.0 + tolerance);
    if actual < low || actual > high {
        Some(format!(
            "expected {expected} within +-{:.0}%, actual = {actual}",
            tolerance * 100.0
        ))
    } else {
        None
    }
}
