use crate::error::{NautilusError, Result};
use crate::limits::LimitKind;
use crate::telemetry::TelemetrySeries;
use crate::workload::{WorkloadRunner, WorkloadSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Steady-state throughput/IOPS pair. `bw` in MB/s, `iops` raw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Perf {
    pub bw: f64,
    pub iops: f64,
}

impl Perf {
    pub fn value_for(&self, kind: LimitKind) -> f64 {
        match kind {
            LimitKind::Bw => self.bw,
            LimitKind::Iops => self.iops,
        }
    }
}

/// Unthrottled reference performance per workload. Written once by
/// `measure`, read-only afterwards; every relative limit for a workload
/// is anchored on its entry here.
#[derive(Debug, Clone, Default)]
pub struct BaselinePerformance {
    perfs: BTreeMap<String, Perf>,
}

impl BaselinePerformance {
    pub fn insert(&mut self, workload: &str, perf: Perf) {
        self.perfs.insert(workload.to_string(), perf);
    }

    pub fn get(&self, workload: &str) -> Option<&Perf> {
        self.perfs.get(workload)
    }
}

/// Baseline every workload of a suite up front. Stops at the first
/// failure: a workload without a baseline has no runnable test sequence.
pub async fn measure_all(
    runner: &dyn WorkloadRunner,
    specs: &[WorkloadSpec],
) -> Result<BaselinePerformance> {
    let mut baselines = BaselinePerformance::default();
    for spec in specs {
        let perf = measure(runner, spec).await?;
        baselines.insert(&spec.name, perf);
    }
    Ok(baselines)
}

/// Run `spec` unthrottled to natural completion and take the tail sample
/// as the steady-state reference. Warm-up trimming is the load
/// generator's configuration concern; by the tail of the run it has
/// elapsed.
///
/// Any failure here is `BaselineUnavailable`: without this number no
/// relative limit for the workload can be computed, so the caller must
/// abandon the workload's whole test sequence.
pub async fn measure(runner: &dyn WorkloadRunner, spec: &WorkloadSpec) -> Result<Perf> {
    tracing::info!(workload = %spec.name, "measuring baseline performance");

    let handle = runner.start(spec).await.map_err(|e| {
        tracing::error!(workload = %spec.name, error = %e, "baseline run failed to start");
        NautilusError::BaselineUnavailable(spec.name.clone())
    })?;
    let result_path = handle.result_path().to_path_buf();

    // Not time-boxed: the entire suite's tolerances anchor on this run.
    handle.join(None).await.map_err(|e| {
        tracing::error!(workload = %spec.name, error = %e, "baseline run failed");
        NautilusError::BaselineUnavailable(spec.name.clone())
    })?;

    let series = TelemetrySeries::from_path(&result_path).map_err(|e| {
        tracing::error!(workload = %spec.name, error = %e, "baseline telemetry unreadable");
        NautilusError::BaselineUnavailable(spec.name.clone())
    })?;

    let last = series
        .last()
        .ok_or_else(|| NautilusError::BaselineUnavailable(spec.name.clone()))?;
    let perf = Perf {
        bw: last.bw,
        iops: last.iops,
    };
    tracing::info!(
        workload = %spec.name,
        bw_mbps = perf.bw,
        kiops = perf.iops / 1000.0,
        "baseline established"
    );
    Ok(perf)
}
