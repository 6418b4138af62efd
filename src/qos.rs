use crate::baseline::{self, Perf};
use crate::config::HarnessConfig;
use crate::error::{NautilusError, Result};
use crate::limits::{self, LimitKind, LimitSpec, PlannedLimit};
use crate::target::{ControlPlane, Topology};
use crate::telemetry::TelemetrySeries;
use crate::throttle::ThrottleController;
use crate::validator::{self, ContinuityState, Expectation};
use crate::workload::{WorkloadRunner, WorkloadSpec};
use serde_json::{json, Value};
use std::sync::Arc;

/// A named chain of limit steps, executed in order against one workload.
/// Steps are kept as raw rows so a malformed step skips without taking
/// its siblings down.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub steps: Vec<Value>,
}

impl TestCase {
    pub fn new(name: &str, steps: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            steps,
        }
    }
}

/// The stock QoS regression table: resets, rate limits across the
/// percentage range (including one past baseline), absolute floors,
/// alternating bw/iops chains, and per-volume mixed ranges.
pub fn default_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::new("Reset Throttling", vec![json!(["reset", "", ""])]),
        TestCase::new(
            "Reset Throttling",
            vec![json!(["bw", "value", "100"]), json!(["reset", "", ""])],
        ),
        TestCase::new(
            "Throttle Max BW to 10% of Base Performance",
            vec![json!(["bw", "rate", "10"])],
        ),
        TestCase::new(
            "Throttle Max IOPS to 10% of Base Performance",
            vec![json!(["iops", "rate", "10"])],
        ),
        TestCase::new(
            "Throttle Max BW to 50% of Base Performance",
            vec![json!(["bw", "rate", "50"])],
        ),
        TestCase::new(
            "Throttle Max IOPS to 50% of Base Performance",
            vec![json!(["iops", "rate", "50"])],
        ),
        TestCase::new(
            "Throttle Max BW to 90% of Base Performance",
            vec![json!(["bw", "rate", "90"])],
        ),
        TestCase::new(
            "Throttle Max IOPS to 90% of Base Performance",
            vec![json!(["iops", "rate", "90"])],
        ),
        TestCase::new(
            "Throttle Max BW to 150% of Base Performance",
            vec![json!(["bw", "rate", "150"])],
        ),
        TestCase::new(
            "Throttle Max IOPS to 150% of Base Performance",
            vec![json!(["iops", "rate", "150"])],
        ),
        TestCase::new(
            "Throttle Max BW to Min Performance",
            vec![json!(["bw", "value", "10"])],
        ),
        TestCase::new(
            "Throttle Max IOPS to Min Performance",
            vec![json!(["iops", "value", "10"])],
        ),
        TestCase::new(
            "Throttle Both Max BW and IOPS",
            vec![
                json!(["bw", "rate", "20"]),
                json!(["iops", "rate", "50"]),
                json!(["bw", "rate", "50"]),
                json!(["iops", "rate", "30"]),
            ],
        ),
        TestCase::new(
            "Throttle Each Volume with Different Value",
            vec![
                json!(["bw", ["3"], ["50"]]),
                json!(["iops", ["1-2", "4-5"], ["10", "20"]]),
                json!(["bw", ["3"], ["50"]]),
            ],
        ),
    ]
}

/// Result of one executed (not skipped) step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub case_name: String,
    pub step: Value,
    pub passed: bool,
    pub detail: Option<String>,
}

/// Drives one workload's full QoS test sequence: baseline, then every
/// test case's steps raced against in-flight load, each ending in an
/// explicit pass/fail.
pub struct QosScenario {
    controller: ThrottleController,
    runner: Arc<dyn WorkloadRunner>,
    config: HarnessConfig,
}

impl QosScenario {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        topology: Topology,
        runner: Arc<dyn WorkloadRunner>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            controller: ThrottleController::new(control, topology),
            runner,
            config,
        }
    }

    /// Run `cases` against `workload`, measuring its baseline first.
    /// Fails fast only on `BaselineUnavailable`; everything else is
    /// reported per step and the sequence continues.
    pub async fn run(
        &self,
        workload: &WorkloadSpec,
        cases: &[TestCase],
    ) -> Result<Vec<StepReport>> {
        let base = baseline::measure(self.runner.as_ref(), workload).await?;
        self.run_with_baseline(workload, &base, cases).await
    }

    /// Run `cases` against `workload` using an already-measured
    /// baseline, as when a whole suite is baselined up front.
    pub async fn run_with_baseline(
        &self,
        workload: &WorkloadSpec,
        base: &Perf,
        cases: &[TestCase],
    ) -> Result<Vec<StepReport>> {
        let base = *base;
        let mut continuity = ContinuityState::from_perf(&base);
        let mut reports = Vec::new();

        for case in cases {
            tracing::info!(case = %case.name, "**** test case started ****");
            for step in &case.steps {
                let spec = match LimitSpec::parse(step) {
                    Ok(spec) => spec,
                    Err(e) => {
                        tracing::warn!(case = %case.name, %step, error = %e, "invalid step, skipped");
                        continue;
                    }
                };
                let report = self
                    .run_step(workload, case, step, &spec, &base, &mut continuity)
                    .await;
                match &report {
                    Ok(r) if r.passed => tracing::info!(case = %case.name, "throttling success"),
                    Ok(_) => tracing::error!(case = %case.name, "throttling failed"),
                    Err(e) => tracing::error!(case = %case.name, error = %e, "step errored"),
                }
                reports.push(report.unwrap_or_else(|e| StepReport {
                    case_name: case.name.clone(),
                    step: step.clone(),
                    passed: false,
                    detail: Some(e.to_string()),
                }));
            }

            // End-of-case reset, so no limit leaks into the next case.
            if let Err(e) = self.controller.apply(&PlannedLimit::Reset).await {
                tracing::error!(case = %case.name, error = %e, "end-of-case reset failed");
            }
            continuity = ContinuityState::from_perf(&base);
        }
        Ok(reports)
    }

    /// One step: start load, settle, apply the limit, settle, bounded
    /// join, then judge the telemetry tail. All control-plane mutation
    /// stays on this foreground task; the spawned workload only
    /// generates I/O.
    async fn run_step(
        &self,
        workload: &WorkloadSpec,
        case: &TestCase,
        step: &Value,
        spec: &LimitSpec,
        base: &Perf,
        continuity: &mut ContinuityState,
    ) -> Result<StepReport> {
        let planned = limits::plan(spec, base);

        let handle = self.runner.start(workload).await?;
        let result_path = handle.result_path().to_path_buf();
        tokio::time::sleep(self.config.settling_window).await;

        let applied = self.controller.apply(&planned).await;
        tokio::time::sleep(self.config.settling_window).await;

        // A join timeout only bounds the wait; the workload is torn down
        // by scenario wrap-up, not here.
        handle.join(Some(self.config.join_timeout)).await?;

        let series = TelemetrySeries::from_path(&result_path)?;
        let (expectation, kind, control_failed) =
            derive_expectation(&planned, &applied, base);

        let verdict = validator::check(
            &series,
            kind,
            expectation,
            continuity,
            base,
            &self.config,
        );

        let passed = verdict.passed && !control_failed;
        let detail = if control_failed {
            Some(
                applied
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "control plane failure".to_string()),
            )
        } else {
            verdict.detail
        };
        Ok(StepReport {
            case_name: case.name.clone(),
            step: step.clone(),
            passed,
            detail,
        })
    }
}

/// Map what the controller enforced onto what telemetry should show.
///
/// Reset (and any limit the fan-out collapsed to zero, or one planned
/// past baseline) should read as baseline. A failed fan-out should read
/// as no change at all. Uniform iops totals come back in kilo-IOPS and
/// are renormalized to raw IOPS for comparison. Per-volume steps are
/// log-only here; their enforcement is checked through the control
/// plane's recorded limits.
fn derive_expectation(
    planned: &PlannedLimit,
    applied: &std::result::Result<crate::throttle::AppliedOutcome, NautilusError>,
    base: &Perf,
) -> (Expectation, LimitKind, bool) {
    let kind = match planned {
        PlannedLimit::Reset => LimitKind::Bw,
        PlannedLimit::Uniform { kind, .. } | PlannedLimit::PerVolume { kind, .. } => *kind,
    };

    let outcome = match applied {
        Ok(outcome) => outcome,
        Err(_) => return (Expectation::Unchanged, kind, true),
    };

    match planned {
        PlannedLimit::Reset => (Expectation::Baseline, kind, false),
        PlannedLimit::PerVolume { .. } => (Expectation::None, kind, false),
        PlannedLimit::Uniform { kind, .. } => {
            let observed_total = match kind {
                LimitKind::Bw => outcome.total,
                LimitKind::Iops => outcome.total * 1000.0,
            };
            if observed_total == 0.0 || observed_total > base.value_for(*kind) {
                (Expectation::Baseline, *kind, false)
            } else {
                (Expectation::Ceiling(observed_total), *kind, false)
            }
        }
    }
}
