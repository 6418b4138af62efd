use nautilus::baseline::Perf;
use nautilus::config::HarnessConfig;
use nautilus::limits::LimitKind;
use nautilus::qos::{self, QosScenario, TestCase};
use nautilus::sim::{SimTarget, SimWorkloadRunner};
use nautilus::target::Topology;
use nautilus::workload::WorkloadSpec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn base_perf() -> Perf {
    Perf {
        bw: 1000.0,
        iops: 100_000.0,
    }
}

fn workload() -> WorkloadSpec {
    WorkloadSpec::new("seq_w", 0, 128 * 1024, 4, Duration::from_millis(50))
}

fn harness(volumes: Vec<u32>) -> (Arc<SimTarget>, QosScenario, tempfile::TempDir) {
    let topology = Topology::single_array(0, volumes);
    let target = SimTarget::new(&topology);
    let out_dir = tempfile::tempdir().unwrap();
    let runner = SimWorkloadRunner::new(Arc::clone(&target), out_dir.path().to_path_buf())
        .with_base("seq_w", base_perf());
    let scenario = QosScenario::new(
        Arc::clone(&target) as Arc<dyn nautilus::target::ControlPlane>,
        topology,
        Arc::new(runner),
        HarnessConfig::fast(),
    );
    (target, scenario, out_dir)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bw_rate_limit_fans_out_and_converges() {
    let (target, scenario, _dir) = harness(vec![1, 2, 3, 4]);
    let cases = vec![TestCase::new(
        "Throttle Max BW to 10% of Base Performance",
        vec![json!(["bw", "rate", "10"])],
    )];

    let reports = scenario.run(&workload(), &cases).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].passed, "detail: {:?}", reports[0].detail);

    // 10% of 1000 MB/s split across 4 volumes is 25 MB/s each; the
    // end-of-case reset then clears them again.
    assert_eq!(target.volume_limit(0, 1, LimitKind::Bw), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_volume_limits_hit_only_named_volumes() {
    use nautilus::limits::LimitSpec;
    use nautilus::throttle::ThrottleController;

    let topology = Topology::single_array(0, vec![1, 2, 3]);
    let target = SimTarget::new(&topology);
    let controller = ThrottleController::new(
        Arc::clone(&target) as Arc<dyn nautilus::target::ControlPlane>,
        topology,
    );

    let spec = LimitSpec::parse(&json!(["iops", ["1-2"], ["50"]])).unwrap();
    let planned = nautilus::limits::plan(&spec, &base_perf());
    controller.apply(&planned).await.unwrap();

    assert_eq!(target.volume_limit(0, 1, LimitKind::Iops), Some(50.0));
    assert_eq!(target.volume_limit(0, 2, LimitKind::Iops), Some(50.0));
    assert_eq!(target.volume_limit(0, 3, LimitKind::Iops), None);

    // The same step also runs clean through the full driver.
    let (_target, scenario, _dir) = harness(vec![1, 2, 3]);
    let cases = vec![TestCase::new(
        "Throttle Each Volume with Different Value",
        vec![json!(["iops", ["1-2"], ["50"]])],
    )];
    let reports = scenario.run(&workload(), &cases).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reset_step_validates_return_to_baseline() {
    let (_target, scenario, _dir) = harness(vec![1, 2, 3, 4]);
    let cases = vec![TestCase::new(
        "Reset Throttling",
        vec![json!(["bw", "value", "100"]), json!(["reset", "", ""])],
    )];

    let reports = scenario.run(&workload(), &cases).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports[0].passed, "throttle step: {:?}", reports[0].detail);
    assert!(reports[1].passed, "reset step: {:?}", reports[1].detail);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn over_baseline_rate_validates_against_baseline() {
    let (_target, scenario, _dir) = harness(vec![1, 2, 3, 4]);
    let cases = vec![TestCase::new(
        "Throttle Max BW to 150% of Base Performance",
        vec![json!(["bw", "rate", "150"])],
    )];

    let reports = scenario.run(&workload(), &cases).await.unwrap();
    assert!(reports[0].passed, "detail: {:?}", reports[0].detail);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chained_bw_iops_steps_all_converge() {
    let (_target, scenario, _dir) = harness(vec![1, 2, 3, 4]);
    let cases = vec![TestCase::new(
        "Throttle Both Max BW and IOPS",
        vec![
            json!(["bw", "rate", "20"]),
            json!(["iops", "rate", "50"]),
            json!(["bw", "rate", "50"]),
            json!(["iops", "rate", "30"]),
        ],
    )];

    let reports = scenario.run(&workload(), &cases).await.unwrap();
    assert_eq!(reports.len(), 4);
    for report in &reports {
        assert!(report.passed, "step {} failed: {:?}", report.step, report.detail);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_steps_skip_without_aborting_the_case() {
    let (_target, scenario, _dir) = harness(vec![1, 2]);
    let cases = vec![TestCase::new(
        "Mixed validity",
        vec![
            json!(["latency", "rate", "10"]),   // bad kind
            json!(["bw", "rate"]),              // too short
            json!(["bw", ["2-1"], ["10"]]),     // inverted range
            json!(["bw", "rate", "50"]),        // valid
        ],
    )];

    let reports = scenario.run(&workload(), &cases).await.unwrap();
    // Only the valid step produces a report; the rest are logged skips.
    assert_eq!(reports.len(), 1);
    assert!(reports[0].passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_failure_fails_step_but_suite_continues() {
    let (target, scenario, _dir) = harness(vec![1, 2, 3]);
    target.inject_set_limit_failure(2);
    let cases = vec![
        TestCase::new("Doomed fan-out", vec![json!(["bw", "rate", "10"])]),
        TestCase::new("Per-volume avoids volume 2", vec![json!(["bw", ["3"], ["50"]])]),
    ];

    let reports = scenario.run(&workload(), &cases).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(!reports[0].passed, "fan-out through volume 2 must fail");
    assert!(reports[1].passed, "later case must still run: {:?}", reports[1].detail);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_default_table_passes_on_a_healthy_target() {
    init_tracing();
    let (_target, scenario, _dir) = harness(vec![1, 2, 3, 4, 5]);
    let cases = qos::default_test_cases();

    let reports = scenario.run(&workload(), &cases).await.unwrap();
    assert!(reports.len() >= 14);
    for report in &reports {
        assert!(
            report.passed,
            "case '{}' step {} failed: {:?}",
            report.case_name, report.step, report.detail
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_baseline_aborts_the_workload_sequence() {
    let topology = Topology::single_array(0, vec![1]);
    let target = SimTarget::new(&topology);
    let out_dir = tempfile::tempdir().unwrap();
    // No base perf declared for this workload name.
    let runner = SimWorkloadRunner::new(Arc::clone(&target), out_dir.path().to_path_buf());
    let scenario = QosScenario::new(
        target as Arc<dyn nautilus::target::ControlPlane>,
        topology,
        Arc::new(runner),
        HarnessConfig::fast(),
    );

    let err = scenario
        .run(&workload(), &qos::default_test_cases())
        .await
        .unwrap_err();
    assert!(matches!(err, nautilus::NautilusError::BaselineUnavailable(_)));
}
