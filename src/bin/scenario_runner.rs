use nautilus::baseline::Perf;
use nautilus::config::HarnessConfig;
use nautilus::pattern::PatternStore;
use nautilus::qos::{self, QosScenario};
use nautilus::sim::{SimTarget, SimWorkloadRunner};
use nautilus::spor::{self, FaultScenario, ScenarioState, SporOrchestrator};
use nautilus::target::Topology;
use nautilus::workload::WorkloadSpec;
use std::sync::Arc;
use std::time::Duration;

struct Args {
    volumes: u32,
    quick: bool,
    seed: u64,
    skip_qos: bool,
    skip_spor: bool,
}

fn parse_args() -> Result<Args, String> {
    // The stock per-volume cases address volumes up to id 5.
    let mut volumes = 5;
    let mut quick = false;
    let mut seed: u64 = rand::random();
    let mut skip_qos = false;
    let mut skip_spor = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--volumes" => {
                let val = args.next().ok_or("--volumes requires a value")?;
                volumes = val.parse::<u32>().map_err(|_| "--volumes must be u32")?;
                if volumes == 0 {
                    return Err("--volumes must be at least 1".to_string());
                }
            }
            "--seed" => {
                let val = args.next().ok_or("--seed requires a value")?;
                seed = val.parse::<u64>().map_err(|_| "--seed must be u64")?;
            }
            "--quick" => quick = true,
            "--skip-qos" => skip_qos = true,
            "--skip-spor" => skip_spor = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Args {
        volumes,
        quick,
        seed,
        skip_qos,
        skip_spor,
    })
}

fn print_usage() {
    eprintln!(
        "usage: scenario_runner [--volumes N] [--seed S] [--quick] [--skip-qos] [--skip-spor]"
    );
}

fn workloads(quick: bool) -> Vec<(WorkloadSpec, Perf)> {
    let duration = if quick {
        Duration::from_millis(50)
    } else {
        Duration::from_secs(3)
    };
    let all = vec![
        (
            WorkloadSpec::new("seq_w", 0, 128 * 1024, 4, duration),
            Perf { bw: 1200.0, iops: 9_600.0 },
        ),
        (
            WorkloadSpec::new("seq_r", 100, 128 * 1024, 4, duration),
            Perf { bw: 2000.0, iops: 16_000.0 },
        ),
        (
            WorkloadSpec::new("rand_w", 0, 4096, 128, duration),
            Perf { bw: 400.0, iops: 100_000.0 },
        ),
        (
            WorkloadSpec::new("rand_r", 100, 4096, 128, duration),
            Perf { bw: 600.0, iops: 150_000.0 },
        ),
    ];
    if quick {
        all.into_iter().take(1).collect()
    } else {
        all
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nautilus=info".parse().expect("valid directive")),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("error: {msg}");
            print_usage();
            std::process::exit(2);
        }
    };

    let config = if args.quick {
        HarnessConfig::fast()
    } else {
        HarnessConfig::default()
    };
    let topology = Topology::single_array(0, (1..=args.volumes).collect());
    let out_dir = std::env::temp_dir().join(format!("nautilus_runner_{}", std::process::id()));
    if let Err(e) = std::fs::create_dir_all(&out_dir) {
        eprintln!("error: cannot create output dir: {e}");
        std::process::exit(1);
    }

    let mut failures = 0usize;

    if !args.skip_qos {
        let target = SimTarget::new(&topology);
        let mut runner = SimWorkloadRunner::new(Arc::clone(&target), out_dir.clone());
        for (spec, perf) in workloads(args.quick) {
            runner = runner.with_base(&spec.name, perf);
        }
        let runner = Arc::new(runner);
        let scenario = QosScenario::new(
            target,
            topology.clone(),
            Arc::clone(&runner) as Arc<dyn nautilus::workload::WorkloadRunner>,
            config.clone(),
        );
        let cases = qos::default_test_cases();

        let specs: Vec<_> = workloads(args.quick).into_iter().map(|(s, _)| s).collect();
        let baselines = match nautilus::baseline::measure_all(runner.as_ref(), &specs).await {
            Ok(baselines) => baselines,
            Err(e) => {
                eprintln!("baseline measurement failed: {e}");
                std::process::exit(1);
            }
        };

        for spec in &specs {
            let base = baselines.get(&spec.name).expect("baselined above");
            match scenario.run_with_baseline(spec, base, &cases).await {
                Ok(reports) => {
                    for report in &reports {
                        let status = if report.passed { "PASS" } else { "FAIL" };
                        println!("[{status}] {} :: {}", report.case_name, report.step);
                        if !report.passed {
                            failures += 1;
                        }
                    }
                }
                Err(e) => {
                    eprintln!("workload '{}' aborted: {e}", spec.name);
                    failures += 1;
                }
            }
        }
    }

    if !args.skip_spor {
        println!("spor pattern seed: {}", args.seed);
        // Each crash cycle gets a fresh target, mirroring the clean
        // bring-up that precedes every real SPOR run.
        let orchestrator = |seed: u64| {
            let target = SimTarget::new(&topology);
            SporOrchestrator::new(
                Arc::clone(&target) as Arc<dyn nautilus::target::ControlPlane>,
                target,
                Arc::new(PatternStore::new(seed, 4096)),
                config.clone(),
            )
        };

        let grid = if args.quick {
            spor::basic_grid().into_iter().rev().take(1).collect()
        } else {
            spor::basic_grid()
        };
        let run_time = if args.quick {
            Duration::from_millis(100)
        } else {
            Duration::from_secs(10)
        };

        for (idx, (offset, size)) in grid.into_iter().enumerate() {
            let scenario = FaultScenario {
                array: 0,
                volumes: vec![1],
                offset,
                size,
                run_time,
            };
            match orchestrator(args.seed + idx as u64).run_single(&scenario).await {
                Ok(ScenarioState::Pass) => {
                    println!("[PASS] spor offset={offset} size={size}");
                }
                Ok(state) => {
                    println!("[FAIL] spor offset={offset} size={size} ended in {state}");
                    failures += 1;
                }
                Err(e) => {
                    eprintln!("spor scenario aborted: {e}");
                    failures += 1;
                }
            }
        }

        if args.volumes >= 2 {
            let scenario = FaultScenario {
                array: 0,
                volumes: vec![1, 2],
                offset: 4096,
                size: 256 * 1024,
                run_time,
            };
            match orchestrator(args.seed + 100).run_multi(&scenario).await {
                Ok(ScenarioState::Pass) => println!("[PASS] spor multi-volume"),
                Ok(state) => {
                    println!("[FAIL] spor multi-volume ended in {state}");
                    failures += 1;
                }
                Err(e) => {
                    eprintln!("spor multi-volume aborted: {e}");
                    failures += 1;
                }
            }
        }
    }

    let _ = std::fs::remove_dir_all(&out_dir);
    if failures > 0 {
        eprintln!("{failures} scenario step(s) failed");
        std::process::exit(1);
    }
}
