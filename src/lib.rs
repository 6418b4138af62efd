pub mod baseline;
pub mod config;
pub mod error;
pub mod limits;
pub mod pattern;
pub mod qos;
pub mod sim;
pub mod spor;
pub mod target;
pub mod telemetry;
pub mod throttle;
pub mod validator;
pub mod workload;

// Re-export main types
pub use baseline::{BaselinePerformance, Perf};
pub use config::HarnessConfig;
pub use error::{NautilusError, Result};
pub use limits::{LimitHow, LimitKind, LimitSpec, PlannedLimit};
pub use qos::{QosScenario, StepReport, TestCase};
pub use spor::{FaultScenario, ScenarioState, SporOrchestrator};
pub use target::{ArrayState, ControlPlane, Topology, VolumeIo};
pub use telemetry::{PerformanceSample, TelemetrySeries};
pub use throttle::{AppliedOutcome, ThrottleController};
pub use validator::{ContinuityState, Expectation, Verdict};
pub use workload::{JoinOutcome, WorkloadHandle, WorkloadRunner, WorkloadSpec};
