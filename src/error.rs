use thiserror::Error;

#[derive(Error, Debug)]
pub enum NautilusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid test case: {0}")]
    InvalidTestCase(String),

    #[error("control plane failure: {0}")]
    ControlPlane(String),

    #[error("malformed telemetry: {0}")]
    MalformedTelemetry(String),

    #[error("baseline unavailable for workload '{0}'")]
    BaselineUnavailable(String),

    #[error("workload error: {0}")]
    Workload(String),
}

pub type Result<T> = std::result::Result<T, NautilusError>;
