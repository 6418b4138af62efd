use crate::error::{NautilusError, Result};
use serde_json::Value;
use std::path::Path;

/// One performance record from a load generator's result stream.
///
/// `bw` is throughput in MB/s, `iops` is the raw I/O rate (not the
/// kilo-IOPS figure some interfaces use).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSample {
    pub bw: f64,
    pub iops: f64,
}

/// An ordered, finite sequence of samples parsed from one workload run.
#[derive(Debug, Clone)]
pub struct TelemetrySeries {
    samples: Vec<PerformanceSample>,
}

impl TelemetrySeries {
    /// Parse a result file: a JSON array of records, each carrying a
    /// numeric `MB/sec` and `rate` field. Field naming is owned by the
    /// load-generator integration, not by us.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_str(&raw)
    }

    pub fn from_str(raw: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(raw)
            .map_err(|e| NautilusError::MalformedTelemetry(format!("invalid JSON: {e}")))?;
        let records = root.as_array().ok_or_else(|| {
            NautilusError::MalformedTelemetry("result root is not an array".to_string())
        })?;

        let mut samples = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            let bw = numeric_field(record, "MB/sec", idx)?;
            let iops = numeric_field(record, "rate", idx)?;
            samples.push(PerformanceSample { bw, iops });
        }
        Ok(Self { samples })
    }

    pub fn from_samples(samples: Vec<PerformanceSample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[PerformanceSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample, if any.
    pub fn last(&self) -> Option<PerformanceSample> {
        self.samples.last().copied()
    }

    /// The trailing `n` samples, clamped to the stream length.
    pub fn tail(&self, n: usize) -> &[PerformanceSample] {
        let start = self.samples.len().saturating_sub(n);
        &self.samples[start..]
    }
}

/// Extract a required numeric field. Load generators emit numbers both as
/// JSON numbers and as quoted strings, so both are accepted.
fn numeric_field(record: &Value, field: &str, idx: usize) -> Result<f64> {
    let value = record.get(field).ok_or_else(|| {
        NautilusError::MalformedTelemetry(format!("record {idx} is missing field '{field}'"))
    })?;
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            NautilusError::MalformedTelemetry(format!(
                "record {idx} field '{field}' is not representable as f64"
            ))
        }),
        Value::String(s) => s.parse::<f64>().map_err(|_| {
            NautilusError::MalformedTelemetry(format!(
                "record {idx} field '{field}' is non-numeric: '{s}'"
            ))
        }),
        other => Err(NautilusError::MalformedTelemetry(format!(
            "record {idx} field '{field}' has unexpected type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_and_quoted_numbers() {
        let series = TelemetrySeries::from_str(
            r#"[{"MB/sec": 100.5, "rate": 25000}, {"MB/sec": "99.5", "rate": "26000"}]"#,
        )
        .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.samples()[0].bw, 100.5);
        assert_eq!(series.samples()[1].iops, 26000.0);
    }

    #[test]
    fn tail_clamps_to_stream_length() {
        let series =
            TelemetrySeries::from_str(r#"[{"MB/sec": 1, "rate": 2}, {"MB/sec": 3, "rate": 4}]"#)
                .unwrap();
        assert_eq!(series.tail(3).len(), 2);
        assert_eq!(series.tail(1)[0].bw, 3.0);
        assert_eq!(series.last().unwrap().iops, 4.0);
    }

    #[test]
    fn missing_field_is_malformed() {
        let err = TelemetrySeries::from_str(r#"[{"MB/sec": 100.0}]"#).unwrap_err();
        assert!(matches!(err, NautilusError::MalformedTelemetry(_)));
    }

    #[test]
    fn non_numeric_field_is_malformed() {
        let err =
            TelemetrySeries::from_str(r#"[{"MB/sec": "fast", "rate": 100}]"#).unwrap_err();
        assert!(matches!(err, NautilusError::MalformedTelemetry(_)));
    }

    #[test]
    fn truncated_output_is_malformed() {
        let err = TelemetrySeries::from_str(r#"[{"MB/sec": 100.0, "ra"#).unwrap_err();
        assert!(matches!(err, NautilusError::MalformedTelemetry(_)));
    }

    #[test]
    fn non_array_root_is_malformed() {
        let err = TelemetrySeries::from_str(r#"{"MB/sec": 1}"#).unwrap_err();
        assert!(matches!(err, NautilusError::MalformedTelemetry(_)));
    }
}
