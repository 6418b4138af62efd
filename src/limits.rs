use crate::baseline::Perf;
use crate::error::{NautilusError, Result};
use crate::target::VolumeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Which figure a limit constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Bw,
    Iops,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::Bw => write!(f, "bw"),
            LimitKind::Iops => write!(f, "iops"),
        }
    }
}

/// How a uniform limit value is interpreted: percentage of baseline, or
/// an absolute figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitHow {
    Rate,
    Value,
}

/// One throttling step, decided at parse time (never shape-checked at use
/// time). Exactly one spec is active on the target at any moment; the
/// driver's end-of-case reset enforces that.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitSpec {
    /// Clear all limits; validation then expects a return to baseline.
    Reset,
    /// One limit fanned out across every volume of every array.
    Uniform {
        kind: LimitKind,
        how: LimitHow,
        value: f64,
    },
    /// Explicit absolute caps per volume id. Rate form is unsupported
    /// here. Only the first array is addressed.
    PerVolume {
        kind: LimitKind,
        volumes: BTreeMap<VolumeId, f64>,
    },
}

impl LimitSpec {
    /// Parse one test-case row. Two shapes are accepted:
    /// `["bw"|"iops"|"reset", "rate"|"value", "<number>"]` and
    /// `["bw"|"iops", ["<tag>", ...], ["<number>", ...]]` where a tag is
    /// a volume id or an inclusive range `"a-b"`.
    pub fn parse(row: &Value) -> Result<Self> {
        let items = row
            .as_array()
            .ok_or_else(|| invalid("test case row is not an array"))?;
        if items.len() < 3 {
            return Err(invalid("argument less than 3"));
        }

        let kind_str = items[0]
            .as_str()
            .ok_or_else(|| invalid("limit type is not a string"))?;
        let kind = match kind_str {
            "reset" => return Ok(LimitSpec::Reset),
            "bw" => LimitKind::Bw,
            "iops" => LimitKind::Iops,
            other => {
                return Err(invalid(&format!(
                    "limit type '{other}' is wrong (reset, bw, iops)"
                )))
            }
        };

        if let Some(tags) = items[1].as_array() {
            let values = items[2]
                .as_array()
                .ok_or_else(|| invalid("per-volume values are not a list"))?;
            if tags.len() != values.len() {
                return Err(invalid(
                    "number of volume list & limit value is not the same",
                ));
            }
            let volumes = expand_volume_tags(tags, values)?;
            return Ok(LimitSpec::PerVolume { kind, volumes });
        }

        let how = match items[1].as_str() {
            Some("rate") => LimitHow::Rate,
            Some("value") => LimitHow::Value,
            _ => return Err(invalid("limit how is wrong (rate, value)")),
        };
        let value = parse_number(&items[2])
            .ok_or_else(|| invalid("limit value is non-numeric"))?;
        Ok(LimitSpec::Uniform { kind, how, value })
    }
}

/// The concrete request produced by planning a `LimitSpec` against a
/// baseline: the numeric value(s) actually sent to the control plane.
/// Uniform iops limits are expressed in kilo-IOPS, matching the control
/// plane's unit; per-volume values are passed through untranslated.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedLimit {
    Reset,
    Uniform {
        kind: LimitKind,
        how: LimitHow,
        value: f64,
    },
    PerVolume {
        kind: LimitKind,
        volumes: BTreeMap<VolumeId, f64>,
    },
}

/// Translate a parsed spec into the figure the control plane receives.
/// Rate limits scale the measured baseline; a zero rate plans to zero,
/// which the controller treats the same as a reset (no throttle).
pub fn plan(spec: &LimitSpec, baseline: &Perf) -> PlannedLimit {
    match spec {
        LimitSpec::Reset => PlannedLimit::Reset,
        LimitSpec::Uniform { kind, how, value } => {
            let planned = match how {
                LimitHow::Rate if *value != 0.0 => {
                    let mut v = baseline.value_for(*kind) * *value / 100.0;
                    if *kind == LimitKind::Iops {
                        v /= 1000.0; // control plane takes kilo-IOPS
                    }
                    v
                }
                _ => *value,
            };
            PlannedLimit::Uniform {
                kind: *kind,
                how: *how,
                value: planned,
            }
        }
        LimitSpec::PerVolume { kind, volumes } => PlannedLimit::PerVolume {
            kind: *kind,
            volumes: volumes.clone(),
        },
    }
}

/// Expand tag/value pairs into a per-volume map. A tag is either one id
/// or an inclusive range `"a-b"`; a malformed or inverted range is
/// rejected rather than silently mis-expanded.
fn expand_volume_tags(tags: &[Value], values: &[Value]) -> Result<BTreeMap<VolumeId, f64>> {
    let mut volumes = BTreeMap::new();
    for (tag, value) in tags.iter().zip(values.iter()) {
        let tag = tag
            .as_str()
            .ok_or_else(|| invalid("volume tag is not a string"))?;
        let value = parse_number(value)
            .ok_or_else(|| invalid("per-volume limit value is non-numeric"))?;
        if let Some((start, end)) = tag.split_once('-') {
            let start: VolumeId = start
                .trim()
                .parse()
                .map_err(|_| invalid(&format!("volume range '{tag}' is non-numeric")))?;
            let end: VolumeId = end
                .trim()
                .parse()
                .map_err(|_| invalid(&format!("volume range '{tag}' is non-numeric")))?;
            if start > end {
                return Err(invalid(&format!("volume range '{tag}' is inverted")));
            }
            for vol in start..=end {
                volumes.insert(vol, value);
            }
        } else {
            let vol: VolumeId = tag
                .trim()
                .parse()
                .map_err(|_| invalid(&format!("volume tag '{tag}' is non-numeric")))?;
            volumes.insert(vol, value);
        }
    }
    Ok(volumes)
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn invalid(msg: &str) -> NautilusError {
    NautilusError::InvalidTestCase(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn baseline() -> Perf {
        Perf {
            bw: 1000.0,
            iops: 100_000.0,
        }
    }

    #[test]
    fn parses_uniform_rate_row() {
        let spec = LimitSpec::parse(&json!(["bw", "rate", "10"])).unwrap();
        assert_eq!(
            spec,
            LimitSpec::Uniform {
                kind: LimitKind::Bw,
                how: LimitHow::Rate,
                value: 10.0
            }
        );
    }

    #[test]
    fn parses_reset_row() {
        assert_eq!(
            LimitSpec::parse(&json!(["reset", "", ""])).unwrap(),
            LimitSpec::Reset
        );
    }

    #[test]
    fn rejects_short_row() {
        let err = LimitSpec::parse(&json!(["bw", "rate"])).unwrap_err();
        assert!(matches!(err, NautilusError::InvalidTestCase(_)));
    }

    #[test]
    fn rejects_unknown_kind_and_how() {
        assert!(LimitSpec::parse(&json!(["latency", "rate", "10"])).is_err());
        assert!(LimitSpec::parse(&json!(["bw", "percent", "10"])).is_err());
    }

    #[test]
    fn rejects_mismatched_per_volume_lists() {
        let err = LimitSpec::parse(&json!(["iops", ["1-2", "4"], ["10"]])).unwrap_err();
        assert!(matches!(err, NautilusError::InvalidTestCase(_)));
    }

    #[test]
    fn expands_ranges_inclusively() {
        let spec = LimitSpec::parse(&json!(["iops", ["1-2", "4-5"], ["10", "20"]])).unwrap();
        match spec {
            LimitSpec::PerVolume { volumes, .. } => {
                let expect: BTreeMap<VolumeId, f64> =
                    [(1, 10.0), (2, 10.0), (4, 20.0), (5, 20.0)].into_iter().collect();
                assert_eq!(volumes, expect);
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn rejects_inverted_and_non_numeric_ranges() {
        assert!(LimitSpec::parse(&json!(["bw", ["5-2"], ["10"]])).is_err());
        assert!(LimitSpec::parse(&json!(["bw", ["a-b"], ["10"]])).is_err());
    }

    #[test]
    fn plans_rate_as_fraction_of_baseline() {
        let spec = LimitSpec::parse(&json!(["bw", "rate", "10"])).unwrap();
        match plan(&spec, &baseline()) {
            PlannedLimit::Uniform { value, .. } => assert!((value - 100.0).abs() < 1e-9),
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn plans_iops_rate_in_kilo_iops() {
        let spec = LimitSpec::parse(&json!(["iops", "rate", "50"])).unwrap();
        match plan(&spec, &baseline()) {
            // 50% of 100k IOPS, expressed as kilo-IOPS
            PlannedLimit::Uniform { value, .. } => assert!((value - 50.0).abs() < 1e-9),
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn plans_absolute_value_unchanged() {
        let spec = LimitSpec::parse(&json!(["bw", "value", "100"])).unwrap();
        match plan(&spec, &baseline()) {
            PlannedLimit::Uniform { value, .. } => assert_eq!(value, 100.0),
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn zero_rate_plans_to_zero() {
        let spec = LimitSpec::parse(&json!(["bw", "rate", "0"])).unwrap();
        match plan(&spec, &baseline()) {
            PlannedLimit::Uniform { value, .. } => assert_eq!(value, 0.0),
            other => panic!("unexpected plan: {other:?}"),
        }
    }
}
