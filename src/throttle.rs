use crate::error::{NautilusError, Result};
use crate::limits::{LimitHow, LimitKind, PlannedLimit};
use crate::target::{ControlPlane, Topology};
use std::sync::Arc;

/// What one apply actually enforced, separate from the request that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedOutcome {
    /// Aggregate value enforced system-wide, in the planned limit's
    /// units (MB/s or kilo-IOPS). 0 for reset and per-volume applies.
    pub total: f64,
}

/// Applies planned limits to the target's control plane. Stateless
/// between calls; the notion of "currently active limit" lives in the
/// driver loop that owns the test sequence.
pub struct ThrottleController {
    control: Arc<dyn ControlPlane>,
    topology: Topology,
}

impl ThrottleController {
    pub fn new(control: Arc<dyn ControlPlane>, topology: Topology) -> Self {
        Self { control, topology }
    }

    /// Apply one planned limit. The first failed control-plane call
    /// aborts the remaining fan-out and surfaces as `ControlPlane`.
    pub async fn apply(&self, planned: &PlannedLimit) -> Result<AppliedOutcome> {
        match planned {
            PlannedLimit::Reset => self.reset_all().await,
            PlannedLimit::Uniform { kind, how, value } => {
                self.apply_uniform(*kind, *how, *value).await
            }
            PlannedLimit::PerVolume { kind, volumes } => {
                self.apply_per_volume(*kind, volumes).await
            }
        }
    }

    /// Fan one limit out across every volume of every array. Rate limits
    /// are a system-wide figure split evenly per volume; value limits cap
    /// each volume independently, so the effective total is the value
    /// times the volume count.
    async fn apply_uniform(
        &self,
        kind: LimitKind,
        how: LimitHow,
        value: f64,
    ) -> Result<AppliedOutcome> {
        // A zero limit throttles nothing; treat it exactly like a reset.
        if value == 0.0 {
            return self.reset_all().await;
        }

        let vol_count = self.topology.volume_count();
        if vol_count == 0 {
            return Err(NautilusError::ControlPlane(
                "no volumes known to the target".to_string(),
            ));
        }

        let (per_volume, total) = match how {
            LimitHow::Rate => (value / vol_count as f64, value),
            LimitHow::Value => (value, value * vol_count as f64),
        };

        for (&array, volumes) in &self.topology.arrays {
            for &volume in volumes {
                self.control
                    .set_volume_limit(array, volume, kind, per_volume)
                    .await?;
            }
        }

        match kind {
            LimitKind::Bw => tracing::info!("throttled {kind} to {total} MB/s"),
            LimitKind::Iops => tracing::info!("throttled {kind} to {total}k"),
        }
        Ok(AppliedOutcome { total })
    }

    /// Cap explicit volumes at explicit values, one call each, no
    /// division or scaling. Only the first array is addressed;
    /// multi-array per-volume throttling is unsupported.
    async fn apply_per_volume(
        &self,
        kind: LimitKind,
        volumes: &std::collections::BTreeMap<u32, f64>,
    ) -> Result<AppliedOutcome> {
        let array = self.topology.first_array().ok_or_else(|| {
            NautilusError::ControlPlane("no arrays known to the target".to_string())
        })?;

        for (&volume, &value) in volumes {
            self.control
                .set_volume_limit(array, volume, kind, value)
                .await?;
            tracing::info!(array, volume, %kind, value, "per-volume limit set");
        }
        Ok(AppliedOutcome { total: 0.0 })
    }

    async fn reset_all(&self) -> Result<AppliedOutcome> {
        for &array in self.topology.arrays.keys() {
            self.control.reset_limit(array, None).await?;
        }
        tracing::info!("reset qos of all volumes");
        Ok(AppliedOutcome { total: 0.0 })
    }
}
