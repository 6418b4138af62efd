use crate::baseline::Perf;
use crate::error::{NautilusError, Result};
use crate::limits::LimitKind;
use crate::target::{
    ArrayId, ArrayState, ControlFut, ControlPlane, Topology, VolumeId, VolumeIo, WriteOutcome,
};
use crate::workload::{WorkloadFut, WorkloadHandle, WorkloadRunner, WorkloadSpec};
use bytes::Bytes;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// In-memory stand-in for a real storage target, for deterministic
// scenario tests. Durability model: a write is durable once acked, so
// data written before a simulated power-off survives it; mount state and
// subsystems do not.

#[derive(Debug, Default)]
struct SimVolume {
    data: Vec<u8>,
    mounted: bool,
    subsystem: bool,
    bw_limit: Option<f64>,   // MB/s
    iops_limit: Option<f64>, // kilo-IOPS
}

#[derive(Debug, Default)]
struct SimState {
    crashed: bool,
    volumes: HashMap<(ArrayId, VolumeId), SimVolume>,
    fail_set_limit: HashSet<VolumeId>,
}

/// Simulated target exposing both the control plane and the raw volume
/// I/O surface.
pub struct SimTarget {
    state: Mutex<SimState>,
    crash_notify: Notify,
}

impl SimTarget {
    /// Bring up a target with every volume of `topology` created,
    /// subsystem'd, and mounted.
    pub fn new(topology: &Topology) -> Arc<Self> {
        let mut state = SimState::default();
        for (&array, volumes) in &topology.arrays {
            for &volume in volumes {
                state.volumes.insert(
                    (array, volume),
                    SimVolume {
                        mounted: true,
                        subsystem: true,
                        ..Default::default()
                    },
                );
            }
        }
        Arc::new(Self {
            state: Mutex::new(state),
            crash_notify: Notify::new(),
        })
    }

    /// Make `set_volume_limit` fail for `volume`, for fan-out abort
    /// tests.
    pub fn inject_set_limit_failure(&self, volume: VolumeId) {
        self.lock().fail_set_limit.insert(volume);
    }

    /// Currently recorded limit of `kind` on one volume, if any.
    pub fn volume_limit(&self, array: ArrayId, volume: VolumeId, kind: LimitKind) -> Option<f64> {
        let state = self.lock();
        let vol = state.volumes.get(&(array, volume))?;
        match kind {
            LimitKind::Bw => vol.bw_limit,
            LimitKind::Iops => vol.iops_limit,
        }
    }

    /// System-wide bandwidth cap in MB/s, if any volume is limited.
    pub fn bw_cap(&self) -> Option<f64> {
        let state = self.lock();
        let caps: Vec<f64> = state.volumes.values().filter_map(|v| v.bw_limit).collect();
        if caps.is_empty() {
            None
        } else {
            Some(caps.iter().sum())
        }
    }

    /// System-wide IOPS cap in raw IOPS, if any volume is limited.
    pub fn iops_cap(&self) -> Option<f64> {
        let state = self.lock();
        let caps: Vec<f64> = state.volumes.values().filter_map(|v| v.iops_limit).collect();
        if caps.is_empty() {
            None
        } else {
            Some(caps.iter().sum::<f64>() * 1000.0)
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state lock poisoned")
    }

    fn write_durable(
        &self,
        array: ArrayId,
        volume: VolumeId,
        offset: u64,
        size: u64,
        pattern: &Bytes,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.crashed {
            return Err(NautilusError::Workload("target is down".to_string()));
        }
        let vol = state
            .volumes
            .get_mut(&(array, volume))
            .ok_or_else(|| NautilusError::Workload(format!("no such volume {volume}")))?;
        if !vol.mounted {
            return Err(NautilusError::Workload(format!(
                "volume {volume} is not mounted"
            )));
        }
        let end = (offset + size) as usize;
        if vol.data.len() < end {
            vol.data.resize(end, 0);
        }
        for i in 0..size as usize {
            vol.data[offset as usize + i] = pattern[i % pattern.len()];
        }
        Ok(())
    }
}

impl ControlPlane for SimTarget {
    fn set_volume_limit(
        &self,
        array: ArrayId,
        volume: VolumeId,
        kind: LimitKind,
        value: f64,
    ) -> ControlFut<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.crashed {
                return Err(NautilusError::ControlPlane("target is down".to_string()));
            }
            if state.fail_set_limit.contains(&volume) {
                return Err(NautilusError::ControlPlane(format!(
                    "set qos failed for volume {volume}"
                )));
            }
            let vol = state
                .volumes
                .get_mut(&(array, volume))
                .ok_or_else(|| NautilusError::ControlPlane(format!("no such volume {volume}")))?;
            match kind {
                LimitKind::Bw => vol.bw_limit = Some(value),
                LimitKind::Iops => vol.iops_limit = Some(value),
            }
            Ok(())
        })
    }

    fn reset_limit(&self, array: ArrayId, volume: Option<VolumeId>) -> ControlFut<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.crashed {
                return Err(NautilusError::ControlPlane("target is down".to_string()));
            }
            for ((a, v), vol) in state.volumes.iter_mut() {
                if *a == array && volume.map_or(true, |want| *v == want) {
                    vol.bw_limit = None;
                    vol.iops_limit = None;
                }
            }
            Ok(())
        })
    }

    fn query_array_state(&self, array: ArrayId) -> ControlFut<'_, ArrayState> {
        Box::pin(async move {
            let state = self.lock();
            if state.crashed {
                return Ok(ArrayState::Stopped);
            }
            let degraded = state
                .volumes
                .iter()
                .any(|((a, _), vol)| *a == array && !vol.mounted);
            Ok(if degraded {
                ArrayState::Degraded
            } else {
                ArrayState::Normal
            })
        })
    }

    fn recreate_subsystem(&self, array: ArrayId, volume: VolumeId) -> ControlFut<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.crashed {
                return Err(NautilusError::ControlPlane("target is down".to_string()));
            }
            let vol = state
                .volumes
                .get_mut(&(array, volume))
                .ok_or_else(|| NautilusError::ControlPlane(format!("no such volume {volume}")))?;
            vol.subsystem = true;
            Ok(())
        })
    }

    fn mount_volume(&self, array: ArrayId, volume: VolumeId) -> ControlFut<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.crashed {
                return Err(NautilusError::ControlPlane("target is down".to_string()));
            }
            let vol = state
                .volumes
                .get_mut(&(array, volume))
                .ok_or_else(|| NautilusError::ControlPlane(format!("no such volume {volume}")))?;
            if !vol.subsystem {
                return Err(NautilusError::ControlPlane(format!(
                    "volume {volume} has no subsystem"
                )));
            }
            vol.mounted = true;
            Ok(())
        })
    }

    fn trigger_spor(&self) -> ControlFut<'_, ()> {
        Box::pin(async move {
            {
                let mut state = self.lock();
                state.crashed = true;
                for vol in state.volumes.values_mut() {
                    vol.mounted = false;
                    vol.subsystem = false;
                }
            }
            self.crash_notify.notify_waiters();
            tracing::info!("simulated sudden power-off");
            Ok(())
        })
    }

    fn dirty_restart(&self) -> ControlFut<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            if !state.crashed {
                return Err(NautilusError::ControlPlane(
                    "dirty restart without a crash".to_string(),
                ));
            }
            state.crashed = false;
            tracing::info!("dirty bring-up complete");
            Ok(())
        })
    }
}

impl VolumeIo for SimTarget {
    fn write_pattern(
        &self,
        array: ArrayId,
        volume: VolumeId,
        offset: u64,
        size: u64,
        pattern: Bytes,
        run_time: Option<std::time::Duration>,
    ) -> ControlFut<'_, WriteOutcome> {
        Box::pin(async move {
            // Acked data is durable immediately; a timed run then keeps
            // the I/O phase open until the duration elapses or a crash
            // cuts it short.
            self.write_durable(array, volume, offset, size, &pattern)?;
            let Some(run_time) = run_time else {
                return Ok(WriteOutcome::Completed);
            };

            let notified = self.crash_notify.notified();
            tokio::pin!(notified);
            if self.lock().crashed {
                return Ok(WriteOutcome::Interrupted);
            }
            tokio::select! {
                _ = &mut notified => Ok(WriteOutcome::Interrupted),
                _ = tokio::time::sleep(run_time) => Ok(WriteOutcome::Completed),
            }
        })
    }

    fn verify_pattern(
        &self,
        array: ArrayId,
        volume: VolumeId,
        offset: u64,
        size: u64,
        pattern: Bytes,
    ) -> ControlFut<'_, bool> {
        Box::pin(async move {
            let state = self.lock();
            if state.crashed {
                return Err(NautilusError::Workload("target is down".to_string()));
            }
            let vol = state
                .volumes
                .get(&(array, volume))
                .ok_or_else(|| NautilusError::Workload(format!("no such volume {volume}")))?;
            if !vol.mounted {
                return Err(NautilusError::Workload(format!(
                    "volume {volume} is not mounted"
                )));
            }
            let end = (offset + size) as usize;
            if vol.data.len() < end {
                return Ok(false);
            }
            for i in 0..size as usize {
                if vol.data[offset as usize + i] != pattern[i % pattern.len()] {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }
}

/// Load generator stand-in. Each run sleeps its workload duration, then
/// emits a JSON result file whose tail reflects whatever limits are
/// active on the target by then, with deterministic jitter kept inside
/// the validator's tolerance band.
pub struct SimWorkloadRunner {
    target: Arc<SimTarget>,
    base: HashMap<String, Perf>,
    out_dir: PathBuf,
}

const JITTER: [f64; 6] = [0.97, 1.0, 0.99, 0.98, 1.0, 0.99];

impl SimWorkloadRunner {
    pub fn new(target: Arc<SimTarget>, out_dir: PathBuf) -> Self {
        Self {
            target,
            base: HashMap::new(),
            out_dir,
        }
    }

    /// Declare the unthrottled performance this workload would show.
    pub fn with_base(mut self, workload: &str, perf: Perf) -> Self {
        self.base.insert(workload.to_string(), perf);
        self
    }
}

impl WorkloadRunner for SimWorkloadRunner {
    fn start(&self, spec: &WorkloadSpec) -> WorkloadFut<'_, WorkloadHandle> {
        let target = Arc::clone(&self.target);
        let base = self.base.get(&spec.name).copied();
        let path = self.out_dir.join(format!("{}.json", spec.name));
        let duration = spec.duration;
        let name = spec.name.clone();

        Box::pin(async move {
            let base = base.ok_or_else(|| {
                NautilusError::Workload(format!("no base performance declared for '{name}'"))
            })?;
            let result_path = path.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(duration).await;

                let bw_eff = target.bw_cap().map_or(base.bw, |cap| cap.min(base.bw));
                let iops_eff = target.iops_cap().map_or(base.iops, |cap| cap.min(base.iops));

                let records: Vec<_> = JITTER
                    .iter()
                    .map(|j| {
                        json!({
                            "MB/sec": bw_eff * j,
                            "rate": iops_eff * j,
                        })
                    })
                    .collect();
                let body = serde_json::to_string(&records)
                    .map_err(|e| NautilusError::Workload(e.to_string()))?;
                std::fs::write(&path, body)
                    .map_err(|e| NautilusError::Workload(e.to_string()))?;
                Ok(())
            });
            Ok(WorkloadHandle::new(task, result_path))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo() -> Topology {
        Topology::single_array(0, vec![1, 2])
    }

    #[tokio::test]
    async fn caps_aggregate_across_volumes() {
        let target = SimTarget::new(&topo());
        assert_eq!(target.bw_cap(), None);

        target.set_volume_limit(0, 1, LimitKind::Bw, 25.0).await.unwrap();
        target.set_volume_limit(0, 2, LimitKind::Bw, 25.0).await.unwrap();
        assert_eq!(target.bw_cap(), Some(50.0));

        target.set_volume_limit(0, 1, LimitKind::Iops, 10.0).await.unwrap();
        assert_eq!(target.iops_cap(), Some(10_000.0));

        target.reset_limit(0, None).await.unwrap();
        assert_eq!(target.bw_cap(), None);
        assert_eq!(target.iops_cap(), None);
    }

    #[tokio::test]
    async fn crash_unmounts_and_recovery_remounts() {
        let target = SimTarget::new(&topo());
        assert_eq!(target.query_array_state(0).await.unwrap(), ArrayState::Normal);

        target.trigger_spor().await.unwrap();
        assert_eq!(target.query_array_state(0).await.unwrap(), ArrayState::Stopped);

        target.dirty_restart().await.unwrap();
        assert_eq!(target.query_array_state(0).await.unwrap(), ArrayState::Degraded);

        for vol in [1, 2] {
            target.recreate_subsystem(0, vol).await.unwrap();
            target.mount_volume(0, vol).await.unwrap();
        }
        assert_eq!(target.query_array_state(0).await.unwrap(), ArrayState::Normal);
    }

    #[tokio::test]
    async fn mount_requires_subsystem() {
        let target = SimTarget::new(&topo());
        target.trigger_spor().await.unwrap();
        target.dirty_restart().await.unwrap();
        let err = target.mount_volume(0, 1).await.unwrap_err();
        assert!(matches!(err, NautilusError::ControlPlane(_)));
    }

    #[tokio::test]
    async fn acked_writes_survive_spor() {
        let target = SimTarget::new(&topo());
        let pattern = crate::pattern::generate(3, 512);
        target
            .write_pattern(0, 1, 0, 4096, pattern.clone(), None)
            .await
            .unwrap();

        target.trigger_spor().await.unwrap();
        target.dirty_restart().await.unwrap();
        target.recreate_subsystem(0, 1).await.unwrap();
        target.mount_volume(0, 1).await.unwrap();

        assert!(target.verify_pattern(0, 1, 0, 4096, pattern).await.unwrap());
    }

    #[tokio::test]
    async fn timed_write_is_interrupted_by_spor() {
        let target = SimTarget::new(&topo());
        let pattern = crate::pattern::generate(4, 512);
        let task = {
            let target = Arc::clone(&target);
            tokio::spawn(async move {
                target
                    .write_pattern(0, 1, 0, 1024, pattern, Some(std::time::Duration::from_secs(30)))
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        target.trigger_spor().await.unwrap();
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, WriteOutcome::Interrupted);
    }
}
