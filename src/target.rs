use crate::error::Result;
use crate::limits::LimitKind;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type ControlFut<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Array/volume identifiers as the target's control plane names them.
pub type ArrayId = u32;
pub type VolumeId = u32;

/// Operational state of an array, as reported by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayState {
    Normal,
    Degraded,
    Rebuilding,
    Stopped,
}

/// Arrays and their volumes as currently known to the target. The QoS
/// fan-out walks this to address every volume.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub arrays: BTreeMap<ArrayId, Vec<VolumeId>>,
}

impl Topology {
    pub fn single_array(array: ArrayId, volumes: Vec<VolumeId>) -> Self {
        let mut arrays = BTreeMap::new();
        arrays.insert(array, volumes);
        Self { arrays }
    }

    pub fn volume_count(&self) -> usize {
        self.arrays.values().map(Vec::len).sum()
    }

    /// First array in id order. Per-volume throttling only addresses this
    /// one; multi-array per-volume throttling is unsupported.
    pub fn first_array(&self) -> Option<ArrayId> {
        self.arrays.keys().next().copied()
    }
}

/// Command surface of the storage target's control plane.
///
/// The target itself is an opaque system under test; each operation maps
/// to one logical CLI/RPC command and the target accepts one command at a
/// time per invocation. All implementations must be safe to share behind
/// an `Arc` across the foreground driver and scenario wrap-up.
pub trait ControlPlane: Send + Sync {
    fn set_volume_limit(
        &self,
        array: ArrayId,
        volume: VolumeId,
        kind: LimitKind,
        value: f64,
    ) -> ControlFut<'_, ()>;

    /// Clear the limit on one volume, or on every volume when `volume`
    /// is `None`.
    fn reset_limit(&self, array: ArrayId, volume: Option<VolumeId>) -> ControlFut<'_, ()>;

    fn query_array_state(&self, array: ArrayId) -> ControlFut<'_, ArrayState>;

    fn recreate_subsystem(&self, array: ArrayId, volume: VolumeId) -> ControlFut<'_, ()>;

    fn mount_volume(&self, array: ArrayId, volume: VolumeId) -> ControlFut<'_, ()>;

    /// Simulate a sudden power-off: kill the target without a clean
    /// shutdown. In-flight writes are expected to be cut short.
    fn trigger_spor(&self) -> ControlFut<'_, ()>;

    /// Bring the target back up from whatever state the crash left
    /// behind. Recovery is the target's problem.
    fn dirty_restart(&self) -> ControlFut<'_, ()>;
}

/// How a timed pattern write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Completed,
    /// The write was cut short (typically by a crash trigger). Expected
    /// during fault scenarios, not an error.
    Interrupted,
}

/// Raw volume I/O used by fault scenarios: pattern writes and byte-exact
/// verification over an offset/size range.
pub trait VolumeIo: Send + Sync {
    /// Write `pattern` repeatedly over `[offset, offset+size)` for up to
    /// `run_time` (or once, immediately, when `run_time` is `None`).
    fn write_pattern(
        &self,
        array: ArrayId,
        volume: VolumeId,
        offset: u64,
        size: u64,
        pattern: Bytes,
        run_time: Option<Duration>,
    ) -> ControlFut<'_, WriteOutcome>;

    /// Read back `[offset, offset+size)` and byte-compare against
    /// `pattern`. Ok(true) on an exact match.
    fn verify_pattern(
        &self,
        array: ArrayId,
        volume: VolumeId,
        offset: u64,
        size: u64,
        pattern: Bytes,
    ) -> ControlFut<'_, bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_counts_volumes_across_arrays() {
        let mut topo = Topology::default();
        topo.arrays.insert(0, vec![1, 2]);
        topo.arrays.insert(1, vec![3, 4, 5]);
        assert_eq!(topo.volume_count(), 5);
        assert_eq!(topo.first_array(), Some(0));
    }

    #[test]
    fn empty_topology_has_no_first_array() {
        let topo = Topology::default();
        assert_eq!(topo.volume_count(), 0);
        assert_eq!(topo.first_array(), None);
    }
}
