use crate::config::HarnessConfig;
use crate::error::{NautilusError, Result};
use crate::pattern::PatternStore;
use crate::target::{ArrayId, ControlPlane, VolumeId, VolumeIo, WriteOutcome};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One crash-and-recover cycle: which volumes, where, how much, and how
/// long the in-flight write phase is allowed to run.
#[derive(Debug, Clone)]
pub struct FaultScenario {
    pub array: ArrayId,
    pub volumes: Vec<VolumeId>,
    pub offset: u64,
    pub size: u64,
    pub run_time: Duration,
}

/// Progress of one fault scenario. Transitions are logged; `Pass`/`Fail`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Idle,
    WritingInFlight,
    CrashTriggered,
    DirtyRestarted,
    SubsystemRecreated,
    VolumeRemounted,
    Verifying,
    Pass,
    Fail,
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScenarioState::Idle => "Idle",
            ScenarioState::WritingInFlight => "WritingInFlight",
            ScenarioState::CrashTriggered => "CrashTriggered",
            ScenarioState::DirtyRestarted => "DirtyRestarted",
            ScenarioState::SubsystemRecreated => "SubsystemRecreated",
            ScenarioState::VolumeRemounted => "VolumeRemounted",
            ScenarioState::Verifying => "Verifying",
            ScenarioState::Pass => "Pass",
            ScenarioState::Fail => "Fail",
        };
        write!(f, "{name}")
    }
}

/// The classic single-volume offset/size sweep.
pub fn basic_grid() -> Vec<(u64, u64)> {
    let offsets = [0, 4096];
    let sizes = [256 * 1024, 512 * 1024];
    let mut grid = Vec::new();
    for offset in offsets {
        for size in sizes {
            grid.push((offset, size));
        }
    }
    grid
}

/// Drives write-in-flight / crash / dirty-restart / verify cycles
/// against the target.
pub struct SporOrchestrator {
    control: Arc<dyn ControlPlane>,
    io: Arc<dyn VolumeIo>,
    patterns: Arc<PatternStore>,
    config: HarnessConfig,
}

impl SporOrchestrator {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        io: Arc<dyn VolumeIo>,
        patterns: Arc<PatternStore>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            control,
            io,
            patterns,
            config,
        }
    }

    /// Single-volume cycle: start a timed write, crash partway through
    /// the planned duration (write failure expected), recover dirty, and
    /// prove both that pre-crash data survived and that the volume is
    /// fully writable again.
    pub async fn run_single(&self, scenario: &FaultScenario) -> Result<ScenarioState> {
        let array = scenario.array;
        let volume = *scenario.volumes.first().ok_or_else(|| {
            NautilusError::Workload("fault scenario has no volumes".to_string())
        })?;
        let mut state = ScenarioState::Idle;
        self.transition(&mut state, ScenarioState::WritingInFlight);

        let pattern = self.patterns.create_new(array, volume);
        let write_task = {
            let io = Arc::clone(&self.io);
            let pattern = pattern.clone();
            let (offset, size, run_time) = (scenario.offset, scenario.size, scenario.run_time);
            tokio::spawn(async move {
                io.write_pattern(array, volume, offset, size, pattern, Some(run_time))
                    .await
            })
        };

        // Crash at a fixed fraction of the planned duration, regardless
        // of actual write progress. An interrupted write is the point.
        tracing::info!("write fail expected");
        tokio::time::sleep(scenario.run_time.mul_f64(self.config.crash_fraction)).await;
        self.control.trigger_spor().await?;
        self.transition(&mut state, ScenarioState::CrashTriggered);

        match write_task.await {
            Ok(Ok(outcome)) => {
                tracing::info!(?outcome, "in-flight write joined");
            }
            Ok(Err(e)) => {
                // Expected outcome of crashing mid-write.
                tracing::info!(error = %e, "in-flight write aborted");
            }
            Err(e) => {
                return Err(NautilusError::Workload(format!("write task panicked: {e}")));
            }
        }

        self.recover(&mut state, array, &[volume]).await?;

        self.transition(&mut state, ScenarioState::Verifying);
        if !self
            .io
            .verify_pattern(array, volume, scenario.offset, scenario.size, pattern)
            .await?
        {
            tracing::error!(array, volume, "pre-crash pattern verification failed");
            self.transition(&mut state, ScenarioState::Fail);
            return Ok(state);
        }

        // Recovery alone is not enough; the volume must accept and hold
        // new writes.
        let fresh = self.patterns.create_new(array, volume);
        let outcome = self
            .io
            .write_pattern(
                array,
                volume,
                scenario.offset,
                scenario.size,
                fresh.clone(),
                None,
            )
            .await?;
        if outcome != WriteOutcome::Completed {
            tracing::error!(array, volume, "post-recovery write did not complete");
            self.transition(&mut state, ScenarioState::Fail);
            return Ok(state);
        }
        if !self
            .io
            .verify_pattern(array, volume, scenario.offset, scenario.size, fresh)
            .await?
        {
            tracing::error!(array, volume, "post-recovery pattern verification failed");
            self.transition(&mut state, ScenarioState::Fail);
            return Ok(state);
        }

        self.transition(&mut state, ScenarioState::Pass);
        Ok(state)
    }

    /// Multi-volume cycle: one concurrent write phase per volume, all
    /// joined before a single shared crash, then sequential per-volume
    /// recovery and verification.
    pub async fn run_multi(&self, scenario: &FaultScenario) -> Result<ScenarioState> {
        let array = scenario.array;
        let mut state = ScenarioState::Idle;
        self.transition(&mut state, ScenarioState::WritingInFlight);

        let mut tasks = Vec::with_capacity(scenario.volumes.len());
        for &volume in &scenario.volumes {
            let pattern = self.patterns.create_new(array, volume);
            let io = Arc::clone(&self.io);
            let (offset, size) = (scenario.offset, scenario.size);
            tasks.push(tokio::spawn(async move {
                io.write_pattern(array, volume, offset, size, pattern, None).await
            }));
        }
        for task in tasks {
            task.await
                .map_err(|e| NautilusError::Workload(format!("write task panicked: {e}")))??;
        }

        self.control.trigger_spor().await?;
        self.transition(&mut state, ScenarioState::CrashTriggered);

        self.recover(&mut state, array, &scenario.volumes).await?;

        self.transition(&mut state, ScenarioState::Verifying);
        for &volume in &scenario.volumes {
            let pattern = self
                .patterns
                .latest(array, volume)
                .ok_or_else(|| NautilusError::Workload(format!("no pattern for volume {volume}")))?;
            if !self
                .io
                .verify_pattern(array, volume, scenario.offset, scenario.size, pattern)
                .await?
            {
                tracing::error!(array, volume, "pattern verification failed after recovery");
                self.transition(&mut state, ScenarioState::Fail);
                return Ok(state);
            }
        }

        self.transition(&mut state, ScenarioState::Pass);
        Ok(state)
    }

    /// Unconditional recovery ladder. Any control-plane failure here is
    /// fatal to the scenario: verification preconditions are not met.
    async fn recover(
        &self,
        state: &mut ScenarioState,
        array: ArrayId,
        volumes: &[VolumeId],
    ) -> Result<()> {
        self.control.dirty_restart().await?;
        self.transition(state, ScenarioState::DirtyRestarted);

        for &volume in volumes {
            self.control.recreate_subsystem(array, volume).await?;
        }
        self.transition(state, ScenarioState::SubsystemRecreated);

        for &volume in volumes {
            self.control.mount_volume(array, volume).await?;
        }
        self.transition(state, ScenarioState::VolumeRemounted);
        Ok(())
    }

    fn transition(&self, state: &mut ScenarioState, next: ScenarioState) {
        tracing::info!("scenario state: {state} -> {next}");
        *state = next;
    }
}
