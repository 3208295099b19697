use super::{MotionType, SamplingMode};
use crate::config::types::SamplingConfig;
use crate::ingest::IngestEvent;
use crate::schedule::TimerSet;
use crate::source::{PositionSource, PositionSourceError};
use crate::status::StatusBoard;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEBOUNCE_TIMER: &str = "duty-cycle-debounce";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DutyCycleState {
    /// Low-power sampling.
    #[default]
    Idle,
    /// Movement seen, waiting for it to persist.
    DebouncingUp,
    /// High-resolution sampling.
    Active,
    /// Stillness seen, waiting for it to persist.
    DebouncingDown,
    /// Location permission is gone; no sampling until it comes back.
    Halted,
}

impl DutyCycleState {
    /// Mode the position source is in while in this state.
    pub fn committed_mode(&self) -> SamplingMode {
        match self {
            DutyCycleState::Active | DutyCycleState::DebouncingDown => SamplingMode::Continuous,
            _ => SamplingMode::SignificantChange,
        }
    }
}

/// A committed duty-cycle transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub from: DutyCycleState,
    pub to: DutyCycleState,
    pub mode: SamplingMode,
    pub motion: MotionType,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DutyCycleConfig {
    /// How long a classification must persist before committing. Zero acts immediately.
    pub required_motion: Duration,
    pub moving: HashSet<MotionType>,
}

impl DutyCycleConfig {
    pub fn new(required_motion_seconds: u64, moving: impl IntoIterator<Item = MotionType>) -> Self {
        Self {
            required_motion: Duration::from_secs(required_motion_seconds),
            moving: moving.into_iter().collect(),
        }
    }
}

impl From<&SamplingConfig> for DutyCycleConfig {
    fn from(config: &SamplingConfig) -> Self {
        DutyCycleConfig::new(
            config.required_motion_seconds,
            config.moving_types.iter().copied(),
        )
    }
}

/// Debounced state machine switching the position source between
/// significant-change and continuous sampling.
///
/// Runs inside the ingestion lane. Debounce timers post
/// [`IngestEvent::DebounceElapsed`] back into the lane's mailbox; every arm
/// bumps a generation counter so a firing that raced with a cancel is ignored.
pub struct DutyCycleController<P> {
    config: DutyCycleConfig,
    source: P,
    state: DutyCycleState,
    motion: MotionType,
    generation: u64,
    timers: TimerSet<IngestEvent>,
    board: StatusBoard,
}

impl<P: PositionSource> DutyCycleController<P> {
    pub fn new(
        config: DutyCycleConfig,
        source: P,
        timers: TimerSet<IngestEvent>,
        board: StatusBoard,
    ) -> Self {
        Self {
            config,
            source,
            state: DutyCycleState::Idle,
            motion: MotionType::Unknown,
            generation: 0,
            timers,
            board,
        }
    }

    /// Put the position source into low-power mode if it is not already there.
    pub fn start(&mut self) {
        match self.switch_source(SamplingMode::SignificantChange) {
            Ok(()) => {
                self.board.duty_cycle_changed(self.state);
                info!(mode = %SamplingMode::SignificantChange, "Duty cycle started");
            }
            Err(e) => self.source_failed(e, DutyCycleState::Idle),
        }
    }

    pub fn state(&self) -> DutyCycleState {
        self.state
    }

    pub fn motion(&self) -> MotionType {
        self.motion
    }

    /// False once permission is revoked; fixes must be dropped.
    pub fn is_sampling(&self) -> bool {
        self.state != DutyCycleState::Halted
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut P {
        &mut self.source
    }

    fn is_moving(&self, motion: MotionType) -> bool {
        self.config.moving.contains(&motion)
    }

    pub fn on_motion(&mut self, motion: MotionType) {
        let previous = std::mem::replace(&mut self.motion, motion);
        if previous != motion {
            self.board.motion_changed(motion);
            debug!(from = %previous, to = %motion, state = ?self.state, "Motion classification changed");
        }

        let moving = self.is_moving(motion);
        match (self.state, moving) {
            (DutyCycleState::Halted, _) => {}
            (DutyCycleState::Idle, true) => self.begin(DutyCycleState::Active),
            (DutyCycleState::Active, false) => self.begin(DutyCycleState::Idle),
            (DutyCycleState::Idle, false) | (DutyCycleState::Active, true) => {}
            (DutyCycleState::DebouncingUp, true) | (DutyCycleState::DebouncingDown, false) => {
                // A different classification in the same direction restarts the wait
                if previous != motion {
                    let target = self.pending_target();
                    self.begin(target);
                }
            }
            (DutyCycleState::DebouncingUp, false) => self.abandon(DutyCycleState::Idle),
            (DutyCycleState::DebouncingDown, true) => self.abandon(DutyCycleState::Active),
        }
    }

    pub fn on_debounce_elapsed(&mut self, generation: u64) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring stale debounce timer");
            return;
        }

        match self.state {
            DutyCycleState::DebouncingUp | DutyCycleState::DebouncingDown => {
                let target = self.pending_target();
                self.commit(target);
            }
            state => debug!(?state, "Debounce timer fired outside a debounce state"),
        }
    }

    pub fn on_permission_revoked(&mut self) {
        if self.state != DutyCycleState::Halted {
            self.halt();
        }
    }

    pub fn on_permission_restored(&mut self) {
        if self.state != DutyCycleState::Halted {
            return;
        }

        if let Err(e) = self.switch_source(SamplingMode::SignificantChange) {
            warn!(error = %e, "Position source still unavailable after permission restore");
            return;
        }

        self.state = DutyCycleState::Idle;
        self.board.sampling_halted(false);
        self.publish(DutyCycleState::Halted);
        info!("Location permission restored, sampling resumed");

        if self.is_moving(self.motion) {
            self.begin(DutyCycleState::Active);
        }
    }

    /// Cancel any outstanding debounce timer.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
    }

    fn pending_target(&self) -> DutyCycleState {
        match self.state {
            DutyCycleState::DebouncingUp => DutyCycleState::Active,
            _ => DutyCycleState::Idle,
        }
    }

    fn begin(&mut self, target: DutyCycleState) {
        if self.config.required_motion.is_zero() {
            self.commit(target);
            return;
        }

        self.generation += 1;
        self.timers.arm_after(
            DEBOUNCE_TIMER,
            self.config.required_motion,
            IngestEvent::DebounceElapsed {
                generation: self.generation,
            },
        );

        self.state = match target {
            DutyCycleState::Active => DutyCycleState::DebouncingUp,
            _ => DutyCycleState::DebouncingDown,
        };
        self.board.duty_cycle_changed(self.state);
        debug!(
            state = ?self.state,
            motion = %self.motion,
            wait_secs = self.config.required_motion.as_secs_f64(),
            "Debouncing duty-cycle transition"
        );
    }

    /// Drop a pending transition and fall back to the committed state.
    fn abandon(&mut self, committed: DutyCycleState) {
        self.timers.cancel(DEBOUNCE_TIMER);
        self.generation += 1;
        self.state = committed;
        self.board.duty_cycle_changed(committed);
        debug!(state = ?committed, motion = %self.motion, "Pending transition cancelled");
    }

    fn commit(&mut self, target: DutyCycleState) {
        self.timers.cancel(DEBOUNCE_TIMER);

        let from = match target {
            DutyCycleState::Active => DutyCycleState::Idle,
            _ => DutyCycleState::Active,
        };
        let mode = target.committed_mode();

        if let Err(e) = self.switch_source(mode) {
            self.source_failed(e, from);
            return;
        }

        self.state = target;
        self.publish(from);
    }

    fn publish(&self, from: DutyCycleState) {
        let event = TransitionEvent {
            from,
            to: self.state,
            mode: self.state.committed_mode(),
            motion: self.motion,
            at: Utc::now(),
        };
        info!(
            from = ?event.from,
            to = ?event.to,
            mode = %event.mode,
            motion = %event.motion,
            "Duty-cycle transition"
        );
        self.board.transition(event);
    }

    /// Switch only when the source is not already in `mode`.
    fn switch_source(&mut self, mode: SamplingMode) -> Result<(), PositionSourceError> {
        if self.source.mode() == mode {
            return Ok(());
        }
        self.source.set_mode(mode)
    }

    fn source_failed(&mut self, error: PositionSourceError, committed: DutyCycleState) {
        match error {
            PositionSourceError::PermissionRevoked => self.halt(),
            other => {
                warn!(error = %other, state = ?committed, "Position source mode switch failed");
                self.generation += 1;
                self.state = committed;
                self.board.duty_cycle_changed(committed);
            }
        }
    }

    fn halt(&mut self) {
        self.timers.cancel(DEBOUNCE_TIMER);
        self.generation += 1;

        let from = self.state;
        self.state = DutyCycleState::Halted;
        warn!(from = ?from, "Location permission revoked, sampling halted");
        self.board.sampling_halted(true);
        self.publish(from);
    }
}
