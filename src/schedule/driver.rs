use super::TimerSet;
use crate::config::types::ScheduleConfig;
use crate::upload::{CycleOutcome, UploadCoordinator, UploadError};
use chrono::{DateTime, Local, LocalResult, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const HEARTBEAT_TIMER: &str = "heartbeat";
pub const MIDNIGHT_TIMER: &str = "midnight-upload";

const FALLBACK_DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
pub enum ScheduleEvent {
    Heartbeat,
    Midnight,
    SetAutoUpload(bool),
    UploadNow(oneshot::Sender<Result<CycleOutcome, UploadError>>),
    Shutdown,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("schedule driver is not running")]
    Closed,

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Time from `now` until the next local midnight in `now`'s zone.
///
/// When midnight is ambiguous the earlier instant wins; when the zone skips
/// midnight the first valid instant after the gap is used.
pub fn until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let Some(midnight) = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
    else {
        return FALLBACK_DAY;
    };
    let zone = now.timezone();

    let target = match zone.from_local_datetime(&midnight) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => match (1..=4)
            .map(|h| zone.from_local_datetime(&(midnight + chrono::Duration::minutes(30 * h))))
            .find_map(|r| r.earliest())
        {
            Some(t) => t,
            None => return FALLBACK_DAY,
        },
    };

    (target.with_timezone(&Utc) - now.with_timezone(&Utc))
        .to_std()
        .unwrap_or(Duration::ZERO)
}

fn until_local_midnight() -> Duration {
    until_next_midnight(&Local::now())
}

/// Sending side of the schedule driver.
#[derive(Clone)]
pub struct ScheduleHandle {
    tx: mpsc::Sender<ScheduleEvent>,
}

impl ScheduleHandle {
    /// Run an upload cycle now and wait for its outcome.
    pub async fn upload_now(&self) -> Result<CycleOutcome, ScheduleError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ScheduleEvent::UploadNow(reply))
            .await
            .map_err(|_| ScheduleError::Closed)?;
        Ok(rx.await.map_err(|_| ScheduleError::Closed)??)
    }

    pub async fn set_auto_upload(&self, enabled: bool) -> Result<(), ScheduleError> {
        self.tx
            .send(ScheduleEvent::SetAutoUpload(enabled))
            .await
            .map_err(|_| ScheduleError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), ScheduleError> {
        self.tx
            .send(ScheduleEvent::Shutdown)
            .await
            .map_err(|_| ScheduleError::Closed)
    }
}

/// Owns the heartbeat and midnight timers and triggers upload cycles.
///
/// The driver loop never awaits the network itself: heartbeats and cycles run
/// on spawned tasks that are drained at shutdown.
pub struct ScheduleDriver {
    rx: mpsc::Receiver<ScheduleEvent>,
    timers: TimerSet<ScheduleEvent>,
    coordinator: Arc<UploadCoordinator>,
    config: ScheduleConfig,
    auto_upload: bool,
    next_midnight: Box<dyn Fn() -> Duration + Send>,
    heartbeat_task: Option<JoinHandle<()>>,
    tasks: JoinSet<()>,
}

impl ScheduleDriver {
    pub fn new(
        coordinator: Arc<UploadCoordinator>,
        config: ScheduleConfig,
    ) -> (Self, ScheduleHandle) {
        let (tx, rx) = mpsc::channel(32);
        let driver = Self {
            rx,
            timers: TimerSet::new(tx.clone()),
            coordinator,
            auto_upload: config.auto_upload_at_midnight,
            config,
            next_midnight: Box::new(until_local_midnight),
            heartbeat_task: None,
            tasks: JoinSet::new(),
        };
        (driver, ScheduleHandle { tx })
    }

    /// Replace the local-midnight clock.
    pub fn with_midnight_clock(mut self, clock: impl Fn() -> Duration + Send + 'static) -> Self {
        self.next_midnight = Box::new(clock);
        self
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if self.config.heartbeat_enabled {
            self.timers.arm_every(HEARTBEAT_TIMER, self.config.heartbeat_interval, || {
                ScheduleEvent::Heartbeat
            });
        }
        if self.auto_upload {
            self.arm_midnight();
        }
        info!(
            heartbeat_enabled = self.config.heartbeat_enabled,
            heartbeat_secs = self.config.heartbeat_interval.as_secs(),
            auto_upload = self.auto_upload,
            "Schedule driver started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Schedule driver cancelled");
                    break;
                }

                event = self.rx.recv() => {
                    match event {
                        Some(ScheduleEvent::Shutdown) | None => break,
                        Some(event) => self.handle(event),
                    }
                }

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Scheduled task panicked");
                    }
                }
            }
        }

        self.timers.cancel_all();
        let in_flight = self.tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight network calls");
        }
        while self.tasks.join_next().await.is_some() {}
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        info!("Schedule driver shutdown complete");
    }

    fn handle(&mut self, event: ScheduleEvent) {
        match event {
            ScheduleEvent::Heartbeat => self.send_heartbeat(),
            // A firing can already be queued when auto-upload is switched off
            ScheduleEvent::Midnight if !self.auto_upload => {
                debug!("Ignoring midnight firing, auto-upload is disabled");
            }
            ScheduleEvent::Midnight => {
                self.midnight_upload();
                self.arm_midnight();
            }
            ScheduleEvent::SetAutoUpload(enabled) => self.set_auto_upload(enabled),
            ScheduleEvent::UploadNow(reply) => {
                let coordinator = self.coordinator.clone();
                self.tasks.spawn(async move {
                    let _ = reply.send(coordinator.run_upload_cycle().await);
                });
            }
            ScheduleEvent::Shutdown => {}
        }
    }

    fn send_heartbeat(&mut self) {
        if self.heartbeat_task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Previous heartbeat still in flight, skipping");
            return;
        }

        let sink = self.coordinator.sink().clone();
        let deadline = self.coordinator.call_timeout();
        self.heartbeat_task = Some(tokio::spawn(async move {
            match tokio::time::timeout(deadline, sink.heartbeat()).await {
                Ok(Ok(())) => debug!("Heartbeat sent"),
                Ok(Err(e)) => warn!(error = %e, "Heartbeat failed"),
                Err(_) => warn!("Heartbeat timed out"),
            }
        }));
    }

    fn midnight_upload(&mut self) {
        let coordinator = self.coordinator.clone();
        self.tasks.spawn(async move {
            match coordinator.queued_buckets().await {
                Ok(queued) if queued.is_empty() => debug!("Midnight upload: nothing queued"),
                Ok(queued) => {
                    info!(buckets = queued.len(), "Midnight auto-upload");
                    if let Err(e) = coordinator.run_upload_cycle().await {
                        error!(error = %e, "Midnight upload cycle failed");
                    }
                }
                Err(e) => error!(error = %e, "Midnight upload could not read queue"),
            }
        });
    }

    fn arm_midnight(&mut self) {
        let delay = (self.next_midnight)();
        self.timers.arm_after(MIDNIGHT_TIMER, delay, ScheduleEvent::Midnight);
        info!(in_secs = delay.as_secs(), "Next auto-upload scheduled");
    }

    fn set_auto_upload(&mut self, enabled: bool) {
        self.auto_upload = enabled;
        if enabled {
            self.arm_midnight();
        } else if self.timers.cancel(MIDNIGHT_TIMER) {
            info!("Auto-upload disabled");
        }
    }
}
