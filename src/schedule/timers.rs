use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Named, cancellable timers that deliver an event into a mailbox when they fire.
///
/// Arming a name that is already armed cancels the old handle first, so a name
/// never has more than one outstanding timer. Dropping the set cancels everything.
pub struct TimerSet<E> {
    tx: mpsc::Sender<E>,
    handles: HashMap<&'static str, JoinHandle<()>>,
}

impl<E: Send + 'static> TimerSet<E> {
    pub fn new(tx: mpsc::Sender<E>) -> Self {
        Self {
            tx,
            handles: HashMap::new(),
        }
    }

    /// Deliver `event` once after `delay`.
    pub fn arm_after(&mut self, name: &'static str, delay: Duration, event: E) {
        self.cancel(name);

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(event).await.is_err() {
                debug!(timer = name, "Timer fired after its mailbox closed");
            }
        });

        debug!(timer = name, delay_ms = delay.as_millis() as u64, "Armed timer");
        self.handles.insert(name, handle);
    }

    /// Deliver an event every `period`, first one after one full period.
    pub fn arm_every<F>(&mut self, name: &'static str, period: Duration, make_event: F)
    where
        F: Fn() -> E + Send + 'static,
    {
        self.cancel(name);

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(make_event()).await.is_err() {
                    debug!(timer = name, "Periodic timer stopped, mailbox closed");
                    break;
                }
            }
        });

        debug!(timer = name, period_ms = period.as_millis() as u64, "Armed periodic timer");
        self.handles.insert(name, handle);
    }

    /// Cancel a timer. Returns true if it had not fired yet.
    pub fn cancel(&mut self, name: &'static str) -> bool {
        match self.handles.remove(name) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                if pending {
                    debug!(timer = name, "Cancelled timer");
                }
                pending
            }
            None => false,
        }
    }

    pub fn is_armed(&self, name: &'static str) -> bool {
        self.handles
            .get(name)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl<E> Drop for TimerSet<E> {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}
