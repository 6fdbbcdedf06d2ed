// Scheduler: drives pipeline ticks on a fixed interval.
//
// One background task owns a tokio interval. A tick that overruns its
// interval makes the next one skip (MissedTickBehavior::Skip), and the
// pipeline's own in-flight guard suppresses any manual run that overlaps a
// scheduled one, so at most one pass is ever in flight.
//
// stop() halts dispatch on the pipeline, signals the loop through a watch
// channel and waits for the task. Items already started finish and persist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::run::{Pipeline, TickOutcome};
use crate::error::{ModerationError, Result};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    run_on_start: bool,
    running: AtomicBool,
    handle: Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration, run_on_start: bool) -> Self {
        Self {
            pipeline,
            // tokio panics on a zero period
            interval: interval.max(Duration::from_millis(1)),
            run_on_start,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Spawn the tick loop. Fails with `AlreadyStarted` if it is running.
    pub async fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(ModerationError::AlreadyStarted);
        }

        self.pipeline.resume();
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(tick_loop(
            self.pipeline.clone(),
            self.interval,
            self.run_on_start,
            rx,
        ));
        *handle = Some(LoopHandle { shutdown, task });
        self.running.store(true, Ordering::SeqCst);

        info!(
            interval_secs = self.interval.as_secs(),
            run_on_start = self.run_on_start,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop scheduling and wait for the in-flight tick to wind down.
    /// A no-op when not started.
    pub async fn stop(&self) {
        let Some(LoopHandle { shutdown, task }) = self.handle.lock().await.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        self.pipeline.halt();
        // The loop may already be gone; a closed channel is fine
        let _ = shutdown.send(true);

        if let Err(e) = task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
        info!("Scheduler stopped");
    }

    /// Started and not stopped.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A pipeline pass is executing right now.
    pub fn in_flight(&self) -> bool {
        self.pipeline.is_running()
    }
}

async fn tick_loop(
    pipeline: Arc<Pipeline>,
    period: Duration,
    run_on_start: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let first = if run_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        match pipeline.run_once().await {
            Ok(TickOutcome::Completed(_)) => {}
            Ok(TickOutcome::Suppressed) => {
                info!("Scheduled tick suppressed, a run is already in flight")
            }
            Err(e) => error!(error = %e, "Pipeline tick failed, retrying next interval"),
        }
    }
}
