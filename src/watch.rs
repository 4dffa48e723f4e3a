//! Background status poller
//!
//! Replaces an external polling loop: every interval, all submitted and
//! running jobs are polled through the orchestrator, which applies outcomes
//! under the same per-job locks as interactive calls.

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Granularity at which a sleeping poller notices a stop request
const STOP_CHECK: Duration = Duration::from_millis(100);

fn sleep_unless_stopped(interval: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(STOP_CHECK.min(deadline - now));
    }
}

/// Poll active jobs until `stop` is set, or, with `exit_when_idle`, until no
/// job is left to poll. Returns the number of polling rounds.
pub fn run_poller(
    orchestrator: &Orchestrator,
    interval: Duration,
    stop: &AtomicBool,
    exit_when_idle: bool,
) -> Result<usize> {
    let mut rounds = 0;
    while !stop.load(Ordering::Relaxed) {
        let polled = orchestrator.poll_active_jobs()?;
        rounds += 1;
        log::debug!("Poll round {}: {} active jobs", rounds, polled);
        if polled == 0 && exit_when_idle {
            break;
        }
        sleep_unless_stopped(interval, stop);
    }
    Ok(rounds)
}

/// Poller running on its own thread
pub struct Poller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn spawn(orchestrator: Orchestrator, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("mutaflow-poller".to_string())
            .spawn(move || {
                // a failed round is logged and retried on the next interval
                while !flag.load(Ordering::Relaxed) {
                    if let Err(e) = run_poller(&orchestrator, interval, &flag, false) {
                        log::error!("Status poll failed: {}", e);
                        sleep_unless_stopped(interval, &flag);
                    }
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Cannot start status poller: {}", e);
                None
            }
        };
        Poller { stop, handle }
    }

    /// Signal the poller and wait for its thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Status poller panicked");
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
