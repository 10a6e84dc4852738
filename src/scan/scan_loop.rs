// SPDX-License-Identifier: GPL-3.0-only

//! Frame sampling loop
//!
//! Samples the current session frame at a bounded rate and runs the
//! decoder on a blocking worker. Attempts are strictly serialized: the
//! next tick is not taken until the previous decode resolved, and missed
//! ticks are skipped rather than queued. The first successful decode is
//! authoritative and is reported exactly once.

use super::types::{ScanEvent, ScanLoopState, ScanResult};
use crate::backends::camera::CameraSession;
use crate::constants::scan;
use crate::scan::decoder::FrameDecoder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Handle to a running scan loop
pub struct ScanLoopHandle {
    state: Arc<Mutex<ScanLoopState>>,
    stop_flag: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ScanLoopHandle {
    /// Current loop state
    pub fn state(&self) -> ScanLoopState {
        self.state.lock().unwrap().clone()
    }

    /// Stop sampling.
    ///
    /// Safe to call any number of times, in any state. No event is
    /// delivered after this returns.
    pub fn stop(&self) {
        let first = !self.stop_flag.swap(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        if first {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, ScanLoopState::NotStarted | ScanLoopState::Sampling) {
                *state = ScanLoopState::Stopped;
            }
        }
    }
}

/// Spawns sampling loops
pub struct ScanLoop;

impl ScanLoop {
    /// Start sampling `session` through `decoder`, reporting on `events`.
    ///
    /// The rate is clamped into the supported range. The returned handle
    /// owns the loop; the loop also ends on its own after the accepted
    /// decode or when the circuit breaker fires.
    pub fn spawn(
        session: Arc<dyn CameraSession>,
        decoder: Arc<dyn FrameDecoder>,
        sample_rate_hz: u32,
        events: mpsc::UnboundedSender<ScanEvent>,
    ) -> ScanLoopHandle {
        let state = Arc::new(Mutex::new(ScanLoopState::NotStarted));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run(
            session,
            decoder,
            scan::clamp_sample_rate(sample_rate_hz),
            events,
            Arc::clone(&state),
            Arc::clone(&stop_flag),
        ));

        ScanLoopHandle {
            state,
            stop_flag,
            task: Mutex::new(Some(task)),
        }
    }
}

async fn run(
    session: Arc<dyn CameraSession>,
    decoder: Arc<dyn FrameDecoder>,
    sample_rate_hz: u32,
    events: mpsc::UnboundedSender<ScanEvent>,
    state: Arc<Mutex<ScanLoopState>>,
    stop_flag: Arc<AtomicBool>,
) {
    *state.lock().unwrap() = ScanLoopState::Sampling;
    debug!(sample_rate_hz, "Scan loop sampling");

    let mut interval = tokio::time::interval(Duration::from_millis(
        1000 / u64::from(sample_rate_hz),
    ));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut consecutive_failures = 0u32;

    loop {
        interval.tick().await;
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        let Some(frame) = session.frame() else {
            // Camera still warming up; nothing to decode yet
            continue;
        };

        let decoder_for_tick = Arc::clone(&decoder);
        // Awaiting the blocking task here is what serializes decode
        // attempts: there is never more than one in flight per session.
        let outcome =
            tokio::task::spawn_blocking(move || decoder_for_tick.decode(&frame)).await;

        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        match outcome {
            Ok(Some(result)) => {
                accept(&state, &events, result);
                break;
            }
            Ok(None) => {
                // Routine miss; also heals the failure streak
                consecutive_failures = 0;
            }
            Err(join_err) => {
                consecutive_failures += 1;
                warn!(
                    error = %join_err,
                    count = consecutive_failures,
                    "Decoder crashed on frame"
                );
                if consecutive_failures >= scan::MAX_CONSECUTIVE_DECODER_FAILURES {
                    let reason = format!(
                        "decoder failed on {} consecutive frames",
                        consecutive_failures
                    );
                    *state.lock().unwrap() = ScanLoopState::Error(reason.clone());
                    let _ = events.send(ScanEvent::Failed(reason));
                    break;
                }
            }
        }
    }
}

/// Record the accepted decode and report it exactly once
fn accept(
    state: &Arc<Mutex<ScanLoopState>>,
    events: &mpsc::UnboundedSender<ScanEvent>,
    result: ScanResult,
) {
    let mut state = state.lock().unwrap();
    if *state != ScanLoopState::Sampling {
        return;
    }
    *state = ScanLoopState::Completed;
    debug!(payload = %result.text, "Scan accepted, loop complete");
    let _ = events.send(ScanEvent::Decoded(result));
}
