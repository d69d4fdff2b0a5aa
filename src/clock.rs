/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! The playback clock: a cancellable periodic ticker that drives frame
//! dequeuing at a cadence derived from the measured source frame duration
//! and the playback speed.
//!
//! A single fine-grained polling loop compares elapsed time against the
//! derived interval on every pass, so a speed or frame-duration change takes
//! effect within one polling quantum without tearing the timer down. The
//! last-fired mark advances by the actual elapsed time rather than a fixed
//! increment, so scheduling drift does not accumulate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use web_time::{Duration, Instant};

/// How often the tick loop re-checks elapsed time. Finer-grained than any
/// expected target frame period.
const POLL_QUANTUM: Duration = Duration::from_millis(2);

/// Callback invoked on every clock tick with the seconds actually elapsed
/// since the previous tick.
pub type TickFn = Box<dyn Fn(f64) + Send + 'static>;

/// Derives the tick interval from the live frame-duration estimate and the
/// playback speed multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConfig {
    /// Live-estimated source frame period in seconds
    pub frame_duration_seconds: f64,
    /// Playback speed multiplier; divides the derived interval
    pub playback_speed: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            frame_duration_seconds: 1.0 / 30.0,
            playback_speed: 1.0,
        }
    }
}

impl ClockConfig {
    /// The effective tick period: `frame_duration_seconds / playback_speed`.
    pub fn derived_interval(&self) -> Duration {
        Duration::from_secs_f64(self.frame_duration_seconds / self.playback_speed)
    }
}

/// One running tick loop. Each `start` creates a fresh session with its own
/// liveness flag, so a loop from a previous session can never observe a
/// later session as its own.
struct ClockSession {
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// A cancellable periodic ticker, independent of frame content.
///
/// `start` and `stop` are idempotent; `stop` is safe from any thread,
/// including the tick thread itself (from a foreign thread it joins the
/// loop, guaranteeing no tick fires after it returns).
pub struct PlaybackClock {
    config: Arc<Mutex<ClockConfig>>,
    reset_phase: Arc<AtomicBool>,
    session: Mutex<Option<ClockSession>>,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

impl PlaybackClock {
    /// Create a stopped clock with the given initial configuration.
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            reset_phase: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    /// Whether a tick loop is currently running.
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|session| session.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Begin the periodic tick loop on a dedicated thread. No-op if already
    /// running. The callback fires on the tick thread, never on the caller.
    pub fn start(&self, on_tick: TickFn) {
        let mut session = self.session.lock().unwrap();
        if session
            .as_ref()
            .is_some_and(|s| s.alive.load(Ordering::SeqCst))
        {
            log::debug!("Playback clock already running, ignoring start");
            return;
        }

        let alive = Arc::new(AtomicBool::new(true));
        let config = Arc::clone(&self.config);
        let reset_phase = Arc::clone(&self.reset_phase);
        reset_phase.store(false, Ordering::SeqCst);

        let loop_alive = Arc::clone(&alive);
        let handle = thread::spawn(move || {
            let mut last_fired = Instant::now();
            while loop_alive.load(Ordering::SeqCst) {
                thread::sleep(POLL_QUANTUM);
                if reset_phase.swap(false, Ordering::SeqCst) {
                    last_fired = Instant::now();
                    continue;
                }
                let interval = config.lock().unwrap().derived_interval();
                let elapsed = last_fired.elapsed();
                if elapsed >= interval {
                    // Advance by what actually passed, not the nominal
                    // interval, so the loop never builds a backlog.
                    last_fired += elapsed;
                    if !loop_alive.load(Ordering::SeqCst) {
                        break;
                    }
                    on_tick(elapsed.as_secs_f64());
                }
            }
        });

        *session = Some(ClockSession {
            alive,
            handle: Some(handle),
        });
    }

    /// Cancel the tick loop. No-op if not running. When called from a
    /// thread other than the tick thread, the loop is joined before
    /// returning and no further tick fires afterwards. From the tick thread
    /// itself the loop is flagged down and exits within one quantum.
    pub fn stop(&self) {
        let session = self.session.lock().unwrap().take();
        let Some(mut session) = session else {
            return;
        };
        session.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = session.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Update the playback speed multiplier. Takes effect within one
    /// polling quantum; no timer rebuild. Non-positive or non-finite speeds
    /// are ignored.
    pub fn set_playback_speed(&self, speed: f64) {
        if !(speed.is_finite() && speed > 0.0) {
            log::warn!("Ignoring invalid playback speed {speed}");
            return;
        }
        self.config.lock().unwrap().playback_speed = speed;
    }

    /// Feed a new source frame-duration estimate in seconds. Non-positive
    /// or non-finite durations are ignored; they would derive an infinite
    /// or negative tick rate.
    pub fn set_frame_duration(&self, seconds: f64) {
        if !(seconds.is_finite() && seconds > 0.0) {
            log::debug!("Ignoring invalid frame duration {seconds}");
            return;
        }
        self.config.lock().unwrap().frame_duration_seconds = seconds;
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ClockConfig {
        *self.config.lock().unwrap()
    }

    /// Reset accumulated phase: the loop re-anchors its last-fired mark on
    /// the next pass. Run state is unaffected.
    pub fn clear(&self) {
        self.reset_phase.store(true, Ordering::SeqCst);
    }
}

impl Drop for PlaybackClock {
    fn drop(&mut self) {
        self.stop();
    }
}
