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

//! The media link: absorbs network-delivered decoded frames whose arrival
//! is irregular and re-emits them at a steady, source-derived cadence.
//!
//! Frames accumulate in a timestamp-ordered queue; a watermark policy over
//! the queue's accumulated duration decides when dequeuing starts, pauses
//! and drains, and a [`PlaybackClock`] tick is the trigger that releases
//! the next frame to the delegate.

use std::sync::{Arc, Mutex};

use crate::clock::{ClockConfig, PlaybackClock};
use crate::error::{MediaLinkError, Result};
use crate::frame::{AudioBuffer, VideoFrame};
use crate::frame_queue::FrameQueue;

/// In audio-only mode, playback is held until this many audio buffers are
/// scheduled on the render path.
const MIN_SCHEDULED_AUDIO_BUFFERS: usize = 10;

/// Buffering state of the link.
///
/// Transitions are the sole trigger for
/// [`MediaLinkDelegate::on_buffering_changed`] notifications: the delegate
/// hears about each entry into and exit from the buffering condition
/// (`Filling` or `Buffering`) exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Initial fill: dequeuing disabled, frames only accumulate.
    Filling,
    /// Steady state: the clock releases one frame per tick.
    Ready,
    /// Starved: dequeuing suspended until the buffer recovers past the
    /// resume watermark.
    Buffering,
    /// Overfull: frames are discarded without delivery until the buffer is
    /// back at the initial-fill level.
    Draining,
}

impl BufferState {
    /// Whether this state counts as "buffering" towards the delegate, i.e.
    /// the consumer should show a spinner.
    pub fn is_buffering(self) -> bool {
        matches!(self, BufferState::Filling | BufferState::Buffering)
    }
}

/// Watermark and speed configuration for a [`MediaLink`].
///
/// All watermarks are durations of buffered media in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaLinkConfig {
    /// Accumulated duration required to leave `Filling` and start dequeuing
    pub initial_fill_watermark: f64,
    /// Duration at or below which the link enters `Buffering`
    pub low_watermark: f64,
    /// Duration required to leave `Buffering` and resume dequeuing
    pub resume_watermark: f64,
    /// Duration above which the tick handler drains back down to the
    /// initial-fill watermark, bounding worst-case latency
    pub high_watermark: f64,
    /// Steady-state minimum duration required for a tick to dequeue
    pub min_dequeue_watermark: f64,
    /// Playback speed multiplier; divides the derived dequeue interval
    pub playback_speed: f64,
}

impl Default for MediaLinkConfig {
    fn default() -> Self {
        Self {
            initial_fill_watermark: 1.0,
            low_watermark: 0.2,
            resume_watermark: 0.6,
            high_watermark: 3.0,
            min_dequeue_watermark: 0.0,
            playback_speed: 1.0,
        }
    }
}

impl MediaLinkConfig {
    /// Check watermark ordering and speed validity.
    pub fn validate(&self) -> Result<()> {
        let watermarks = [
            self.min_dequeue_watermark,
            self.low_watermark,
            self.resume_watermark,
            self.initial_fill_watermark,
            self.high_watermark,
        ];
        if watermarks.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(MediaLinkError::InvalidConfig(
                "watermarks must be finite and non-negative".to_string(),
            ));
        }
        if !(self.low_watermark <= self.resume_watermark
            && self.resume_watermark <= self.initial_fill_watermark
            && self.initial_fill_watermark <= self.high_watermark)
        {
            return Err(MediaLinkError::InvalidConfig(
                "watermarks must satisfy low <= resume <= initial fill <= high".to_string(),
            ));
        }
        if !(self.playback_speed.is_finite() && self.playback_speed > 0.0) {
            return Err(MediaLinkError::InvalidConfig(format!(
                "playback speed must be positive, got {}",
                self.playback_speed
            )));
        }
        Ok(())
    }
}

/// The rendering/UI side of the link. All callbacks fire off the caller's
/// thread (producer or clock thread) and never while the link's internal
/// lock is held, so a delegate may call back into the link.
pub trait MediaLinkDelegate: Send + Sync {
    /// One dequeued video frame, in nondecreasing timestamp order.
    fn on_frame_ready(&self, frame: VideoFrame);
    /// Entry into or exit from the buffering condition, at most once per
    /// actual transition.
    fn on_buffering_changed(&self, is_buffering: bool);
    /// Current accumulated duration, reported on every enqueue.
    fn on_buffer_size(&self, seconds: f64);
    /// Instantaneous estimated source frame rate, reported on every enqueue
    /// after the first with a positive timestamp delta.
    fn on_frame_rate(&self, fps: f64);
}

/// State behind the link's single mutual-exclusion boundary. Producer
/// enqueues and clock ticks both run through this lock.
struct LinkState {
    /// `None` outside a running session; a tick then is a benign no-op.
    queue: Option<FrameQueue>,
    state: BufferState,
    /// Minimum accumulated duration a tick needs before it dequeues.
    /// Raised to the resume watermark while buffering.
    active_min_watermark: f64,
    last_timestamp: Option<f64>,
    scheduled_audio_buffers: usize,
    audio_buffering: bool,
    has_video: bool,
    running: bool,
}

impl LinkState {
    fn fresh(config: &MediaLinkConfig) -> Self {
        Self {
            queue: Some(FrameQueue::new()),
            state: BufferState::Filling,
            active_min_watermark: config.initial_fill_watermark,
            last_timestamp: None,
            scheduled_audio_buffers: 0,
            audio_buffering: true,
            has_video: false,
            running: false,
        }
    }
}

/// The playback-side jitter buffer.
///
/// Owns one timestamp-ordered [`FrameQueue`] and one [`PlaybackClock`];
/// the clock knows nothing about the queue, it is a generic tick source.
/// Created once per playback session via [`start_running`](Self::start_running)
/// and torn down with [`stop_running`](Self::stop_running), after which the
/// session can be restarted cleanly.
pub struct MediaLink {
    config: MediaLinkConfig,
    delegate: Arc<dyn MediaLinkDelegate>,
    clock: PlaybackClock,
    shared: Arc<Mutex<LinkState>>,
}

impl MediaLink {
    /// Create a stopped link. Fails only on an invalid configuration.
    pub fn new(config: MediaLinkConfig, delegate: Arc<dyn MediaLinkDelegate>) -> Result<Self> {
        config.validate()?;
        let clock = PlaybackClock::new(ClockConfig {
            playback_speed: config.playback_speed,
            ..ClockConfig::default()
        });
        let shared = Arc::new(Mutex::new(LinkState::fresh(&config)));
        Ok(Self {
            config,
            delegate,
            clock,
            shared,
        })
    }

    /// Whether a playback session is active.
    pub fn is_running(&self) -> bool {
        self.shared.lock().unwrap().running
    }

    /// Current buffering state.
    pub fn state(&self) -> BufferState {
        self.shared.lock().unwrap().state
    }

    /// Accumulated duration of buffered video in seconds.
    pub fn buffer_size_seconds(&self) -> f64 {
        self.shared
            .lock()
            .unwrap()
            .queue
            .as_ref()
            .map(|queue| queue.duration_seconds())
            .unwrap_or(0.0)
    }

    /// Whether the audio-only path is currently holding playback.
    pub fn is_audio_buffering(&self) -> bool {
        self.shared.lock().unwrap().audio_buffering
    }

    /// Begin a playback session: reset all state to `Filling`, create an
    /// empty frame queue and start the clock. No-op while already running.
    pub fn start_running(&self) {
        {
            let mut guard = self.shared.lock().unwrap();
            if guard.running {
                log::debug!("Media link already running, ignoring start");
                return;
            }
            *guard = LinkState::fresh(&self.config);
            guard.running = true;
        }
        self.clock.set_playback_speed(self.config.playback_speed);
        self.clock.clear();

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let delegate = Arc::clone(&self.delegate);
        self.clock.start(Box::new(move |_elapsed| {
            process_tick(&shared, &config, &delegate);
        }));

        // A stop may have raced into the window between releasing the state
        // lock and starting the clock; it found no tick loop to cancel, so
        // finish the cancellation on its behalf.
        if !self.shared.lock().unwrap().running {
            self.clock.stop();
        }
    }

    /// End the playback session: stop the clock, release the frame queue
    /// and reset all timestamps and counters. No-op while already stopped.
    /// Once this returns no further delegate callbacks fire for the
    /// session; an in-flight tick completes first.
    pub fn stop_running(&self) {
        {
            // Teardown must complete even if a panic poisoned the state
            // lock while it was held; the queue is released either way.
            let mut guard = match self.shared.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    log::error!(
                        "{}",
                        MediaLinkError::ResetFailure("shared state lock poisoned".to_string())
                    );
                    self.shared.clear_poison();
                    poisoned.into_inner()
                }
            };
            if !guard.running {
                log::debug!("Media link already stopped, ignoring stop");
                return;
            }
            guard.running = false;
            guard.queue = None;
            guard.last_timestamp = None;
            guard.scheduled_audio_buffers = 0;
            guard.audio_buffering = true;
            guard.has_video = false;
            guard.state = BufferState::Filling;
        }
        self.clock.stop();
    }

    /// Change the playback speed multiplier. The dequeue cadence follows
    /// within one clock polling quantum.
    pub fn set_playback_speed(&self, speed: f64) {
        self.clock.set_playback_speed(speed);
    }

    /// Accept a decoded video frame from the producer.
    ///
    /// Frames with an unusable timestamp are dropped here and never enter
    /// the queue. Out-of-order and duplicate timestamps are enqueued at
    /// their sorted position but excluded from rate estimation.
    pub fn enqueue_video(&self, frame: VideoFrame) {
        if !frame.timestamp_valid() {
            log::debug!(
                "Dropping frame: {} (ts={})",
                MediaLinkError::InvalidTimestamp,
                frame.timestamp
            );
            return;
        }

        let mut frame_rate = None;
        let buffer_size;
        let buffering_edge;
        {
            let mut guard = self.shared.lock().unwrap();
            let state = &mut *guard;
            if !state.running {
                return;
            }
            if state.queue.is_none() {
                log::debug!("Enqueue skipped: {}", MediaLinkError::BufferQueueUnavailable);
                return;
            }

            match state.last_timestamp {
                None => {
                    // First frame of the session seeds the estimate; there
                    // is no delta yet, so no rate is reported and the clock
                    // keeps its default interval.
                }
                Some(previous) => {
                    let delta = frame.timestamp - previous;
                    if delta > 0.0 {
                        frame_rate = Some(1.0 / delta);
                        self.clock.set_frame_duration(delta);
                    } else {
                        log::debug!(
                            "Non-increasing timestamp delta {delta:.6}, excluded from rate estimation"
                        );
                    }
                }
            }
            state.last_timestamp = Some(frame.timestamp);
            state.has_video = true;

            let queue = match state.queue.as_mut() {
                Some(queue) => queue,
                None => return,
            };
            queue.enqueue(frame);
            let duration = queue.duration_seconds();
            buffer_size = duration;
            buffering_edge = evaluate_watermarks(state, &self.config, duration);
        }

        if let Some(fps) = frame_rate {
            self.delegate.on_frame_rate(fps);
        }
        self.delegate.on_buffer_size(buffer_size);
        if let Some(is_buffering) = buffering_edge {
            self.delegate.on_buffering_changed(is_buffering);
        }
    }

    /// Accept a decoded audio buffer. The buffer itself is owned by the
    /// external audio render path; the link only tracks how many are in
    /// flight to drive the audio-only buffering flag.
    pub fn enqueue_audio(&self, buffer: AudioBuffer) {
        let mut guard = self.shared.lock().unwrap();
        if !guard.running {
            return;
        }
        guard.scheduled_audio_buffers += 1;
        log::trace!(
            "Scheduled audio buffer ({} bytes, {} in flight)",
            buffer.payload_size(),
            guard.scheduled_audio_buffers
        );
        if guard.audio_buffering
            && !guard.has_video
            && guard.scheduled_audio_buffers >= MIN_SCHEDULED_AUDIO_BUFFERS
        {
            guard.audio_buffering = false;
        }
    }

    /// Completion callback from the external audio renderer: one scheduled
    /// buffer finished playing. When the in-flight count reaches zero the
    /// audio path re-enters its buffering condition.
    pub fn audio_render_complete(&self) {
        let mut guard = self.shared.lock().unwrap();
        if !guard.running {
            return;
        }
        guard.scheduled_audio_buffers = guard.scheduled_audio_buffers.saturating_sub(1);
        if guard.scheduled_audio_buffers == 0 {
            guard.audio_buffering = true;
        }
    }
}

impl Drop for MediaLink {
    fn drop(&mut self) {
        self.stop_running();
    }
}

/// Run the watermark state machine after the accumulated duration changed.
/// Returns the new value of the buffering condition if it flipped, so the
/// caller can notify the delegate exactly once per transition.
fn evaluate_watermarks(
    state: &mut LinkState,
    config: &MediaLinkConfig,
    duration: f64,
) -> Option<bool> {
    let was_buffering = state.state.is_buffering();
    match state.state {
        BufferState::Filling => {
            if duration >= config.initial_fill_watermark {
                state.state = BufferState::Ready;
                state.active_min_watermark = config.min_dequeue_watermark;
                log::debug!("Initial fill complete ({duration:.3}s), dequeuing enabled");
            }
        }
        BufferState::Ready => {
            if duration <= config.low_watermark {
                state.state = BufferState::Buffering;
                state.active_min_watermark = config.resume_watermark;
                log::debug!("Buffer low ({duration:.3}s), dequeuing suspended");
            } else if duration > config.high_watermark {
                state.state = BufferState::Draining;
                log::debug!("Buffer high ({duration:.3}s), drain pending");
            }
        }
        BufferState::Buffering => {
            if duration > config.resume_watermark {
                state.state = BufferState::Ready;
                state.active_min_watermark = config.min_dequeue_watermark;
                log::debug!("Buffer recovered ({duration:.3}s), dequeuing resumed");
            }
        }
        // Resolved synchronously by the tick handler.
        BufferState::Draining => {}
    }
    let is_buffering = state.state.is_buffering();
    (was_buffering != is_buffering).then_some(is_buffering)
}

/// Clock tick handler: release at most one frame, draining first if the
/// buffer ran past the high watermark. Delegate callbacks happen after the
/// lock is dropped.
fn process_tick(
    shared: &Mutex<LinkState>,
    config: &MediaLinkConfig,
    delegate: &Arc<dyn MediaLinkDelegate>,
) {
    let mut delivered = None;
    let buffering_edge;
    {
        let mut guard = shared.lock().unwrap();
        let state = &mut *guard;
        if !state.running {
            return;
        }
        let queue = match state.queue.as_mut() {
            Some(queue) => queue,
            // Tick raced session teardown or startup: benign no-op.
            None => {
                log::debug!("Tick skipped: {}", MediaLinkError::BufferQueueUnavailable);
                return;
            }
        };
        if state.state == BufferState::Filling {
            return;
        }

        let duration = queue.duration_seconds();
        if duration < state.active_min_watermark {
            return;
        }

        if duration > config.high_watermark || state.state == BufferState::Draining {
            state.state = BufferState::Draining;
            let mut dropped = 0usize;
            while queue.duration_seconds() > config.initial_fill_watermark {
                queue.dequeue();
                dropped += 1;
            }
            state.state = BufferState::Ready;
            state.active_min_watermark = config.min_dequeue_watermark;
            log::warn!(
                "Drained {dropped} frames to cap latency, buffer now {:.3}s",
                queue.duration_seconds()
            );
        }

        if let Some(mut frame) = queue.dequeue() {
            frame.display_immediately = false;
            delivered = Some(frame);
        }

        // The pop may have dropped us to the low watermark.
        let duration = queue.duration_seconds();
        buffering_edge = evaluate_watermarks(state, config, duration);
    }

    if let Some(frame) = delivered {
        delegate.on_frame_ready(frame);
    }
    if let Some(is_buffering) = buffering_edge {
        delegate.on_buffering_changed(is_buffering);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use web_time::Instant;

    /// Records every delegate callback for later inspection.
    #[derive(Default)]
    struct RecordingDelegate {
        frames: Mutex<Vec<VideoFrame>>,
        frame_instants: Mutex<Vec<Instant>>,
        buffering: Mutex<Vec<bool>>,
        sizes: Mutex<Vec<f64>>,
        rates: Mutex<Vec<f64>>,
    }

    impl MediaLinkDelegate for RecordingDelegate {
        fn on_frame_ready(&self, frame: VideoFrame) {
            self.frames.lock().unwrap().push(frame);
            self.frame_instants.lock().unwrap().push(Instant::now());
        }
        fn on_buffering_changed(&self, is_buffering: bool) {
            self.buffering.lock().unwrap().push(is_buffering);
        }
        fn on_buffer_size(&self, seconds: f64) {
            self.sizes.lock().unwrap().push(seconds);
        }
        fn on_frame_rate(&self, fps: f64) {
            self.rates.lock().unwrap().push(fps);
        }
    }

    const FRAME_INTERVAL: f64 = 1.0 / 24.0;

    /// A link whose real clock effectively never fires, so tests drive the
    /// tick handler deterministically through `tick`.
    fn create_test_link() -> (MediaLink, Arc<RecordingDelegate>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let delegate = Arc::new(RecordingDelegate::default());
        let config = MediaLinkConfig {
            playback_speed: 1e-9,
            ..MediaLinkConfig::default()
        };
        let link = MediaLink::new(config, delegate.clone()).unwrap();
        (link, delegate)
    }

    fn tick(link: &MediaLink) {
        process_tick(&link.shared, &link.config, &link.delegate);
    }

    fn create_test_frame(timestamp: f64) -> VideoFrame {
        VideoFrame::new(timestamp, vec![0; 10])
    }

    /// Enqueue `count` frames spaced `FRAME_INTERVAL` apart from `start`.
    fn fill(link: &MediaLink, start: f64, count: usize) -> f64 {
        for i in 0..count {
            link.enqueue_video(create_test_frame(start + i as f64 * FRAME_INTERVAL));
        }
        start + count as f64 * FRAME_INTERVAL
    }

    #[test]
    fn test_invalid_timestamps_are_rejected() {
        let (link, delegate) = create_test_link();
        link.start_running();

        link.enqueue_video(create_test_frame(f64::NAN));
        link.enqueue_video(create_test_frame(-1.0));
        link.enqueue_video(create_test_frame(f64::INFINITY));

        assert!(delegate.sizes.lock().unwrap().is_empty());
        assert_eq!(link.buffer_size_seconds(), 0.0);
        link.stop_running();
    }

    #[test]
    fn test_enqueue_before_start_is_noop() {
        let (link, delegate) = create_test_link();
        link.enqueue_video(create_test_frame(0.0));
        assert!(delegate.sizes.lock().unwrap().is_empty());
        assert!(!link.is_running());
    }

    #[test]
    fn test_frames_delivered_in_timestamp_order_without_duplicates() {
        let (link, delegate) = create_test_link();
        link.start_running();

        // Insert out of order: odd positions first, then even.
        let timestamps: Vec<f64> = (0..40).map(|i| i as f64 * FRAME_INTERVAL).collect();
        for ts in timestamps.iter().skip(1).step_by(2) {
            link.enqueue_video(create_test_frame(*ts));
        }
        for ts in timestamps.iter().step_by(2) {
            link.enqueue_video(create_test_frame(*ts));
        }
        assert_eq!(link.state(), BufferState::Ready);

        for _ in 0..10 {
            tick(&link);
        }

        let frames = delegate.frames.lock().unwrap();
        assert_eq!(frames.len(), 10);
        for (i, frame) in frames.iter().enumerate() {
            assert!(
                (frame.timestamp - timestamps[i]).abs() < 1e-9,
                "frame {i} out of order"
            );
        }
        drop(frames);
        link.stop_running();
    }

    #[test]
    fn test_buffer_size_equals_tail_minus_head() {
        let (link, delegate) = create_test_link();
        link.start_running();

        fill(&link, 0.0, 5);

        let sizes = delegate.sizes.lock().unwrap();
        assert_eq!(sizes.len(), 5);
        for (i, size) in sizes.iter().enumerate() {
            let expected = i as f64 * FRAME_INTERVAL;
            assert!(
                (size - expected).abs() < 1e-9,
                "size {size} != expected {expected}"
            );
        }
        drop(sizes);
        link.stop_running();
    }

    #[test]
    fn test_filling_to_ready_transition_happens_once() {
        let (link, delegate) = create_test_link();
        link.start_running();
        assert_eq!(link.state(), BufferState::Filling);

        // 24 frames span ~0.958s, still filling. No tick dequeues yet.
        fill(&link, 0.0, 24);
        assert_eq!(link.state(), BufferState::Filling);
        tick(&link);
        assert!(delegate.frames.lock().unwrap().is_empty());

        // The 25th frame crosses 1.0s.
        fill(&link, 24.0 * FRAME_INTERVAL, 1);
        assert_eq!(link.state(), BufferState::Ready);
        assert_eq!(*delegate.buffering.lock().unwrap(), vec![false]);

        // More enqueues in Ready do not re-notify.
        fill(&link, 25.0 * FRAME_INTERVAL, 5);
        assert_eq!(*delegate.buffering.lock().unwrap(), vec![false]);
        link.stop_running();
    }

    #[test]
    fn test_starvation_and_recovery_notify_once_each() {
        let (link, delegate) = create_test_link();
        link.start_running();

        let next = fill(&link, 0.0, 25);
        assert_eq!(link.state(), BufferState::Ready);

        // Drain by ticking with no new input until the low watermark trips.
        while link.state() == BufferState::Ready {
            tick(&link);
        }
        assert_eq!(link.state(), BufferState::Buffering);
        assert_eq!(*delegate.buffering.lock().unwrap(), vec![false, true]);

        // Suspended: further ticks deliver nothing.
        let delivered = delegate.frames.lock().unwrap().len();
        tick(&link);
        tick(&link);
        assert_eq!(delegate.frames.lock().unwrap().len(), delivered);

        // Refill past the resume watermark (> 0.6s above the current head).
        fill(&link, next, 20);
        assert_eq!(link.state(), BufferState::Ready);
        assert_eq!(
            *delegate.buffering.lock().unwrap(),
            vec![false, true, false]
        );

        // Ticks flow again.
        tick(&link);
        assert_eq!(delegate.frames.lock().unwrap().len(), delivered + 1);
        link.stop_running();
    }

    #[test]
    fn test_overflow_drains_without_delivery() {
        let (link, delegate) = create_test_link();
        link.start_running();

        // 78 frames span ~3.21s, beyond the high watermark.
        fill(&link, 0.0, 78);
        assert_eq!(link.state(), BufferState::Draining);

        tick(&link);

        // One frame delivered, the drained ones silently discarded.
        assert_eq!(delegate.frames.lock().unwrap().len(), 1);
        assert!(link.buffer_size_seconds() <= 1.0 + 1e-9);
        assert_eq!(link.state(), BufferState::Ready);
        link.stop_running();
    }

    #[test]
    fn test_nonpositive_deltas_excluded_from_rate_estimation() {
        let (link, delegate) = create_test_link();
        link.start_running();

        link.enqueue_video(create_test_frame(1.0)); // seed, no rate
        link.enqueue_video(create_test_frame(1.0)); // zero delta
        link.enqueue_video(create_test_frame(0.9)); // negative delta
        assert!(delegate.rates.lock().unwrap().is_empty());

        // All three entered the queue regardless.
        assert_eq!(link.buffer_size_seconds(), 1.0 - 0.9);

        link.enqueue_video(create_test_frame(0.95));
        let rates = delegate.rates.lock().unwrap();
        assert_eq!(rates.len(), 1);
        assert!((rates[0] - 20.0).abs() < 1e-6);
        drop(rates);

        // The clock picked up the positive delta only.
        assert!((link.clock.config().frame_duration_seconds - 0.05).abs() < 1e-9);
        link.stop_running();
    }

    #[test]
    fn test_start_stop_idempotence() {
        let (link, delegate) = create_test_link();

        link.start_running();
        fill(&link, 0.0, 10);
        let size_before = link.buffer_size_seconds();

        // Second start is a no-op, the queue survives.
        link.start_running();
        assert_eq!(link.buffer_size_seconds(), size_before);

        link.stop_running();
        assert!(!link.is_running());
        let notifications = delegate.sizes.lock().unwrap().len();

        // Second stop and post-stop traffic produce nothing.
        link.stop_running();
        link.enqueue_video(create_test_frame(99.0));
        tick(&link);
        assert_eq!(delegate.sizes.lock().unwrap().len(), notifications);
        assert!(delegate.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_session_restart_is_clean() {
        let (link, delegate) = create_test_link();

        link.start_running();
        fill(&link, 100.0, 30);
        assert_eq!(link.state(), BufferState::Ready);
        link.stop_running();

        link.start_running();
        assert_eq!(link.state(), BufferState::Filling);
        assert_eq!(link.buffer_size_seconds(), 0.0);

        // Timestamps restart lower than the previous session's; the first
        // frame re-seeds the estimate and reports no rate.
        let rates_before = delegate.rates.lock().unwrap().len();
        link.enqueue_video(create_test_frame(0.0));
        assert_eq!(delegate.rates.lock().unwrap().len(), rates_before);
        link.stop_running();
    }

    #[test]
    fn test_audio_only_buffering_counter() {
        let (link, _delegate) = create_test_link();
        link.start_running();
        assert!(link.is_audio_buffering());

        for _ in 0..MIN_SCHEDULED_AUDIO_BUFFERS {
            link.enqueue_audio(AudioBuffer::new(vec![0; 320], 16000, 1));
        }
        assert!(!link.is_audio_buffering());

        for _ in 0..MIN_SCHEDULED_AUDIO_BUFFERS {
            link.audio_render_complete();
        }
        assert!(link.is_audio_buffering());
        link.stop_running();
    }

    #[test]
    fn test_display_immediately_hint_is_stripped() {
        let (link, delegate) = create_test_link();
        link.start_running();

        let mut timestamp = 0.0;
        for _ in 0..30 {
            let mut frame = create_test_frame(timestamp);
            frame.display_immediately = true;
            link.enqueue_video(frame);
            timestamp += FRAME_INTERVAL;
        }
        tick(&link);

        let frames = delegate.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].display_immediately);
        drop(frames);
        link.stop_running();
    }

    #[test]
    fn test_teardown_completes_with_poisoned_state() {
        let (link, _delegate) = create_test_link();
        link.start_running();

        let link = Arc::new(link);
        let poisoner = Arc::clone(&link);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.shared.lock().unwrap();
            panic!("poisoning the state lock");
        })
        .join();

        // Teardown still completes and the link is usable again.
        link.stop_running();
        assert!(!link.is_running());
        link.start_running();
        assert!(link.is_running());
        link.stop_running();
    }

    #[test]
    fn test_stop_racing_start_leaves_no_clock_running() {
        for _ in 0..50 {
            let (link, _delegate) = create_test_link();
            let link = Arc::new(link);

            let starter = Arc::clone(&link);
            let handle = std::thread::spawn(move || starter.start_running());
            link.stop_running();
            handle.join().unwrap();

            link.stop_running();
            assert!(!link.is_running());
            assert!(!link.clock.is_running());
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let delegate = Arc::new(RecordingDelegate::default());
        let config = MediaLinkConfig {
            low_watermark: 0.8,
            resume_watermark: 0.6,
            ..MediaLinkConfig::default()
        };
        assert!(matches!(
            MediaLink::new(config, delegate.clone()),
            Err(MediaLinkError::InvalidConfig(_))
        ));

        let config = MediaLinkConfig {
            playback_speed: 0.0,
            ..MediaLinkConfig::default()
        };
        assert!(matches!(
            MediaLink::new(config, delegate),
            Err(MediaLinkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_playback_speed_shortens_dequeue_interval() {
        let delegate = Arc::new(RecordingDelegate::default());
        let link = MediaLink::new(MediaLinkConfig::default(), delegate.clone()).unwrap();
        link.start_running();

        // ~2.5s of media at 30fps; enqueuing is fast relative to the clock.
        let mut timestamp = 0.0;
        for _ in 0..75 {
            link.enqueue_video(create_test_frame(timestamp));
            timestamp += 1.0 / 30.0;
        }

        std::thread::sleep(std::time::Duration::from_millis(300));
        let speed_change = Instant::now();
        link.set_playback_speed(2.0);
        std::thread::sleep(std::time::Duration::from_millis(300));
        link.stop_running();

        let instants = delegate.frame_instants.lock().unwrap();
        let mut slow_gaps = Vec::new();
        let mut fast_gaps = Vec::new();
        for pair in instants.windows(2) {
            let gap = pair[1].duration_since(pair[0]).as_secs_f64();
            if pair[1] < speed_change {
                slow_gaps.push(gap);
            } else if pair[0] > speed_change {
                fast_gaps.push(gap);
            }
        }
        assert!(slow_gaps.len() >= 3, "too few frames before speed change");
        assert!(fast_gaps.len() >= 3, "too few frames after speed change");

        let avg = |gaps: &[f64]| gaps.iter().sum::<f64>() / gaps.len() as f64;
        let slow = avg(&slow_gaps);
        let fast = avg(&fast_gaps);
        assert!(
            fast < slow * 0.8,
            "expected faster cadence after speed change: slow={slow:.4}s fast={fast:.4}s"
        );
    }
}
