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

//! Contains the fundamental data structures for decoded media frames.

use serde::{Deserialize, Serialize};

/// A decoded video frame as handed over by the decoder.
///
/// The payload is opaque to the buffering core; only the presentation
/// timestamp participates in ordering and scheduling decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    /// Presentation timestamp in seconds, relative to the stream clock.
    pub timestamp: f64,
    /// The decoded frame content.
    pub data: Vec<u8>,
    /// Renderer hint asking for immediate display. Cleared before delivery
    /// so the renderer does not re-derive timing on its own.
    pub display_immediately: bool,
}

impl VideoFrame {
    /// Create a new video frame with the given presentation timestamp.
    pub fn new(timestamp: f64, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            data,
            display_immediately: false,
        }
    }

    /// Whether the presentation timestamp is usable for scheduling.
    /// Frames failing this check are rejected at the enqueue boundary.
    pub fn timestamp_valid(&self) -> bool {
        self.timestamp.is_finite() && self.timestamp >= 0.0
    }

    /// Get the size of the payload in bytes
    pub fn payload_size(&self) -> usize {
        self.data.len()
    }
}

/// A decoded audio buffer bound for the external audio render path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBuffer {
    /// Raw PCM payload.
    pub data: Vec<u8>,
    /// Sample rate of the audio data
    pub sample_rate: u32,
    /// Number of audio channels
    pub channels: u8,
}

impl AudioBuffer {
    /// Create a new audio buffer
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u8) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }

    /// Get the size of the payload in bytes
    pub fn payload_size(&self) -> usize {
        self.data.len()
    }
}
