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

//! A presentation-timestamp-ordered queue of pending video frames.

use std::collections::VecDeque;

use crate::frame::VideoFrame;

/// Frame queue keeping pending video frames sorted by presentation
/// timestamp. Frames are always dequeued from the head, so delivery order
/// is nondecreasing in timestamp regardless of arrival order.
///
/// The queue is bounded by duration watermarks applied by its owner, not by
/// a fixed element count.
#[derive(Debug, Default)]
pub struct FrameQueue {
    buffer: VecDeque<VideoFrame>,
}

impl FrameQueue {
    /// Create a new, empty frame queue
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
        }
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the number of frames in the queue
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Insert a frame at its timestamp-ordered position.
    ///
    /// Frames with equal timestamps keep their arrival order.
    pub fn enqueue(&mut self, frame: VideoFrame) {
        let insert_pos = self.find_insert_position(&frame);
        if insert_pos < self.buffer.len() {
            log::debug!(
                "Out-of-order frame ts={:.4}, inserted at {}/{}",
                frame.timestamp,
                insert_pos,
                self.buffer.len()
            );
        }
        self.buffer.insert(insert_pos, frame);
    }

    /// Get the head frame without removing it
    pub fn peek(&self) -> Option<&VideoFrame> {
        self.buffer.front()
    }

    /// Remove and return the head frame (oldest timestamp)
    pub fn dequeue(&mut self) -> Option<VideoFrame> {
        self.buffer.pop_front()
    }

    /// Accumulated duration of the queue in seconds: the timestamp span
    /// between head and tail, or 0.0 with one frame or fewer.
    pub fn duration_seconds(&self) -> f64 {
        match (self.buffer.front(), self.buffer.back()) {
            (Some(head), Some(tail)) => tail.timestamp - head.timestamp,
            _ => 0.0,
        }
    }

    /// Drop all frames
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn find_insert_position(&self, frame: &VideoFrame) -> usize {
        // Binary search for the correct insertion position based on timestamp
        let mut low = 0;
        let mut high = self.buffer.len();

        while low < high {
            let mid = (low + high) / 2;
            if self.buffer[mid].timestamp <= frame.timestamp {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        low
    }
}
