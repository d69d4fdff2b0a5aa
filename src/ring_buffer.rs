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

//! A fixed-capacity circular byte store with independent read/write cursors.
//!
//! Used wherever a bounded byte stream must be accumulated and drained
//! without reallocation, e.g. chunk reassembly upstream of the jitter
//! buffer. There is no implicit overwrite: writes fail when the buffer is
//! full and reads fail when it is empty.

/// Bounded byte ring. The cursors increase monotonically and are never
/// wrapped themselves; wrapping is applied only when indexing the backing
/// array, modulo capacity. Invariant: `write_index - read_index` stays in
/// `[0, capacity]`.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    array: Vec<u8>,
    read_index: usize,
    write_index: usize,
}

impl RingBuffer {
    /// Create a ring buffer with a fixed capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            array: vec![0; capacity],
            read_index: 0,
            write_index: 0,
        }
    }

    /// Fixed capacity in bytes
    pub fn capacity(&self) -> usize {
        self.array.len()
    }

    /// Number of unread bytes
    pub fn available_for_reading(&self) -> usize {
        self.write_index - self.read_index
    }

    /// Check if there is nothing to read
    pub fn is_empty(&self) -> bool {
        self.available_for_reading() == 0
    }

    /// Check if there is no space left to write
    pub fn is_full(&self) -> bool {
        self.available_for_writing() == 0
    }

    /// Write one byte. Returns false without modifying the buffer when full.
    pub fn write(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        let capacity = self.capacity();
        self.array[self.write_index % capacity] = byte;
        self.write_index += 1;
        true
    }

    /// Write as many bytes as fit, returning the number written. Callers
    /// that cannot accept partial writes should check
    /// [`available_for_writing`](Self::is_full) via `capacity` first.
    pub fn write_all(&mut self, bytes: &[u8]) -> usize {
        let mut written = 0;
        for &byte in bytes {
            if !self.write(byte) {
                log::debug!(
                    "Ring buffer full, dropped {} of {} bytes",
                    bytes.len() - written,
                    bytes.len()
                );
                break;
            }
            written += 1;
        }
        written
    }

    /// Read the oldest unread byte, or `None` when empty.
    pub fn read(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let byte = self.array[self.read_index % capacity];
        self.read_index += 1;
        Some(byte)
    }

    /// Materialize the currently-unread bytes, oldest first, without moving
    /// either cursor.
    pub fn snapshot(&self) -> Vec<u8> {
        let capacity = self.capacity();
        (self.read_index..self.write_index)
            .map(|i| self.array[i % capacity])
            .collect()
    }

    /// Reset both cursors to zero, discarding unread content.
    pub fn clear(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
    }

    fn available_for_writing(&self) -> usize {
        self.capacity() - self.available_for_reading()
    }
}
