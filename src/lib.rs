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

//! # medialink
//!
//! The playback-side jitter buffer and clock engine of a live-streaming
//! client. Decoded, timestamped frames arrive on an irregular network
//! schedule; [`MediaLink`] absorbs them and re-emits them to a delegate at
//! a steady cadence derived from the measured source frame rate, adapting
//! to buffer starvation and overflow through duration watermarks.
//!
//! The crate is decoder-, renderer- and transport-agnostic: frames are
//! opaque payloads carrying a presentation timestamp.

pub mod clock;
pub mod error;
pub mod frame;
pub mod frame_queue;
pub mod media_link;
pub mod ring_buffer;

pub use clock::{ClockConfig, PlaybackClock};
pub use error::{MediaLinkError, Result};
pub use frame::{AudioBuffer, VideoFrame};
pub use frame_queue::FrameQueue;
pub use media_link::{BufferState, MediaLink, MediaLinkConfig, MediaLinkDelegate};
pub use ring_buffer::RingBuffer;
