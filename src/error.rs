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

use thiserror::Error;

/// Result type for media link operations
pub type Result<T> = std::result::Result<T, MediaLinkError>;

/// Errors that can occur in media link operations.
///
/// Frame loss and jitter are expected conditions of live streaming, so most
/// of these are absorbed internally and logged rather than returned to the
/// caller. The only fallible public API is construction with an invalid
/// configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaLinkError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid presentation timestamp")]
    InvalidTimestamp,

    #[error("Buffer queue unavailable")]
    BufferQueueUnavailable,

    #[error("Reset failed: {0}")]
    ResetFailure(String),
}
