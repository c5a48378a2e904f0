//! Shared constants used across the application

/// Prefix that marks a data frame on the streaming transport.
pub const EVENT_MARKER: &str = "data:";

/// Sentinel payload that terminates the stream regardless of any buffered
/// partial JSON.
pub const STREAM_DONE: &str = "[DONE]";

/// Base delay between revealed words, in milliseconds.
pub const REVEAL_BASE_DELAY_MS: u64 = 80;

/// Maximum random jitter added on top of the base reveal delay, in
/// milliseconds.
pub const REVEAL_JITTER_MS: u64 = 40;

/// Display width cap for inline figure images, in pixels.
pub const FIGURE_MAX_WIDTH: u32 = 400;
