//! Peek Cursor Configuration
//!
//! This module defines the tunables for the cursor subsystem.
//!
//! ## PeekConfig
//!
//! - **merge_cursor_retry_times**: retry budget for one member refill in a
//!   broadcast cursor (default: 10)
//! - **merge_cursor_retry_delay**: base delay of the refill backoff
//!   (default: 100ms, doubled each attempt with jitter)
//! - **parallel_get_more_requests**: pipeline depth of `ServerPeekCursor`
//!   in parallel mode (default: 32)
//! - **peek_stats_interval**: sampling window for slow-peer detection
//!   (default: 10s)
//! - **peek_stats_slow_amount** / **peek_stats_slow_ratio**: minimum slow
//!   reply count and slow/(slow+fast) ratio before a connection reset is
//!   considered (defaults: 20 and 0.5)
//! - **peek_max_latency**: round-trip time above which a reply counts as
//!   slow (default: 500ms)
//! - **peek_reset_interval**: minimum interval between connection resets
//!   (default: 300s)
//! - **desired_reply_bytes**: replies smaller than this don't count as
//!   slow unless `peek_count_small_messages` is set, because latency on a
//!   tiny reply says little about the peer (default: 150_000)

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeekConfig {
    /// Retry budget for a single member refill (default: 10)
    #[serde(default = "default_merge_cursor_retry_times")]
    pub merge_cursor_retry_times: usize,

    /// Base backoff delay between refill retries (default: 100ms)
    #[serde(default = "default_merge_cursor_retry_delay")]
    pub merge_cursor_retry_delay: Duration,

    /// In-flight request limit for pipelined server cursors (default: 32)
    #[serde(default = "default_parallel_get_more_requests")]
    pub parallel_get_more_requests: usize,

    /// Sampling window for slow-peer statistics (default: 10s)
    #[serde(default = "default_peek_stats_interval")]
    pub peek_stats_interval: Duration,

    /// Minimum slow replies in a window before a reset (default: 20)
    #[serde(default = "default_peek_stats_slow_amount")]
    pub peek_stats_slow_amount: u64,

    /// Minimum slow / (slow + fast) ratio before a reset (default: 0.5)
    #[serde(default = "default_peek_stats_slow_ratio")]
    pub peek_stats_slow_ratio: f64,

    /// Round-trip time above which a reply is slow (default: 500ms)
    #[serde(default = "default_peek_max_latency")]
    pub peek_max_latency: Duration,

    /// Minimum interval between connection resets (default: 300s)
    #[serde(default = "default_peek_reset_interval")]
    pub peek_reset_interval: Duration,

    /// Count replies below `desired_reply_bytes` toward the slow counter
    /// instead of the unknown counter (default: false)
    #[serde(default)]
    pub peek_count_small_messages: bool,

    /// Reply size at which latency becomes meaningful (default: 150_000)
    #[serde(default = "default_desired_reply_bytes")]
    pub desired_reply_bytes: usize,
}

impl Default for PeekConfig {
    fn default() -> Self {
        Self {
            merge_cursor_retry_times: default_merge_cursor_retry_times(),
            merge_cursor_retry_delay: default_merge_cursor_retry_delay(),
            parallel_get_more_requests: default_parallel_get_more_requests(),
            peek_stats_interval: default_peek_stats_interval(),
            peek_stats_slow_amount: default_peek_stats_slow_amount(),
            peek_stats_slow_ratio: default_peek_stats_slow_ratio(),
            peek_max_latency: default_peek_max_latency(),
            peek_reset_interval: default_peek_reset_interval(),
            peek_count_small_messages: false,
            desired_reply_bytes: default_desired_reply_bytes(),
        }
    }
}

fn default_merge_cursor_retry_times() -> usize {
    10
}

fn default_merge_cursor_retry_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_parallel_get_more_requests() -> usize {
    32
}

fn default_peek_stats_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_peek_stats_slow_amount() -> u64 {
    20
}

fn default_peek_stats_slow_ratio() -> f64 {
    0.5
}

fn default_peek_max_latency() -> Duration {
    Duration::from_millis(500)
}

fn default_peek_reset_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_desired_reply_bytes() -> usize {
    150_000
}
