//! Latency-Aware Server Cursor
//!
//! `ServerPeekCursor` streams one storage team from a single live TLog
//! endpoint whose identity can change mid-stream (cluster membership
//! shifts swap the peer out from under the cursor). The endpoint is
//! observed through a `tokio::sync::watch` channel; every fetch round
//! races the RPC against a channel update.
//!
//! ## Modes
//!
//! - **Serial** (default): one outstanding request at a time.
//! - **Parallel**: a FIFO of up to `parallel_get_more_requests` in-flight
//!   requests. The peer is expected to treat requests sharing a
//!   `debug_id` as one peek session and serve consecutive windows; the
//!   cursor validates that each reply continues exactly where the
//!   previous one ended and raises `OperationObsolete` on a mismatch,
//!   discarding the pipeline and starting a fresh session.
//!
//! ## Slow-peer detection
//!
//! Every reply is classified by round-trip time: `slow` above
//! `peek_max_latency` (when the reply is big enough for the latency to
//! mean anything), `fast` below it, `unknown` otherwise. Once per
//! `peek_stats_interval` window the counters are evaluated: enough slow
//! replies at a high enough slow ratio and the cursor resets the
//! connection to the peer, then zeroes the counters. Resets are debounced
//! by `peek_reset_interval`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use tlogpeek_core::{LogPosition, MessageDeserializer, StorageTeamId, Version, VersionSubsequenceMessage};

use crate::config::PeekConfig;
use crate::cursor::PeekCursor;
use crate::error::{PeekError, Result};
use crate::rpc::{FailureMonitor, PeekReply, PeekRequest, TLogPeer};

/// Reply latency counters over one sampling window.
#[derive(Debug)]
struct PeekStats {
    slow: u64,
    fast: u64,
    unknown: u64,
    window_start: Instant,
    last_reset: Option<Instant>,
}

impl PeekStats {
    fn new() -> Self {
        Self {
            slow: 0,
            fast: 0,
            unknown: 0,
            window_start: Instant::now(),
            last_reset: None,
        }
    }

    /// Classify one reply and evaluate the window if it has elapsed.
    fn record(&mut self, elapsed: Duration, reply_bytes: usize, config: &PeekConfig, peer: &dyn TLogPeer) {
        if let Some(last_reset) = self.last_reset {
            if last_reset.elapsed() <= config.peek_reset_interval {
                return;
            }
        }

        if elapsed > config.peek_max_latency {
            // Latency on a tiny reply says little about the peer.
            if reply_bytes >= config.desired_reply_bytes || config.peek_count_small_messages {
                self.slow += 1;
            } else {
                self.unknown += 1;
            }
        } else {
            self.fast += 1;
        }

        if self.window_start.elapsed() >= config.peek_stats_interval {
            debug!(
                endpoint = peer.endpoint(),
                slow = self.slow,
                fast = self.fast,
                unknown = self.unknown,
                "peek latency window"
            );
            let ratio = self.slow as f64 / (self.slow + self.fast).max(1) as f64;
            if self.slow >= config.peek_stats_slow_amount && ratio >= config.peek_stats_slow_ratio {
                warn!(
                    endpoint = peer.endpoint(),
                    slow = self.slow,
                    fast = self.fast,
                    "slow peek replies; resetting connection"
                );
                peer.reset_connection();
                self.last_reset = Some(Instant::now());
            }
            self.slow = 0;
            self.fast = 0;
            self.unknown = 0;
            self.window_start = Instant::now();
        }
    }
}

/// One in-flight pipelined peek.
struct PipelinedPeek {
    handle: JoinHandle<(Result<PeekReply>, Duration)>,
}

/// Streaming cursor over one mutable TLog endpoint.
pub struct ServerPeekCursor {
    interface: watch::Receiver<Option<Arc<dyn TLogPeer>>>,
    team_id: StorageTeamId,
    deserializer: MessageDeserializer,
    /// Position of the head record; advances as the consumer iterates.
    position: LogPosition,
    /// Begin version of the next peek request.
    next_begin: Version,
    /// Open upper bound; reaching it completes the cursor.
    end: LogPosition,
    popped: Version,
    max_known_version: Version,
    min_known_committed_version: Version,
    only_spilled: bool,
    return_if_blocked: bool,
    parallel: bool,
    pipeline: VecDeque<PipelinedPeek>,
    /// Begin version the next pipelined reply must carry.
    pipeline_expected_begin: Version,
    debug_id: Uuid,
    stats: PeekStats,
    config: PeekConfig,
    monitor: Option<Arc<dyn FailureMonitor>>,
}

impl ServerPeekCursor {
    /// Cursor over `[begin, end)`. `end = Version::MAX` streams until the
    /// remote epoch ends.
    pub fn new(
        interface: watch::Receiver<Option<Arc<dyn TLogPeer>>>,
        team_id: StorageTeamId,
        begin: Version,
        end: Version,
        return_if_blocked: bool,
        parallel: bool,
        config: PeekConfig,
    ) -> Self {
        let debug_id = Uuid::new_v4();
        debug!(
            %team_id,
            begin,
            end,
            parallel,
            debug_id = %debug_id,
            "server peek cursor starting"
        );
        Self {
            interface,
            team_id,
            deserializer: MessageDeserializer::empty(team_id),
            position: LogPosition::version_start(begin),
            next_begin: begin,
            end: LogPosition::version_start(end),
            popped: 0,
            max_known_version: 0,
            min_known_committed_version: 0,
            only_spilled: false,
            return_if_blocked,
            parallel,
            pipeline: VecDeque::new(),
            pipeline_expected_begin: begin,
            debug_id,
            stats: PeekStats::new(),
            config,
            monitor: None,
        }
    }

    /// Observe endpoint health through a failure monitor.
    pub fn with_failure_monitor(mut self, monitor: Arc<dyn FailureMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn team_id(&self) -> StorageTeamId {
        self.team_id
    }

    /// Position of the head record, or of the next fetch when the buffer
    /// is drained.
    pub fn position(&self) -> LogPosition {
        self.position
    }

    /// Versions at or below this have been popped on the server.
    pub fn popped(&self) -> Version {
        self.popped
    }

    pub fn max_known_version(&self) -> Version {
        self.max_known_version
    }

    pub fn min_known_committed_version(&self) -> Version {
        self.min_known_committed_version
    }

    /// True once the cursor reached its upper bound (including the bound
    /// installed when the remote stream ended).
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.end
    }

    /// True while the endpoint is present, healthy, and the cursor has
    /// versions left to stream.
    pub fn is_active(&self) -> bool {
        let Some(peer) = self.interface.borrow().clone() else {
            return false;
        };
        if self.is_exhausted() {
            return false;
        }
        self.monitor
            .as_ref()
            .map_or(true, |monitor| monitor.is_available(peer.endpoint()))
    }

    /// Resolves once the current endpoint is marked failed. Re-arms itself
    /// across endpoint changes.
    pub async fn on_failed(&mut self) -> Result<()> {
        let Some(monitor) = self.monitor.clone() else {
            return Err(PeekError::Internal(
                "on_failed requires a failure monitor".into(),
            ));
        };
        loop {
            let peer = self.interface.borrow_and_update().clone();
            match peer {
                Some(peer) => {
                    tokio::select! {
                        _ = monitor.on_state_equal(peer.endpoint(), true) => return Ok(()),
                        changed = self.interface.changed() => {
                            changed.map_err(|_| PeekError::BrokenPromise)?;
                        }
                    }
                }
                None => {
                    self.interface
                        .changed()
                        .await
                        .map_err(|_| PeekError::BrokenPromise)?;
                }
            }
        }
    }

    /// The endpoint changed under us: the pipeline no longer means
    /// anything and the peek session must restart.
    fn on_interface_change(&mut self) {
        debug!(team = %self.team_id, "endpoint changed; clearing peek pipeline");
        self.clear_pipeline();
        self.only_spilled = false;
    }

    fn clear_pipeline(&mut self) {
        for peek in self.pipeline.drain(..) {
            peek.handle.abort();
        }
        self.debug_id = Uuid::new_v4();
        self.pipeline_expected_begin = self.next_begin;
    }

    fn request(&self) -> PeekRequest {
        PeekRequest {
            debug_id: Some(self.debug_id),
            team_id: self.team_id,
            begin_version: self.next_begin,
            end_version: (self.end.version != Version::MAX).then_some(self.end.version),
            return_if_blocked: self.return_if_blocked,
            only_spilled: self.only_spilled,
        }
    }

    /// Install a validated reply: reposition the deserializer at the
    /// cursor position and advance the version bookkeeping.
    fn apply_reply(&mut self, reply: PeekReply) -> Result<bool> {
        if let Some(popped) = reply.popped {
            self.popped = self.popped.max(popped).min(self.end.version);
        }
        self.only_spilled = reply.only_spilled;
        self.max_known_version = self.max_known_version.max(reply.max_known_version);
        self.min_known_committed_version = self
            .min_known_committed_version
            .max(reply.min_known_committed_version);

        self.deserializer.reset(reply.data)?;
        // An empty reply keeps next_begin; a data reply moves it past the
        // covered range.
        self.next_begin = self.next_begin.max(reply.end_version + 1);
        self.pipeline_expected_begin = self.next_begin;

        // Drop any overlap with what was already consumed.
        while let Some(record) = self.deserializer.peek() {
            if record.position() >= self.position {
                break;
            }
            self.deserializer.advance();
        }

        match self.deserializer.peek() {
            Some(record) => {
                self.position = record.position();
                debug!(
                    team = %self.team_id,
                    position = %self.position,
                    records = self.deserializer.remaining(),
                    "peek reply applied"
                );
                Ok(self.position < self.end)
            }
            None => {
                self.position = LogPosition::version_start(self.next_begin);
                Ok(false)
            }
        }
    }

    async fn current_peer(&mut self) -> Result<Arc<dyn TLogPeer>> {
        // An endpoint change announced between fetch rounds still
        // invalidates the peek session.
        if self.interface.has_changed().unwrap_or(false) {
            self.on_interface_change();
        }
        loop {
            if let Some(peer) = self.interface.borrow_and_update().clone() {
                return Ok(peer);
            }
            self.interface
                .changed()
                .await
                .map_err(|_| PeekError::BrokenPromise)?;
            self.on_interface_change();
        }
    }

    /// One serial fetch round.
    async fn fetch_serial(&mut self) -> Result<bool> {
        loop {
            let peer = self.current_peer().await?;
            let request = self.request();
            let started = Instant::now();

            let raced = {
                let peek = peer.peek(request);
                tokio::pin!(peek);
                tokio::select! {
                    changed = self.interface.changed() => Raced::InterfaceChanged(changed.is_ok()),
                    result = &mut peek => Raced::Reply(result, started.elapsed()),
                }
            };

            match raced {
                Raced::InterfaceChanged(alive) => {
                    if !alive {
                        return Err(PeekError::BrokenPromise);
                    }
                    self.on_interface_change();
                }
                Raced::Reply(result, elapsed) => match result {
                    Ok(reply) => {
                        self.stats
                            .record(elapsed, reply.data.len(), &self.config, peer.as_ref());
                        return self.apply_reply(reply);
                    }
                    Err(PeekError::EndOfStream) => {
                        debug!(team = %self.team_id, position = %self.position, "stream ended");
                        self.end = self.position;
                        return Ok(false);
                    }
                    Err(PeekError::BrokenPromise) => {
                        // The callee vanished without an answer; wait for
                        // the endpoint to change rather than hammering it.
                        self.interface
                            .changed()
                            .await
                            .map_err(|_| PeekError::BrokenPromise)?;
                        self.on_interface_change();
                    }
                    Err(PeekError::Timeout) | Err(PeekError::OperationObsolete) => {
                        warn!(team = %self.team_id, "peek rejected; restarting peek session");
                        self.clear_pipeline();
                    }
                    Err(other) => return Err(other),
                },
                Raced::TaskFailed(_) => unreachable!("fetch_serial does not spawn tasks"),
            }
        }
    }

    /// One parallel fetch round: keep the pipeline full, consume the
    /// oldest reply, validate that it continues the session.
    async fn fetch_parallel(&mut self) -> Result<bool> {
        loop {
            let peer = self.current_peer().await?;

            while self.pipeline.len() < self.config.parallel_get_more_requests {
                let request = self.request();
                let peer = Arc::clone(&peer);
                self.pipeline.push_back(PipelinedPeek {
                    handle: tokio::spawn(async move {
                        let started = Instant::now();
                        let result = peer.peek(request).await;
                        (result, started.elapsed())
                    }),
                });
            }

            let raced = {
                let front = self
                    .pipeline
                    .front_mut()
                    .expect("pipeline was just filled");
                tokio::select! {
                    changed = self.interface.changed() => Raced::InterfaceChanged(changed.is_ok()),
                    joined = &mut front.handle => match joined {
                        Ok((result, elapsed)) => Raced::Reply(result, elapsed),
                        Err(error) => Raced::TaskFailed(error.to_string()),
                    },
                }
            };

            match raced {
                Raced::InterfaceChanged(alive) => {
                    if !alive {
                        return Err(PeekError::BrokenPromise);
                    }
                    self.on_interface_change();
                }
                Raced::TaskFailed(error) => {
                    self.pipeline.pop_front();
                    return Err(PeekError::Internal(format!(
                        "pipelined peek task failed: {error}"
                    )));
                }
                Raced::Reply(result, elapsed) => {
                    self.pipeline.pop_front();
                    match result {
                        Ok(reply) => {
                            if reply.begin_version != self.pipeline_expected_begin {
                                warn!(
                                    team = %self.team_id,
                                    expected = self.pipeline_expected_begin,
                                    got = reply.begin_version,
                                    "pipelined reply out of sequence"
                                );
                                self.clear_pipeline();
                                continue;
                            }
                            self.stats
                                .record(elapsed, reply.data.len(), &self.config, peer.as_ref());
                            return self.apply_reply(reply);
                        }
                        Err(PeekError::EndOfStream) => {
                            debug!(team = %self.team_id, position = %self.position, "stream ended");
                            self.clear_pipeline();
                            self.end = self.position;
                            return Ok(false);
                        }
                        Err(PeekError::BrokenPromise) => {
                            self.interface
                                .changed()
                                .await
                                .map_err(|_| PeekError::BrokenPromise)?;
                            self.on_interface_change();
                        }
                        Err(PeekError::Timeout) | Err(PeekError::OperationObsolete) => {
                            warn!(team = %self.team_id, "peek session expired; restarting");
                            self.clear_pipeline();
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
        }
    }
}

/// Outcome of racing a fetch against an endpoint change.
enum Raced {
    Reply(Result<PeekReply>, Duration),
    InterfaceChanged(bool),
    TaskFailed(String),
}

#[async_trait]
impl PeekCursor for ServerPeekCursor {
    fn has_remaining(&mut self) -> bool {
        match self.deserializer.peek() {
            Some(record) => record.position() < self.end,
            None => false,
        }
    }

    fn get(&self) -> &VersionSubsequenceMessage {
        self.deserializer
            .peek()
            .unwrap_or_else(|| panic!("get() on exhausted cursor for team {}", self.team_id))
    }

    fn next(&mut self) {
        assert!(
            self.deserializer.peek().is_some(),
            "next() on exhausted cursor for team {}",
            self.team_id
        );
        self.deserializer.advance();
        self.position = match self.deserializer.peek() {
            Some(record) => record.position(),
            None => LogPosition::version_start(self.next_begin),
        };
    }

    fn reset(&mut self) {
        self.deserializer.rewind();
        // Rewinding may step back before already-consumed records from an
        // earlier pass; position follows the head.
        if let Some(record) = self.deserializer.peek() {
            self.position = record.position();
        }
    }

    async fn remote_more_available(&mut self) -> Result<bool> {
        if self.is_exhausted() {
            return Err(PeekError::EndOfStream);
        }
        // A fetch never discards buffered records.
        if self.has_remaining() {
            return Ok(true);
        }
        if self.parallel {
            self.fetch_parallel().await
        } else {
            self.fetch_serial().await
        }
    }
}

impl Drop for ServerPeekCursor {
    fn drop(&mut self) {
        for peek in &self.pipeline {
            peek.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPeer {
        resets: AtomicUsize,
    }

    impl CountingPeer {
        fn new() -> Self {
            Self {
                resets: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TLogPeer for CountingPeer {
        async fn peek(&self, _request: PeekRequest) -> Result<PeekReply> {
            Err(PeekError::Timeout)
        }
        fn endpoint(&self) -> &str {
            "counting:0"
        }
        fn reset_connection(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stats_config() -> PeekConfig {
        PeekConfig {
            peek_max_latency: Duration::from_millis(500),
            peek_stats_interval: Duration::from_secs(2),
            peek_stats_slow_amount: 3,
            peek_stats_slow_ratio: 0.5,
            peek_reset_interval: Duration::from_secs(1000),
            desired_reply_bytes: 100,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_window_triggers_one_reset() {
        let config = stats_config();
        let peer = CountingPeer::new();
        let mut stats = PeekStats::new();

        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(600)).await;
            stats.record(Duration::from_millis(600), 200, &config, &peer);
        }

        assert_eq!(peer.resets.load(Ordering::SeqCst), 1);
        // Counters zeroed for the next window.
        assert_eq!(stats.slow, 0);
        assert_eq!(stats.fast, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_debounced() {
        let config = stats_config();
        let peer = CountingPeer::new();
        let mut stats = PeekStats::new();

        for _ in 0..16 {
            tokio::time::advance(Duration::from_millis(600)).await;
            stats.record(Duration::from_millis(600), 200, &config, &peer);
        }

        // Later windows fall inside the reset debounce.
        assert_eq!(peer.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_replies_do_not_reset() {
        let config = stats_config();
        let peer = CountingPeer::new();
        let mut stats = PeekStats::new();

        for _ in 0..8 {
            tokio::time::advance(Duration::from_millis(600)).await;
            stats.record(Duration::from_millis(100), 200, &config, &peer);
        }

        assert_eq!(peer.resets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_replies_count_as_unknown() {
        let config = stats_config();
        let peer = CountingPeer::new();
        let mut stats = PeekStats::new();

        for _ in 0..8 {
            tokio::time::advance(Duration::from_millis(600)).await;
            stats.record(Duration::from_millis(600), 10, &config, &peer);
        }

        // Slow but tiny: inconclusive, never enough for a reset.
        assert_eq!(peer.resets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_window_respects_ratio() {
        let config = stats_config();
        let peer = CountingPeer::new();
        let mut stats = PeekStats::new();

        // 3 slow, 5 fast: amount is met but the ratio 3/8 is below 0.5.
        for i in 0..8 {
            tokio::time::advance(Duration::from_millis(300)).await;
            let latency = if i < 3 { 600 } else { 100 };
            stats.record(Duration::from_millis(latency), 200, &config, &peer);
        }

        assert_eq!(peer.resets.load(Ordering::SeqCst), 0);
    }
}
