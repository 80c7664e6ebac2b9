//! Event bridge — keeps the confirmed-scam projection consistent with the
//! governance contract's `ProposalExecuted` events.
//!
//! Lifecycle per instance: IDLE → SYNCING (bounded historical catch-up) →
//! LIVE, streaming when a websocket endpoint is configured, polling
//! otherwise. Stream errors back off exponentially (1 s doubling to a
//! 120 s cap) and fall back to polling after repeated failures. Logs are
//! handled strictly sequentially: the projection's correctness hinges on
//! later block numbers winning, so batched upserts must not race.
//!
//! All failures are absorbed here; a bad event never takes the process
//! down. Replaying a log is harmless because the upsert is conflict-free
//! by address.

use crate::abi::{
    decode_get_proposal, decode_proposal_executed, decode_uint, encode_call, parse_address,
    proposal_executed_topic, OnchainProposal,
};
use crate::chain::{ChainClient, ChainSubscriber};
use crate::config::Config;
use crate::schema::ConfirmedScam;
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use ethers::abi::Token;
use ethers::types::{Address, Log, U256};
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Consecutive stream failures before the bridge settles into poll mode.
const MAX_STREAM_FAILURES: u32 = 5;

/// Overall deadline for the historical catch-up scan.
const SYNC_DEADLINE: Duration = Duration::from_secs(30);

/// Bridge tuning, resolved from the environment.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub contract: Address,
    pub sync_window_blocks: u64,
    pub skip_historical_sync: bool,
    pub poll_interval: Duration,
}

impl BridgeConfig {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let contract = parse_address(&config.quadratic_voting_address)
            .map_err(|e| anyhow::anyhow!("governance contract address: {e}"))?;
        Ok(Self {
            rpc_url: config.rpc_url.clone(),
            ws_url: if config.ws_url.is_empty() {
                None
            } else {
                Some(config.ws_url.clone())
            },
            contract,
            sync_window_blocks: config.sync_window_blocks,
            skip_historical_sync: config.skip_historical_sync,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        })
    }
}

// ── Statistics ──────────────────────────────────────────────────

/// Live counters, exported through the indexer's stats endpoint.
#[derive(Debug, Default)]
pub struct BridgeStats {
    logs_seen: AtomicU64,
    projected: AtomicU64,
    skipped: AtomicU64,
    handler_errors: AtomicU64,
    last_block: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BridgeStatsSnapshot {
    pub logs_seen: u64,
    pub projected: u64,
    pub skipped: u64,
    pub handler_errors: u64,
    pub last_block: u64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            logs_seen: self.logs_seen.load(Ordering::Relaxed),
            projected: self.projected.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            last_block: self.last_block.load(Ordering::Relaxed),
        }
    }
}

// ── Governance view calls ───────────────────────────────────────

/// The three request/response view calls the handler needs. A trait seam
/// so the handler is testable without a chain.
#[async_trait]
pub trait GovernanceViews: Send + Sync {
    async fn get_proposal(&self, proposal_id: U256) -> anyhow::Result<OnchainProposal>;
    async fn voter_count(&self, proposal_id: U256) -> anyhow::Result<u64>;
    async fn scam_score(&self, address: Address) -> anyhow::Result<u64>;
}

/// Production implementation over the request/response transport. The
/// bridge prefers this even while a stream is live.
pub struct ChainGovernanceViews {
    client: ChainClient,
    contract: Address,
}

impl ChainGovernanceViews {
    pub fn new(client: ChainClient, contract: Address) -> Self {
        Self { client, contract }
    }
}

#[async_trait]
impl GovernanceViews for ChainGovernanceViews {
    async fn get_proposal(&self, proposal_id: U256) -> anyhow::Result<OnchainProposal> {
        let data = encode_call("getProposal", &[Token::Uint(proposal_id)])?;
        let output = self.client.call(self.contract, data).await?;
        Ok(decode_get_proposal(&output)?)
    }

    async fn voter_count(&self, proposal_id: U256) -> anyhow::Result<u64> {
        let data = encode_call("getProposalVoterCount", &[Token::Uint(proposal_id)])?;
        let output = self.client.call(self.contract, data).await?;
        Ok(saturating_u64(decode_uint("getProposalVoterCount", &output)?))
    }

    async fn scam_score(&self, address: Address) -> anyhow::Result<u64> {
        let data = encode_call("scamScore", &[Token::Address(address)])?;
        let output = self.client.call(self.contract, data).await?;
        Ok(saturating_u64(decode_uint("scamScore", &output)?))
    }
}

// ── Backoff ─────────────────────────────────────────────────────

/// Exponential backoff: 1 s, doubling to a 120 s cap; reset on success.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(120);

    pub fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Current delay; doubles for the next failure.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::CAP);
        delay
    }

    pub fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

// ── Handler ─────────────────────────────────────────────────────

/// What the handler did with one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Projected,
    SkippedNotPassed,
    SkippedMalformed,
    SkippedViewFailure,
    SkippedStoreFailure,
}

/// Process one `ProposalExecuted` log into the projection.
///
/// Pure function of the log: decode, fetch the proposal views over the
/// request/response transport, and upsert. `getProposal` failure drops
/// the event; voter-count and scam-score failures fall back to 0 and 100.
pub async fn handle_log(
    store: &dyn Store,
    views: &dyn GovernanceViews,
    stats: &BridgeStats,
    log: &Log,
) -> Handled {
    stats.logs_seen.fetch_add(1, Ordering::Relaxed);
    if let Some(block) = log.block_number {
        stats.last_block.store(block.as_u64(), Ordering::Relaxed);
    }

    let event = match decode_proposal_executed(log) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "skipping undecodable log");
            stats.handler_errors.fetch_add(1, Ordering::Relaxed);
            return Handled::SkippedMalformed;
        }
    };

    if !event.passed {
        info!(proposal_id = %event.proposal_id, "proposal executed without passing");
        stats.skipped.fetch_add(1, Ordering::Relaxed);
        return Handled::SkippedNotPassed;
    }

    let proposal = match views.get_proposal(event.proposal_id).await {
        Ok(proposal) => proposal,
        Err(e) => {
            warn!(
                proposal_id = %event.proposal_id,
                error = %e,
                "getProposal failed, dropping event"
            );
            stats.handler_errors.fetch_add(1, Ordering::Relaxed);
            return Handled::SkippedViewFailure;
        }
    };

    let total_voters = match views.voter_count(event.proposal_id).await {
        Ok(count) => count,
        Err(e) => {
            warn!(proposal_id = %event.proposal_id, error = %e, "voter count unavailable, using 0");
            0
        }
    };
    let scam_score = match views.scam_score(proposal.suspicious_address).await {
        Ok(score) => score,
        Err(e) => {
            warn!(
                address = ?proposal.suspicious_address,
                error = %e,
                "scam score unavailable, using 100"
            );
            100
        }
    };

    let scam = ConfirmedScam {
        address: format!("0x{:x}", proposal.suspicious_address),
        scam_score: scam_score.min(i64::MAX as u64) as i64,
        proposal_id: saturating_i64(event.proposal_id),
        confirmed_at: Utc::now(),
        total_voters: total_voters.min(i64::MAX as u64) as i64,
        description: proposal.description,
        tx_hash: log.transaction_hash.map(|h| format!("0x{h:x}")),
        block_number: log.block_number.map(|n| n.as_u64().min(i64::MAX as u64) as i64),
    };

    match store.upsert_confirmed_scam(scam).await {
        Ok(()) => {
            info!(
                proposal_id = %event.proposal_id,
                block = ?log.block_number,
                "confirmed scam projected"
            );
            stats.projected.fetch_add(1, Ordering::Relaxed);
            Handled::Projected
        }
        Err(e) => {
            warn!(error = %e, "projection upsert failed");
            stats.handler_errors.fetch_add(1, Ordering::Relaxed);
            Handled::SkippedStoreFailure
        }
    }
}

fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

fn saturating_i64(value: U256) -> i64 {
    if value > U256::from(i64::MAX) {
        i64::MAX
    } else {
        value.as_u64() as i64
    }
}

// ── Bridge task ─────────────────────────────────────────────────

/// The long-running subscriber. `start` spawns the background task;
/// `stop` signals the cancellation channel and joins, so it only returns
/// after the task has released its resources.
pub struct EventBridge {
    config: BridgeConfig,
    store: Arc<dyn Store>,
    views: Arc<dyn GovernanceViews>,
    stats: Arc<BridgeStats>,
    cancel: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl EventBridge {
    pub fn new(config: BridgeConfig, store: Arc<dyn Store>, views: Arc<dyn GovernanceViews>) -> Self {
        Self {
            config,
            store,
            views,
            stats: Arc::new(BridgeStats::default()),
            cancel: None,
            task: None,
        }
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            warn!("event bridge already started");
            return;
        }
        let (tx, rx) = watch::channel(false);
        let config = self.config.clone();
        let store = self.store.clone();
        let views = self.views.clone();
        let stats = self.stats.clone();
        self.cancel = Some(tx);
        self.task = Some(tokio::spawn(async move {
            run_loop(config, store, views, stats, rx).await;
            info!("event bridge stopped");
        }));
        info!(contract = ?self.config.contract, "event bridge started");
    }

    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "event bridge task panicked");
            }
        }
    }
}

async fn run_loop(
    config: BridgeConfig,
    store: Arc<dyn Store>,
    views: Arc<dyn GovernanceViews>,
    stats: Arc<BridgeStats>,
    mut cancel: watch::Receiver<bool>,
) {
    let client = match ChainClient::dial(&config.rpc_url) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "event bridge cannot dial rpc endpoint");
            return;
        }
    };

    // SYNCING: bounded historical scan through the same handler.
    let mut last_block = catch_up(&config, &client, &*store, &*views, &stats).await;

    // LIVE: stream with poll fallback.
    let mut backoff = Backoff::new();
    let mut stream_failures = 0u32;

    while !*cancel.borrow() {
        let stream_url = config
            .ws_url
            .as_deref()
            .filter(|_| stream_failures < MAX_STREAM_FAILURES);

        match stream_url {
            Some(url) => {
                match run_stream(url, &config, &*store, &*views, &stats, &mut cancel, &mut backoff)
                    .await
                {
                    StreamEnd::Cancelled => return,
                    StreamEnd::Failed => {
                        stream_failures += 1;
                        if stream_failures >= MAX_STREAM_FAILURES {
                            warn!(
                                failures = stream_failures,
                                "stream failing repeatedly, settling into poll mode"
                            );
                            continue;
                        }
                        let delay = backoff.next();
                        warn!(delay_secs = delay.as_secs(), "stream error, backing off");
                        if wait_or_cancel(&mut cancel, delay).await {
                            return;
                        }
                    }
                }
            }
            None => {
                run_poll(
                    &config,
                    &client,
                    &*store,
                    &*views,
                    &stats,
                    &mut cancel,
                    &mut last_block,
                )
                .await;
                return;
            }
        }
    }
}

/// Scan a bounded window behind the head, feeding each log through the
/// handler. Returns the head to poll from. Failures are logged and the
/// bridge proceeds live; the idempotent upsert makes any replay harmless.
async fn catch_up(
    config: &BridgeConfig,
    client: &ChainClient,
    store: &dyn Store,
    views: &dyn GovernanceViews,
    stats: &BridgeStats,
) -> u64 {
    let head = match client.block_number().await {
        Ok(head) => head,
        Err(e) => {
            warn!(error = %e, "cannot read chain head, skipping catch-up");
            return 0;
        }
    };

    if config.skip_historical_sync {
        info!(head, "historical catch-up disabled by config");
        return head;
    }

    let from = head.saturating_sub(config.sync_window_blocks);
    info!(from, head, "historical catch-up started");

    let scan = async {
        match client
            .filter_logs(from, head, config.contract, proposal_executed_topic())
            .await
        {
            Ok(logs) => {
                info!(count = logs.len(), "catch-up logs fetched");
                for log in &logs {
                    handle_log(store, views, stats, log).await;
                }
            }
            Err(e) => warn!(error = %e, "catch-up log scan failed"),
        }
    };

    if tokio::time::timeout(SYNC_DEADLINE, scan).await.is_err() {
        warn!(
            deadline_secs = SYNC_DEADLINE.as_secs(),
            "catch-up deadline exceeded, continuing live from current head"
        );
    }
    head
}

enum StreamEnd {
    Cancelled,
    Failed,
}

async fn run_stream(
    url: &str,
    config: &BridgeConfig,
    store: &dyn Store,
    views: &dyn GovernanceViews,
    stats: &BridgeStats,
    cancel: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> StreamEnd {
    let subscriber = match ChainSubscriber::dial(url).await {
        Ok(subscriber) => subscriber,
        Err(e) => {
            warn!(error = %e, "stream dial failed");
            return StreamEnd::Failed;
        }
    };
    let mut stream = match subscriber
        .subscribe_logs(config.contract, proposal_executed_topic())
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "log subscription failed");
            return StreamEnd::Failed;
        }
    };

    info!("log subscription established");
    backoff.reset();

    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return StreamEnd::Cancelled;
                }
            }
            item = stream.next() => match item {
                Some(log) => {
                    handle_log(store, views, stats, &log).await;
                }
                None => {
                    warn!("log stream ended");
                    return StreamEnd::Failed;
                }
            }
        }
    }
}

/// Poll-mode loop: read the head every interval and scan any new range.
/// `last_block` advances only after every log in the range was handled.
async fn run_poll(
    config: &BridgeConfig,
    client: &ChainClient,
    store: &dyn Store,
    views: &dyn GovernanceViews,
    stats: &BridgeStats,
    cancel: &mut watch::Receiver<bool>,
    last_block: &mut u64,
) {
    info!(interval_secs = config.poll_interval.as_secs(), "poll mode active");
    let mut backoff = Backoff::new();

    loop {
        let delay = match poll_once(config, client, store, views, stats, last_block).await {
            Ok(()) => {
                backoff.reset();
                config.poll_interval
            }
            Err(e) => {
                let delay = backoff.next();
                warn!(error = %e, delay_secs = delay.as_secs(), "poll cycle failed");
                delay
            }
        };
        if wait_or_cancel(cancel, delay).await {
            return;
        }
    }
}

async fn poll_once(
    config: &BridgeConfig,
    client: &ChainClient,
    store: &dyn Store,
    views: &dyn GovernanceViews,
    stats: &BridgeStats,
    last_block: &mut u64,
) -> anyhow::Result<()> {
    let head = client.block_number().await?;
    if head <= *last_block {
        return Ok(());
    }

    let logs = client
        .filter_logs(
            *last_block + 1,
            head,
            config.contract,
            proposal_executed_topic(),
        )
        .await?;
    for log in &logs {
        handle_log(store, views, stats, log).await;
    }
    *last_block = head;
    Ok(())
}

/// Sleep that honors the cancellation channel. Returns true when
/// cancelled.
async fn wait_or_cancel(cancel: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = cancel.changed() => changed.is_err() || *cancel.borrow(),
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, Store};
    use ethers::abi::encode;
    use ethers::types::H256;
    use std::sync::Mutex;

    const SUSPICIOUS: &str = "0x00000000000000000000000000000000000000bb";

    /// Programmable view stub.
    struct StubViews {
        proposal: Option<OnchainProposal>,
        voter_count: anyhow::Result<u64>,
        scam_score: anyhow::Result<u64>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl StubViews {
        fn passing() -> Self {
            Self {
                proposal: Some(OnchainProposal {
                    suspicious_address: SUSPICIOUS.parse().unwrap(),
                    creator: Address::zero(),
                    description: "drainer".into(),
                    votes_for: U256::from(5u64),
                    votes_against: U256::from(1u64),
                    end_time: U256::zero(),
                    executed: true,
                    passed: true,
                }),
                voter_count: Ok(6),
                scam_score: Ok(83),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GovernanceViews for StubViews {
        async fn get_proposal(&self, _id: U256) -> anyhow::Result<OnchainProposal> {
            self.calls.lock().unwrap().push("get_proposal");
            self.proposal
                .clone()
                .ok_or_else(|| anyhow::anyhow!("proposal view reverted"))
        }

        async fn voter_count(&self, _id: U256) -> anyhow::Result<u64> {
            self.calls.lock().unwrap().push("voter_count");
            match &self.voter_count {
                Ok(n) => Ok(*n),
                Err(_) => Err(anyhow::anyhow!("voter count reverted")),
            }
        }

        async fn scam_score(&self, _address: Address) -> anyhow::Result<u64> {
            self.calls.lock().unwrap().push("scam_score");
            match &self.scam_score {
                Ok(n) => Ok(*n),
                Err(_) => Err(anyhow::anyhow!("scam score reverted")),
            }
        }
    }

    fn executed_log(proposal_id: u64, passed: bool, block: u64, tx: u8) -> Log {
        let mut id_topic = [0u8; 32];
        id_topic[24..].copy_from_slice(&proposal_id.to_be_bytes());
        Log {
            topics: vec![proposal_executed_topic(), H256::from(id_topic)],
            data: encode(&[Token::Bool(passed)]).into(),
            block_number: Some(block.into()),
            transaction_hash: Some(H256::from([tx; 32])),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let mut backoff = Backoff::new();
        let mut seen = Vec::new();
        for _ in 0..9 {
            seen.push(backoff.next().as_secs());
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 64, 120, 120]);

        backoff.reset();
        assert_eq!(backoff.next().as_secs(), 1);
    }

    #[tokio::test]
    async fn test_passing_log_projects_confirmed_scam() {
        let store = MemStore::new();
        let views = StubViews::passing();
        let stats = BridgeStats::default();
        let log = executed_log(7, true, 1234, 0xab);

        let handled = handle_log(&store, &views, &stats, &log).await;
        assert_eq!(handled, Handled::Projected);

        let scam = store.get_confirmed_scam(SUSPICIOUS).await.unwrap().unwrap();
        assert_eq!(scam.proposal_id, 7);
        assert_eq!(scam.scam_score, 83);
        assert_eq!(scam.total_voters, 6);
        assert_eq!(scam.block_number, Some(1234));
        assert_eq!(scam.tx_hash.as_deref(), Some(&format!("0x{:x}", H256::from([0xab; 32]))[..]));
        assert_eq!(scam.address, SUSPICIOUS);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.logs_seen, 1);
        assert_eq!(snapshot.projected, 1);
        assert_eq!(snapshot.last_block, 1234);
    }

    #[tokio::test]
    async fn test_replaying_same_log_is_idempotent() {
        let store = MemStore::new();
        let views = StubViews::passing();
        let stats = BridgeStats::default();
        let log = executed_log(7, true, 1234, 0xab);

        for _ in 0..3 {
            assert_eq!(
                handle_log(&store, &views, &stats, &log).await,
                Handled::Projected
            );
        }

        let scam = store.get_confirmed_scam(SUSPICIOUS).await.unwrap().unwrap();
        assert_eq!(scam.proposal_id, 7);
        assert_eq!(scam.block_number, Some(1234));
        assert_eq!(stats.snapshot().projected, 3); // same terminal row each time
    }

    #[tokio::test]
    async fn test_not_passed_is_skipped() {
        let store = MemStore::new();
        let views = StubViews::passing();
        let stats = BridgeStats::default();
        let log = executed_log(7, false, 1234, 0xab);

        let handled = handle_log(&store, &views, &stats, &log).await;
        assert_eq!(handled, Handled::SkippedNotPassed);
        assert!(store.get_confirmed_scam(SUSPICIOUS).await.unwrap().is_none());
        // No view calls for a failed proposal.
        assert!(views.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_log_is_skipped() {
        let store = MemStore::new();
        let views = StubViews::passing();
        let stats = BridgeStats::default();
        let log = Log {
            topics: vec![proposal_executed_topic()], // missing proposal id
            data: encode(&[Token::Bool(true)]).into(),
            ..Default::default()
        };

        let handled = handle_log(&store, &views, &stats, &log).await;
        assert_eq!(handled, Handled::SkippedMalformed);
        assert_eq!(stats.snapshot().handler_errors, 1);
    }

    #[tokio::test]
    async fn test_proposal_view_failure_drops_event() {
        let store = MemStore::new();
        let mut views = StubViews::passing();
        views.proposal = None;
        let stats = BridgeStats::default();
        let log = executed_log(7, true, 1234, 0xab);

        let handled = handle_log(&store, &views, &stats, &log).await;
        assert_eq!(handled, Handled::SkippedViewFailure);
        assert!(store.get_confirmed_scam(SUSPICIOUS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_view_failures_use_fallbacks() {
        let store = MemStore::new();
        let mut views = StubViews::passing();
        views.voter_count = Err(anyhow::anyhow!("revert"));
        views.scam_score = Err(anyhow::anyhow!("revert"));
        let stats = BridgeStats::default();
        let log = executed_log(7, true, 1234, 0xab);

        let handled = handle_log(&store, &views, &stats, &log).await;
        assert_eq!(handled, Handled::Projected);

        let scam = store.get_confirmed_scam(SUSPICIOUS).await.unwrap().unwrap();
        assert_eq!(scam.total_voters, 0);
        assert_eq!(scam.scam_score, 100);
    }

    #[tokio::test]
    async fn test_later_block_wins_earlier_does_not_regress() {
        let store = MemStore::new();
        let views = StubViews::passing();
        let stats = BridgeStats::default();

        handle_log(&store, &views, &stats, &executed_log(7, true, 2000, 0x02)).await;
        handle_log(&store, &views, &stats, &executed_log(8, true, 1000, 0x01)).await;

        let scam = store.get_confirmed_scam(SUSPICIOUS).await.unwrap().unwrap();
        assert_eq!(scam.proposal_id, 7);
        assert_eq!(scam.block_number, Some(2000));
    }

    #[tokio::test]
    async fn test_stop_joins_the_task() {
        let config = BridgeConfig {
            rpc_url: "http://127.0.0.1:1".into(), // nothing listens here
            ws_url: None,
            contract: Address::zero(),
            sync_window_blocks: 10,
            skip_historical_sync: true,
            poll_interval: Duration::from_millis(10),
        };
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let views: Arc<dyn GovernanceViews> = Arc::new(StubViews::passing());

        let mut bridge = EventBridge::new(config, store, views);
        bridge.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // stop() returns only after the task has been joined.
        tokio::time::timeout(Duration::from_secs(5), bridge.stop())
            .await
            .expect("stop() must observe cancellation promptly");
    }
}
