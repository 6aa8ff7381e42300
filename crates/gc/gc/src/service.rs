use crate::{
    error::{GcError, ScanError},
    metrics::GcMetrics,
    provider::{NodeHandle, StateReader},
    reachable::ReachableSet,
    scanner::Scanner,
    store::StateStore,
    swap,
};
use alloy_primitives::BlockNumber;
use std::{
    fmt,
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use trie_gc_types::{GcConfig, GcEvent, QuiesceOutcome, TopChanged};

/// Capacity of the observational event stream.
const EVENTS_CAPACITY: usize = 64;

/// Messages accepted by the collector mailbox.
#[derive(Debug)]
enum GcMessage {
    /// Initial chain sync finished; interval gating may begin.
    ChainSynced,
    /// The chain store adopted a new top block.
    TopChanged(TopChanged),
    /// The conductor reached a quiescent point and offers a swap
    /// opportunity.
    Quiesce(oneshot::Sender<QuiesceOutcome>),
    /// Tear the service down, discarding any in-flight scan.
    Stop,
}

/// Result of the background full-plus-range scan, handed off exactly once.
#[derive(Debug)]
struct ScanOutput {
    set: ReachableSet,
    base: BlockNumber,
    top: BlockNumber,
    elapsed: Duration,
}

/// Collector state machine.
///
/// The reachable set is born in `Scanning` (owned by the worker), matures in
/// `Ready` (owned by the controller), is consumed exactly once entering
/// `Swapping`, and dies with the process restart.
#[derive(Debug)]
enum GcState {
    /// Waiting for sync completion and/or the next interval boundary.
    Idle,
    /// Background scan in flight. The receiver is the single point where the
    /// worker hands the owned set back.
    Scanning {
        base: BlockNumber,
        top: BlockNumber,
        done: oneshot::Receiver<Result<ScanOutput, ScanError>>,
    },
    /// Reachable set live and maintained incrementally on the controller.
    Ready {
        base: BlockNumber,
        last_height: BlockNumber,
        set: ReachableSet,
    },
    /// Set staged durably; the node is restarting. Terminal.
    Swapping,
}

/// What the mailbox loop saw this turn.
enum Turn {
    Msg(Option<GcMessage>),
    Scan(Result<Result<ScanOutput, ScanError>, oneshot::error::RecvError>),
}

/// Account-state garbage collector service.
///
/// Processes one event at a time from its mailbox and never blocks on
/// external I/O while holding internal state. The only long-running work,
/// the initial full scan, happens on a blocking worker and rejoins through a
/// single completion message; incremental delta scans run inline because
/// they are bounded by inter-block churn and must stay serialized with
/// top-changed ordering.
pub struct GcService<P, S, N> {
    config: GcConfig,
    scanner: Scanner<P>,
    store: S,
    node: N,
    incoming: mpsc::UnboundedReceiver<GcMessage>,
    events: broadcast::Sender<GcEvent>,
    /// Most recently observed top, tracked in every state so the quiescence
    /// guard can be evaluated without consulting the chain store.
    top: Option<TopChanged>,
    synced: bool,
    state: GcState,
    metrics: GcMetrics,
}

impl<P, S, N> fmt::Debug for GcService<P, S, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcService")
            .field("config", &self.config)
            .field("top", &self.top)
            .field("synced", &self.synced)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<P, S, N> GcService<P, S, N>
where
    P: StateReader + Clone,
    S: StateStore,
    N: NodeHandle,
{
    /// Creates the service and the handle used to feed it.
    pub fn new(config: GcConfig, provider: P, store: S, node: N) -> (Self, GcHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        let service = Self {
            config,
            scanner: Scanner::new(provider),
            store,
            node,
            incoming: rx,
            events: events.clone(),
            top: None,
            synced: false,
            state: GcState::Idle,
            metrics: GcMetrics::default(),
        };
        (service, GcHandle { sender: tx, events })
    }

    /// Creates the service and spawns it onto the current runtime.
    pub fn spawn(
        config: GcConfig,
        provider: P,
        store: S,
        node: N,
    ) -> (GcHandle, tokio::task::JoinHandle<()>) {
        let (service, handle) = Self::new(config, provider, store, node);
        (handle, tokio::spawn(service.run()))
    }

    /// Drives the mailbox until [`GcHandle::stop`] or all handles drop.
    pub async fn run(mut self) {
        loop {
            let turn = match &mut self.state {
                GcState::Scanning { done, .. } => tokio::select! {
                    res = done => Turn::Scan(res),
                    msg = self.incoming.recv() => Turn::Msg(msg),
                },
                _ => Turn::Msg(self.incoming.recv().await),
            };
            match turn {
                Turn::Scan(Ok(res)) => self.on_scan_done(res),
                Turn::Scan(Err(_)) => {
                    error!(target: "gc", "Scan worker dropped before completing");
                    self.state = GcState::Idle;
                }
                Turn::Msg(Some(GcMessage::ChainSynced)) => self.on_chain_synced(),
                Turn::Msg(Some(GcMessage::TopChanged(top))) => self.on_top_changed(top),
                Turn::Msg(Some(GcMessage::Quiesce(reply))) => {
                    let outcome = self.on_quiesce();
                    let _ = reply.send(outcome);
                }
                Turn::Msg(Some(GcMessage::Stop)) | Turn::Msg(None) => break,
            }
        }
        debug!(target: "gc", "Collector service stopped");
    }

    fn on_chain_synced(&mut self) {
        if !self.config.enabled || self.synced {
            return
        }
        self.synced = true;
        debug!(target: "gc", interval = self.config.interval, "Chain synced; collector armed");
    }

    fn on_top_changed(&mut self, top: TopChanged) {
        self.top = Some(top);
        match self.state {
            GcState::Idle => self.maybe_start_scan(top),
            GcState::Ready { .. } => self.maintain(top),
            // the in-flight worker owns the set; Ready closes the height gap
            // with a range scan on its first key-block top
            GcState::Scanning { .. } | GcState::Swapping => {}
        }
    }

    /// Spawns the background scan when the interval boundary is hit.
    fn maybe_start_scan(&mut self, top: TopChanged) {
        if !self.config.enabled || !self.synced {
            return
        }
        if top.height % self.config.interval != 0 {
            return
        }

        let base = top.height.saturating_sub(self.config.history);
        info!(target: "gc", base, top = top.height, "Starting background reachability scan");
        let _ = self.events.send(GcEvent::ScanStarted { base, top: top.height });

        let scanner = self.scanner.clone();
        let top_height = top.height;
        let (done_tx, done_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let res = scanner.full_scan(base).and_then(|set| {
                scanner.range_scan(base, top_height, &set)?;
                Ok(ScanOutput { set, base, top: top_height, elapsed: started.elapsed() })
            });
            let _ = done_tx.send(res);
        });
        self.state = GcState::Scanning { base, top: top_height, done: done_rx };
    }

    /// Adopts or discards the worker's result.
    fn on_scan_done(&mut self, res: Result<ScanOutput, ScanError>) {
        debug_assert!(matches!(self.state, GcState::Scanning { .. }));
        match res {
            Ok(out) => {
                self.metrics.scan_duration_seconds.record(out.elapsed.as_secs_f64());
                self.metrics.reachable_nodes.set(out.set.len() as f64);
                info!(
                    target: "gc",
                    base = out.base,
                    top = out.top,
                    nodes = out.set.len(),
                    elapsed = ?out.elapsed,
                    "Reachable set ready"
                );
                let _ = self.events.send(GcEvent::ScanFinished {
                    base: out.base,
                    top: out.top,
                    nodes: out.set.len(),
                    elapsed: out.elapsed,
                });
                self.state =
                    GcState::Ready { base: out.base, last_height: out.top, set: out.set };
            }
            Err(err) => {
                // the next interval boundary retries from scratch
                warn!(target: "gc", %err, "Background scan failed");
                self.state = GcState::Idle;
            }
        }
    }

    /// Folds a new top into the live reachable set.
    fn maintain(&mut self, top: TopChanged) {
        if top.kind.is_micro() {
            return
        }
        let GcState::Ready { base, last_height, set } = &mut self.state else { return };

        if top.height > *last_height {
            let started = Instant::now();
            match self.scanner.range_scan(*last_height, top.height, set) {
                Ok(()) => {
                    self.metrics.delta_duration_seconds.record(started.elapsed().as_secs_f64());
                    debug!(
                        target: "gc",
                        from = *last_height,
                        to = top.height,
                        nodes = set.len(),
                        "Reachable set extended"
                    );
                    *last_height = top.height;
                }
                Err(err) => {
                    // last_height stays put so the next top change retries
                    // the whole gap
                    warn!(
                        target: "gc",
                        %err,
                        from = *last_height,
                        to = top.height,
                        "Incremental scan failed"
                    );
                }
            }
        } else {
            if top.height < *base {
                warn!(
                    target: "gc",
                    height = top.height,
                    base = *base,
                    "Reorg reached below the scan base; retention below it is best-effort"
                );
            }
            // a fork can re-announce the same or a lower height; union in
            // any newly introduced subtries, stale extras are harmless
            if let Err(err) = self.scanner.delta_scan(top.height, set) {
                warn!(target: "gc", %err, height = top.height, "Fork delta scan failed");
            }
        }
        self.metrics.reachable_nodes.set(set.len() as f64);
    }

    /// Handles the conductor's quiescence call.
    ///
    /// Only honored in `Ready` with a key-block top; everything else replies
    /// `Nop` without mutating state.
    fn on_quiesce(&mut self) -> QuiesceOutcome {
        let GcState::Ready { last_height, set, .. } = &mut self.state else {
            debug!(target: "gc", "Quiescence call outside Ready");
            return QuiesceOutcome::Nop
        };
        let Some(top) = self.top.filter(|top| top.kind.is_key()) else {
            return QuiesceOutcome::Nop
        };

        // close the window up to the current top before persisting
        if top.height > *last_height {
            if let Err(err) = self.scanner.range_scan(*last_height, top.height, set) {
                warn!(target: "gc", %err, "Cannot close the scan window; skipping swap");
                return QuiesceOutcome::Nop
            }
            *last_height = top.height;
        }

        match swap::stage(&self.store, set) {
            Ok(rows) => {
                self.metrics.staged_rows.increment(rows);
                let _ = self.events.send(GcEvent::Staged { rows });
                info!(target: "gc", rows, "Account state staged; restarting node to swap");
                self.node.stop_consensus();
                self.node.restart();
                self.state = GcState::Swapping;
                QuiesceOutcome::Restarting
            }
            Err(err) => {
                error!(target: "gc", %err, "Staging failed; keeping live state");
                QuiesceOutcome::Nop
            }
        }
    }
}

/// Cloneable handle feeding the collector service.
///
/// The event bridge pushes chain notifications through it; the conductor
/// calls [`maybe_garbage_collect`](Self::maybe_garbage_collect) at key-block
/// boundaries.
#[derive(Debug, Clone)]
pub struct GcHandle {
    sender: mpsc::UnboundedSender<GcMessage>,
    events: broadcast::Sender<GcEvent>,
}

impl GcHandle {
    /// Notes that initial chain sync completed.
    pub fn chain_synced(&self) {
        let _ = self.sender.send(GcMessage::ChainSynced);
    }

    /// Forwards a top-changed notification.
    pub fn top_changed(&self, top: TopChanged) {
        let _ = self.sender.send(GcMessage::TopChanged(top));
    }

    /// The conductor's quiescence call: offers the collector the chance to
    /// stage the reachable set and restart the node.
    ///
    /// Returns [`QuiesceOutcome::Restarting`] when the swap was staged and
    /// the restart is underway, [`QuiesceOutcome::Nop`] otherwise. The
    /// caller must invoke this only when no later top-changed notification
    /// is in flight.
    pub async fn maybe_garbage_collect(&self) -> Result<QuiesceOutcome, GcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GcMessage::Quiesce(tx))
            .map_err(|_| GcError::ServiceUnavailable)?;
        rx.await.map_err(|_| GcError::ServiceUnavailable)
    }

    /// Subscribes to observational collector events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GcEvent> {
        self.events.subscribe()
    }

    /// Tears the service down, discarding any in-flight scan.
    pub fn stop(&self) {
        let _ = self.sender.send(GcMessage::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::StateTable,
        test_utils::{node_hash, MockChain, MockNode, MockStore},
    };
    use assert_matches::assert_matches;

    fn config(interval: u64, history: u64) -> GcConfig {
        GcConfig { enabled: true, interval, history }
    }

    /// Chain with a shared subtree and one root plus leaf per height.
    fn chain_with_heights(heights: impl IntoIterator<Item = BlockNumber>) -> MockChain {
        let chain = MockChain::new();
        chain.insert_node(node_hash(1), b"shared", &[]);
        for height in heights {
            chain.insert_node(node_hash(100 + height), b"leaf", &[]);
            chain.insert_node(
                node_hash(1000 + height),
                b"root",
                &[node_hash(1), node_hash(100 + height)],
            );
            chain.commit(height, node_hash(1000 + height));
        }
        chain
    }

    type TestService = GcService<MockChain, MockStore, MockNode>;

    fn service(config: GcConfig, chain: MockChain) -> (TestService, MockStore, MockNode) {
        let store = MockStore::new();
        let node = MockNode::new();
        let (service, _handle) = GcService::new(config, chain, store.clone(), node.clone());
        (service, store, node)
    }

    /// Awaits the background worker and feeds its result back in.
    async fn finish_scan(service: &mut TestService) {
        let res = match &mut service.state {
            GcState::Scanning { done, .. } => done.await.expect("scan worker died"),
            state => panic!("expected Scanning, got {state:?}"),
        };
        service.on_scan_done(res);
    }

    fn ready_set(service: &TestService) -> &ReachableSet {
        match &service.state {
            GcState::Ready { set, .. } => set,
            state => panic!("expected Ready, got {state:?}"),
        }
    }

    /// Syncs and drives the service into `Ready` at height 10 with
    /// `interval = 10`, `history = 3`.
    async fn ready_service() -> (TestService, MockStore, MockNode, MockChain) {
        let chain = chain_with_heights(5..=10);
        let (mut service, store, node) = service(config(10, 3), chain.clone());
        service.on_chain_synced();
        service.on_top_changed(TopChanged::key(10));
        assert_matches!(service.state, GcState::Scanning { base: 7, top: 10, .. });
        finish_scan(&mut service).await;
        (service, store, node, chain)
    }

    #[tokio::test]
    async fn happy_path_scans_the_window() {
        let (service, _, _, _) = ready_service().await;

        assert_matches!(service.state, GcState::Ready { base: 7, last_height: 10, .. });
        let set = ready_set(&service);
        // shared node, four roots, four leaves for heights 7..=10
        assert_eq!(set.len(), 9);
        for height in 7..=10 {
            assert!(set.contains(&node_hash(1000 + height)));
            assert!(set.contains(&node_hash(100 + height)));
        }
        assert!(set.contains(&node_hash(1)));
        // heights below the base are not walked
        assert!(!set.contains(&node_hash(1005)));
    }

    #[tokio::test]
    async fn micro_blocks_are_ignored_in_ready() {
        let (mut service, _, _, _) = ready_service().await;
        let before = ready_set(&service).len();

        service.on_top_changed(TopChanged::micro(11));

        assert_matches!(service.state, GcState::Ready { last_height: 10, .. });
        assert_eq!(ready_set(&service).len(), before);
    }

    #[tokio::test]
    async fn fork_reemit_at_same_height_is_a_single_delta() {
        let (mut service, _, _, chain) = ready_service().await;
        let before = ready_set(&service).len();
        chain.reset_visits();

        service.on_top_changed(TopChanged::key(10));

        assert_matches!(service.state, GcState::Ready { last_height: 10, .. });
        assert_eq!(ready_set(&service).len(), before);
        // the whole trie is cut off at its already-captured root
        assert_eq!(chain.visits(), 1);
    }

    #[tokio::test]
    async fn key_tops_extend_the_window() {
        let (mut service, _, _, chain) = ready_service().await;
        chain.insert_node(node_hash(111), b"leaf", &[]);
        chain.insert_node(node_hash(1011), b"root", &[node_hash(1), node_hash(111)]);
        chain.commit(11, node_hash(1011));
        chain.insert_node(node_hash(112), b"leaf", &[]);
        chain.insert_node(node_hash(1012), b"root", &[node_hash(1), node_hash(112)]);
        chain.commit(12, node_hash(1012));

        service.on_top_changed(TopChanged::key(12));

        assert_matches!(service.state, GcState::Ready { last_height: 12, .. });
        let set = ready_set(&service);
        assert!(set.contains(&node_hash(1011)));
        assert!(set.contains(&node_hash(1012)));
    }

    #[tokio::test]
    async fn failed_extension_keeps_last_height_for_retry() {
        let (mut service, _, _, chain) = ready_service().await;

        // height 11 is unknown to the chain store
        service.on_top_changed(TopChanged::key(11));
        assert_matches!(service.state, GcState::Ready { last_height: 10, .. });

        // once it lands, the retry covers the whole gap
        chain.insert_node(node_hash(111), b"leaf", &[]);
        chain.insert_node(node_hash(1011), b"root", &[node_hash(1), node_hash(111)]);
        chain.commit(11, node_hash(1011));
        service.on_top_changed(TopChanged::key(11));
        assert_matches!(service.state, GcState::Ready { last_height: 11, .. });
        assert!(ready_set(&service).contains(&node_hash(1011)));
    }

    #[tokio::test]
    async fn quiesce_on_key_top_stages_and_restarts() {
        let (mut service, store, node, _) = ready_service().await;
        let staged = ready_set(&service).len() as u64;

        assert_eq!(service.on_quiesce(), QuiesceOutcome::Restarting);

        assert_matches!(service.state, GcState::Swapping);
        assert!(node.consensus_stopped());
        assert!(node.restarted());
        let rows = store.rows(StateTable::AccountStateStaging).unwrap();
        assert_eq!(rows.len() as u64, staged);
    }

    #[tokio::test]
    async fn quiesce_on_micro_top_is_a_nop() {
        let (mut service, store, node, _) = ready_service().await;
        service.on_top_changed(TopChanged::micro(11));

        assert_eq!(service.on_quiesce(), QuiesceOutcome::Nop);

        assert_matches!(service.state, GcState::Ready { .. });
        assert!(!node.restarted());
        assert!(!store.table_exists_raw(StateTable::AccountStateStaging));
    }

    #[tokio::test]
    async fn quiesce_before_ready_is_a_nop() {
        let chain = chain_with_heights(5..=10);
        let (mut service, store, node) = service(config(10, 3), chain);
        service.on_chain_synced();
        service.on_top_changed(TopChanged::key(9));

        assert_eq!(service.on_quiesce(), QuiesceOutcome::Nop);

        assert_matches!(service.state, GcState::Idle);
        assert!(!node.consensus_stopped());
        assert!(!store.table_exists_raw(StateTable::AccountStateStaging));
    }

    #[tokio::test]
    async fn failed_stage_stays_ready() {
        let (mut service, store, node, _) = ready_service().await;
        store.fail_next_commit();

        assert_eq!(service.on_quiesce(), QuiesceOutcome::Nop);

        assert_matches!(service.state, GcState::Ready { .. });
        assert!(!node.restarted());
        assert!(!store.table_exists_raw(StateTable::AccountStateStaging));
    }

    #[tokio::test]
    async fn scans_only_start_on_interval_boundaries() {
        let chain = chain_with_heights(1..=20);
        let (mut service, _, _) = service(config(10, 3), chain);
        service.on_chain_synced();

        service.on_top_changed(TopChanged::key(15));
        assert_matches!(service.state, GcState::Idle);

        service.on_top_changed(TopChanged::key(20));
        assert_matches!(service.state, GcState::Scanning { base: 17, top: 20, .. });
    }

    #[tokio::test]
    async fn never_scans_before_sync_or_when_disabled() {
        let chain = chain_with_heights(5..=10);

        let (mut svc, _, _) = service(config(10, 3), chain.clone());
        svc.on_top_changed(TopChanged::key(10));
        assert_matches!(svc.state, GcState::Idle);

        let disabled = GcConfig { enabled: false, interval: 10, history: 3 };
        let (mut service, _, _) = service(disabled, chain);
        service.on_chain_synced();
        service.on_top_changed(TopChanged::key(10));
        assert_matches!(service.state, GcState::Idle);
    }

    #[tokio::test]
    async fn failed_scan_returns_to_idle_and_retries_next_boundary() {
        let chain = chain_with_heights(8..=10);
        let (mut service, _, _) = service(config(10, 3), chain.clone());
        service.on_chain_synced();

        // base height 7 is missing, so the worker fails
        service.on_top_changed(TopChanged::key(10));
        finish_scan_expect_failure(&mut service).await;
        assert_matches!(service.state, GcState::Idle);

        // the next boundary starts over
        for height in 11..=20 {
            chain.insert_node(node_hash(100 + height), b"leaf", &[]);
            chain.insert_node(node_hash(1000 + height), b"root", &[node_hash(100 + height)]);
            chain.commit(height, node_hash(1000 + height));
        }
        service.on_top_changed(TopChanged::key(20));
        assert_matches!(service.state, GcState::Scanning { base: 17, top: 20, .. });
    }

    async fn finish_scan_expect_failure(service: &mut TestService) {
        let res = match &mut service.state {
            GcState::Scanning { done, .. } => done.await.expect("scan worker died"),
            state => panic!("expected Scanning, got {state:?}"),
        };
        assert_matches!(res, Err(ScanError::TrieUnavailable { .. }));
        service.on_scan_done(res);
    }

    #[tokio::test]
    async fn tops_during_scanning_are_dropped_until_handoff() {
        let chain = chain_with_heights(5..=12);
        let (mut service, _, _) = service(config(10, 3), chain);
        service.on_chain_synced();
        service.on_top_changed(TopChanged::key(10));

        // arrives while the worker is busy; the controller must not touch
        // the in-flight set
        service.on_top_changed(TopChanged::key(11));
        assert_matches!(service.state, GcState::Scanning { base: 7, top: 10, .. });

        finish_scan(&mut service).await;
        assert_matches!(service.state, GcState::Ready { last_height: 10, .. });

        // the first key top after the handoff closes the gap
        service.on_top_changed(TopChanged::key(12));
        assert_matches!(service.state, GcState::Ready { last_height: 12, .. });
        assert!(ready_set(&service).contains(&node_hash(1011)));
        assert!(ready_set(&service).contains(&node_hash(1012)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn end_to_end_through_the_mailbox() {
        let chain = chain_with_heights(5..=10);
        let store = MockStore::new();
        let node = MockNode::new();
        let (handle, task) =
            GcService::spawn(config(10, 3), chain, store.clone(), node.clone());
        let mut events = handle.subscribe_events();

        handle.chain_synced();
        handle.top_changed(TopChanged::key(10));

        assert_matches!(events.recv().await, Ok(GcEvent::ScanStarted { base: 7, top: 10 }));
        assert_matches!(
            events.recv().await,
            Ok(GcEvent::ScanFinished { base: 7, top: 10, nodes: 9, .. })
        );

        assert_eq!(handle.maybe_garbage_collect().await.unwrap(), QuiesceOutcome::Restarting);
        assert_matches!(events.recv().await, Ok(GcEvent::Staged { rows: 9 }));
        assert!(node.consensus_stopped());
        assert!(node.restarted());
        assert_eq!(store.rows(StateTable::AccountStateStaging).unwrap().len(), 9);

        // terminal state keeps replying nop
        assert_eq!(handle.maybe_garbage_collect().await.unwrap(), QuiesceOutcome::Nop);

        handle.stop();
        task.await.unwrap();
        assert_matches!(
            handle.maybe_garbage_collect().await,
            Err(GcError::ServiceUnavailable)
        );
    }
}
