// src/core/operation/processor.rs

//! The worker-pool scheduler that drives the operation graph: computes
//! levels, executes each level's runnable vertices concurrently, and
//! applies the resulting state transition back into the graph under the
//! same mutex discipline as the rest of the coordination core — never
//! held across an `.await`.

use super::graph::OperationGraph;
use super::types::{Operation, OperationRequest, OperationResult, OperationState, OperationType};
use crate::core::balancer::{BalancePlanAuthority, LoadBalancer, RangeInfo};
use crate::core::connection_manager::ConnectionManager;
use crate::core::errors::{MasterError, MasterResult};
use crate::core::metalog::{MetalogWriter, encode_operation};
use crate::core::metrics::{OPERATIONS_COMPLETED_TOTAL, OPERATION_EXECUTE_SECONDS, OPERATION_GRAPH_SIZE};
use crate::core::name_service::NameService;
use crate::core::recovery::{RecoveryPhase, RecoveryRegistry};
use crate::core::reference_manager::ReferenceManager;
use crate::core::response_manager::ResponseManager;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// The collaborators an operation's `execute` step may need. Cloned into
/// an `Arc` once at startup and shared by every worker task.
pub struct ProcessorContext {
    pub connections: Arc<ConnectionManager>,
    pub balance_authority: Arc<BalancePlanAuthority>,
    pub metalog: Arc<MetalogWriter>,
    pub name_service: Arc<dyn NameService>,
    pub responses: Arc<ResponseManager>,
    pub recovery: Arc<RecoveryRegistry>,
    pub references: Arc<ReferenceManager>,
    pub clock_skew_max_us: i64,
    /// Percentage of currently *registered* range servers that must be
    /// live for a `Recover` operation to proceed; the absolute count is
    /// recomputed on every call since the registered-server count changes
    /// as servers join and leave.
    pub failover_quorum_pct: u32,
    pub balancers: Vec<Box<dyn LoadBalancer + Send + Sync>>,
    /// Shared with [`crate::master::Gateway`] so ids allocated by a client
    /// submission and ids allocated by an operation that stages its own
    /// follow-up (`Stop { recover: true }` staging a `Recover`) never
    /// collide.
    pub next_op_id: Arc<AtomicU64>,
    /// Lets a dispatched operation submit a brand-new graph-resident
    /// operation without reaching back into the graph it's executing
    /// under. Drained by [`OperationProcessor::run_once`].
    pub recover_tx: mpsc::UnboundedSender<Operation>,
}

fn recovery_quorum(registered: usize, pct: u32) -> usize {
    ((registered * pct as usize) + 99) / 100
}

/// What a dispatched operation's handler asks the processor to do next.
enum Outcome {
    Complete(OperationResult),
    CompleteError(u32, String),
    /// Stay at `Initial`/`Started`, blocked on a label not yet satisfied.
    Block,
    /// Retry after the standard failure pause.
    Retry(String),
}

/// Wraps the shared [`OperationGraph`] and runs the level-by-level
/// execution cycle described in the design notes: topological levels,
/// concurrent execution within a level, retire-on-complete with metalog
/// persistence, perpetual re-injection.
pub struct OperationProcessor {
    graph: Arc<Mutex<OperationGraph>>,
    ctx: Arc<ProcessorContext>,
    recover_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Operation>>,
}

const FAILURE_PAUSE: Duration = Duration::from_secs(5);

impl OperationProcessor {
    /// `recover_rx` is the receiving half of `ctx.recover_tx`, wired by the
    /// caller so the two always share the same channel.
    pub fn new(ctx: ProcessorContext, recover_rx: mpsc::UnboundedReceiver<Operation>) -> Self {
        OperationProcessor {
            graph: Arc::new(Mutex::new(OperationGraph::new())),
            ctx: Arc::new(ctx),
            recover_rx: tokio::sync::Mutex::new(recover_rx),
        }
    }

    /// Allocates an id from the counter shared with `Gateway`, so an
    /// operation that stages its own follow-up never collides with a
    /// client-submitted one.
    pub fn alloc_op_id(&self) -> u64 {
        self.ctx.next_op_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Pulls every operation a dispatched handler queued via
    /// `ctx.recover_tx` (currently just self-triggered `Recover` ops from
    /// `Stop { recover: true }`) into the graph.
    async fn drain_self_submitted(&self) {
        let mut rx = self.recover_rx.lock().await;
        while let Ok(op) = rx.try_recv() {
            let label = op.label();
            if let Err(e) = self.submit(op) {
                debug!(error = %e, op = %label, "self-submitted operation rejected");
            }
        }
    }

    /// Re-inserts operations recovered from the metalog, in their
    /// persisted order, without re-running them.
    pub fn restore(&self, ops: Vec<Operation>) {
        let mut graph = self.graph.lock();
        for op in ops {
            let _ = graph.add_operation(op);
        }
        OPERATION_GRAPH_SIZE.set(graph.len() as f64);
    }

    /// Submits a freshly constructed operation, persists its initial state,
    /// and returns its id. Rejects with `MASTER_OPERATION_IN_PROGRESS` if an
    /// in-flight op already holds one of its exclusivity labels.
    pub fn submit(&self, op: Operation) -> MasterResult<u64> {
        let id = op.id;
        let entity = encode_operation(&op)?;
        let mut graph = self.graph.lock();
        let added = graph.add_operation(op)?;
        OPERATION_GRAPH_SIZE.set(graph.len() as f64);
        drop(graph);
        self.ctx.metalog.record_state(&[entity])?;
        Ok(added.max(id))
    }

    pub fn graph_size(&self) -> usize {
        self.graph.lock().len()
    }

    /// Graphviz dump of the live operation DAG, for operational debugging.
    pub fn dump_dot(&self) -> String {
        self.graph.lock().dump_dot()
    }

    /// One line per live operation describing its type, state, and labels.
    pub fn state_description(&self) -> String {
        self.graph.lock().state_description()
    }

    /// Number of operations in the lowest pending level that aren't
    /// currently blocked by an exclusivity conflict. Metrics only.
    pub fn runnable_count(&self) -> usize {
        let graph = self.graph.lock();
        match graph.compute_levels().into_iter().next() {
            Some(level) => level.iter().filter(|id| !graph.is_blocked(**id)).count(),
            None => 0,
        }
    }

    pub fn operation_state(&self, id: u64) -> Option<OperationState> {
        self.graph.lock().get(id).map(|o| o.state)
    }

    pub fn operation_result(&self, id: u64) -> Option<(OperationResult, u32, Option<String>)> {
        self.graph
            .lock()
            .get(id)
            .map(|o| (o.result.clone(), o.error_code, o.error_message.clone()))
    }

    /// Runs levels until the graph has no more runnable work, then
    /// returns. Used both by the perpetual background loop and directly
    /// by tests that want a deterministic drain.
    pub async fn run_once(&self) -> bool {
        self.drain_self_submitted().await;
        let mut did_work = false;
        // Operations that came back Retry during this call: excluded from
        // re-selection for the rest of this call so a stuck precondition
        // (e.g. an unmet recovery quorum) can't busy-loop the executor;
        // `run`'s 200ms idle sleep provides the actual backoff between calls.
        let mut retried_this_pass: HashSet<u64> = HashSet::new();
        loop {
            let levels = self.graph.lock().compute_levels();
            let mut advanced = false;
            for level in levels {
                let runnable: Vec<Operation> = {
                    let mut graph = self.graph.lock();
                    level
                        .iter()
                        .filter(|id| !graph.is_blocked(**id) && !retried_this_pass.contains(id))
                        .filter_map(|id| {
                            let op = graph.get(*id).cloned();
                            if op.is_some() {
                                graph.mark_in_flight(*id);
                            }
                            op
                        })
                        .collect()
                };
                if runnable.is_empty() {
                    continue;
                }
                advanced = true;
                did_work = true;

                let mut joinset = JoinSet::new();
                for op in runnable {
                    let ctx = self.ctx.clone();
                    joinset.spawn(async move {
                        let id = op.id;
                        let timer = Instant::now();
                        let outcome = dispatch(&ctx, &op).await;
                        OPERATION_EXECUTE_SECONDS.observe(timer.elapsed().as_secs_f64());
                        (id, outcome)
                    });
                }

                while let Some(joined) = joinset.join_next().await {
                    let (id, outcome) = match joined {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "operation task panicked");
                            continue;
                        }
                    };
                    if matches!(outcome, Outcome::Retry(_)) {
                        retried_this_pass.insert(id);
                    }
                    self.apply_outcome(id, outcome).await;
                }
            }
            if !advanced {
                break;
            }
        }
        did_work
    }

    async fn apply_outcome(&self, id: u64, outcome: Outcome) {
        let mut unblock_labels: Vec<String> = Vec::new();
        let mut retired: Option<Operation> = None;

        {
            let mut graph = self.graph.lock();
            graph.clear_in_flight(id);
            match outcome {
                Outcome::Complete(result) => {
                    if let Some(op) = graph.get_mut(id) {
                        op.result = result;
                        op.complete_ok();
                        unblock_labels.extend(op.deps.obstructions.iter().cloned());
                    }
                    OPERATIONS_COMPLETED_TOTAL.with_label_values(&["ok"]).inc();
                }
                Outcome::CompleteError(code, message) => {
                    if let Some(op) = graph.get_mut(id) {
                        unblock_labels.extend(op.deps.obstructions.iter().cloned());
                        op.complete_error(code, message);
                    }
                    OPERATIONS_COMPLETED_TOTAL.with_label_values(&["error"]).inc();
                }
                Outcome::Block => {
                    if let Some(op) = graph.get_mut(id) {
                        op.block();
                    }
                }
                Outcome::Retry(reason) => {
                    warn!(operation_id = id, reason = %reason, "operation execute failed, pausing before retry");
                }
            }

            for label in &unblock_labels {
                graph.unblock(label);
            }

            if let Some(op) = graph.get(id) {
                if op.is_complete() {
                    if let Some(parent_id) = op.parent {
                        if let Some(bit) = op.owned_approval_bit {
                            if let Some(parent) = graph.get_mut(parent_id) {
                                parent.approve_removal(bit);
                            }
                        }
                    }
                    retired = graph.retire(id, &self.ctx.references);
                }
            }
            OPERATION_GRAPH_SIZE.set(graph.len() as f64);
        }

        if let Some(op) = retired {
            if let Ok(entity) = encode_operation(&op) {
                if let Err(e) = self.ctx.metalog.record_removal(&[entity]) {
                    error!(operation_id = id, error = %e, "failed to record operation removal");
                }
            }
            let expires_at = Instant::now() + Duration::from_secs(3600);
            self.ctx.responses.add_operation(
                op.id,
                op.result.clone(),
                if op.error_code != 0 {
                    Some((op.error_code, op.error_message.clone().unwrap_or_default()))
                } else {
                    None
                },
                expires_at,
                op.ephemeral,
            );
        }
    }

    /// Background driver: runs cycles until told to shut down, pausing
    /// briefly between otherwise-idle passes.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("operation processor shutting down");
                    return;
                }
                did_work = self.run_once() => {
                    if !did_work {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        }
    }
}

/// Dispatches one operation's execute step. Matches on the tagged variant
/// rather than a trait object, per the flattened re-architecture of the
/// original's subclass hierarchy.
async fn dispatch(ctx: &Arc<ProcessorContext>, op: &Operation) -> Outcome {
    let result = match op.op_type {
        OperationType::RegisterServer => register_server(ctx, op).await,
        OperationType::MoveRange => move_range(ctx, op).await,
        OperationType::RelinquishAcknowledge => relinquish_acknowledge(ctx, op).await,
        OperationType::Balance => balance(ctx, op).await,
        OperationType::Recover => recover(ctx, op).await,
        OperationType::Status | OperationType::SystemStatus => status(ctx).await,
        OperationType::Stop => stop(ctx, op).await,
        OperationType::SetState => set_state(op).await,
        OperationType::TimedBarrier | OperationType::WaitForServers | OperationType::RegisterServerBlocker => {
            Ok(Outcome::Block)
        }
        OperationType::CreateTable
        | OperationType::DropTable
        | OperationType::AlterTable
        | OperationType::RenameTable
        | OperationType::CreateNamespace
        | OperationType::DropNamespace
        | OperationType::RecreateIndexTables
        | OperationType::ToggleTableMaintenance
        | OperationType::CollectGarbage
        | OperationType::GatherStatistics
        | OperationType::Compact => generic_metadata_op(op).await,
    };

    match result {
        Ok(outcome) => outcome,
        Err(MasterError::InducedFailure) => Outcome::Retry("induced failure".into()),
        // Clock skew is a terminal rejection, not a transient condition: the
        // server's clock isn't going to drift back into tolerance on its
        // own, so registration completes with an error the server can fetch
        // rather than being retried forever.
        Err(e @ MasterError::ClockSkewExceeded { .. }) => Outcome::CompleteError(e.code(), e.to_string()),
        Err(e) => Outcome::Retry(e.to_string()),
    }
}

async fn register_server(ctx: &Arc<ProcessorContext>, op: &Operation) -> MasterResult<Outcome> {
    let (requested_proxy, listen_port, client_timestamp_us) = match &op.request {
        OperationRequest::RegisterServer { proxy, listen_port, client_timestamp_us, .. } => {
            (proxy.clone(), *listen_port, *client_timestamp_us)
        }
        _ => return Ok(Outcome::CompleteError(1, "malformed RegisterServer request".into())),
    };

    let hostname = format!("host-{listen_port}");
    let public_addr = format!("0.0.0.0:{listen_port}");

    let proxy = match requested_proxy {
        Some(p) => p,
        None => ctx
            .connections
            .lookup_by_hostname(&hostname)
            .or_else(|| ctx.connections.lookup_by_public_addr(&public_addr))
            .unwrap_or_default(),
    };

    let proxy = if proxy.is_empty() {
        let minted = ctx.name_service.increment_attribute("/master", "next_proxy_id").await?;
        format!("rs{minted}")
    } else {
        proxy
    };

    let received_ts_us = chrono::Utc::now().timestamp_micros();
    let comm_fetch_duration_us = 0i64;
    let skew = (received_ts_us - client_timestamp_us).abs() - comm_fetch_duration_us;
    if skew > ctx.clock_skew_max_us {
        return Err(MasterError::ClockSkewExceeded {
            proxy,
            skew_us: skew,
            max_us: ctx.clock_skew_max_us,
        });
    }

    ctx.connections.add_server_if_absent(&proxy);
    ctx.connections.connect_server(&proxy, &hostname, &public_addr, &public_addr);

    Ok(Outcome::Complete(OperationResult::AssignedProxy(proxy)))
}

fn extra_unblock_labels(op: &Operation) -> Vec<String> {
    op.deps.obstructions.iter().cloned().collect()
}

async fn move_range(ctx: &Arc<ProcessorContext>, op: &Operation) -> MasterResult<Outcome> {
    let (table, range_id) = match &op.request {
        OperationRequest::MoveRange { table, range_id, .. } => (table.clone(), *range_id),
        _ => return Ok(Outcome::CompleteError(1, "malformed MoveRange request".into())),
    };
    let generation = ctx.balance_authority.current_generation();
    let completed = ctx
        .balance_authority
        .wait_for_complete(generation, &table, &range_id.to_string(), Duration::from_secs(30))
        .await;
    if completed {
        Ok(Outcome::Complete(OperationResult::Status { code: 0, message: "move acknowledged".into() }))
    } else {
        Ok(Outcome::Block)
    }
}

async fn relinquish_acknowledge(ctx: &Arc<ProcessorContext>, op: &Operation) -> MasterResult<Outcome> {
    let (table, range_id, source) = match &op.request {
        OperationRequest::RelinquishAcknowledge { table, range_id, source, .. } => {
            (table.clone(), *range_id, source.clone())
        }
        _ => return Ok(Outcome::CompleteError(1, "malformed RelinquishAcknowledge request".into())),
    };
    let generation = ctx.balance_authority.current_generation();
    ctx.balance_authority.move_complete(generation, &table, &range_id.to_string(), None);
    ctx.connections.mark_balanced(&source, true);
    Ok(Outcome::Complete(OperationResult::Status { code: 0, message: "relinquish acknowledged".into() }))
}

async fn balance(ctx: &Arc<ProcessorContext>, op: &Operation) -> MasterResult<Outcome> {
    let (algorithm, sources) = match &op.request {
        OperationRequest::Balance { algorithm, args } => (algorithm.clone(), args.clone()),
        _ => (String::new(), Vec::new()),
    };
    let balancer = ctx
        .balancers
        .iter()
        .find(|b| b.name().eq_ignore_ascii_case(&algorithm))
        .or_else(|| ctx.balancers.first());
    let balancer = match balancer {
        Some(b) => b,
        None => return Ok(Outcome::CompleteError(2, "no load balancer algorithms configured".into())),
    };

    let live_servers = ctx.connections.live_server_names();
    let ranges: Vec<RangeInfo> = Vec::new(); // scanned from the metadata table by an external collaborator
    let disk_threshold = ctx.connections.disk_threshold_pct();
    let generation = ctx.balance_authority.next_generation();
    let plan = balancer.compute_plan(
        generation,
        &ranges,
        &live_servers,
        &sources,
        &|proxy: &str| ctx.connections.record(proxy).map(|r| r.disk_fill_pct < disk_threshold).unwrap_or(false),
    );
    let move_count = plan.moves.len();
    ctx.balance_authority.register_plan(plan);
    Ok(Outcome::Complete(OperationResult::Status {
        code: 0,
        message: format!("{move_count} moves planned"),
    }))
}

async fn recover(ctx: &Arc<ProcessorContext>, op: &Operation) -> MasterResult<Outcome> {
    let proxy = match &op.request {
        OperationRequest::Recover { proxy } => proxy.clone(),
        _ => return Ok(Outcome::CompleteError(1, "malformed Recover request".into())),
    };

    let live = ctx.connections.live_count();
    let quorum = recovery_quorum(ctx.connections.registered_count(), ctx.failover_quorum_pct);
    if live < quorum {
        return Err(MasterError::RecoveryQuorumNotMet { available: live, quorum });
    }

    ctx.connections.set_recovering(&proxy, true);
    let generation = ctx.balance_authority.current_generation();
    let expected: HashSet<String> = ctx.connections.live_server_names().into_iter().collect();

    for phase in [RecoveryPhase::ReplayFragments, RecoveryPhase::PhantomPrepare, RecoveryPhase::PhantomCommit] {
        let future = ctx.recovery.create(op.id, phase, generation, expected.clone());
        tokio::select! {
            _ = future.wait() => {}
            _ = tokio::time::sleep(Duration::from_secs(60)) => {
                ctx.recovery.remove(op.id, phase);
                ctx.connections.set_recovering(&proxy, false);
                return Ok(Outcome::CompleteError(3, format!("recovery phase {phase:?} timed out")));
            }
        }
        let failures = future.failures();
        ctx.recovery.remove(op.id, phase);
        if !failures.is_empty() {
            ctx.connections.set_recovering(&proxy, false);
            return Ok(Outcome::CompleteError(4, format!("recovery phase {phase:?} failed: {failures:?}")));
        }
    }

    ctx.connections.set_recovering(&proxy, false);
    Ok(Outcome::Complete(OperationResult::Status { code: 0, message: format!("{proxy} recovered") }))
}

async fn status(ctx: &Arc<ProcessorContext>) -> MasterResult<Outcome> {
    let live = ctx.connections.live_count();
    let registered = ctx.connections.registered_count();
    Ok(Outcome::Complete(OperationResult::Status {
        code: 0,
        message: format!("{live}/{registered} range servers connected"),
    }))
}

async fn stop(ctx: &Arc<ProcessorContext>, op: &Operation) -> MasterResult<Outcome> {
    let (proxy, recover_after) = match &op.request {
        OperationRequest::Stop { proxy, recover } => (proxy.clone(), *recover),
        _ => return Ok(Outcome::CompleteError(1, "malformed Stop request".into())),
    };
    ctx.connections.mark_removed(&proxy, Instant::now());
    if recover_after {
        ctx.connections.set_recovering(&proxy, true);
        let recover_id = ctx.next_op_id.fetch_add(1, Ordering::SeqCst);
        let mut recover_op = Operation::new(recover_id, OperationType::Recover)
            .with_request(OperationRequest::Recover { proxy: proxy.clone() });
        recover_op.deps.add_exclusivity(format!("server:{proxy}"));
        if ctx.recover_tx.send(recover_op).is_err() {
            warn!(proxy = %proxy, "failed to queue recovery operation: processor channel closed");
        }
    }
    Ok(Outcome::Complete(OperationResult::Status { code: 0, message: format!("{proxy} stopped") }))
}

async fn set_state(op: &Operation) -> MasterResult<Outcome> {
    let count = match &op.request {
        OperationRequest::SetState { vars } => vars.len(),
        _ => 0,
    };
    Ok(Outcome::Complete(OperationResult::Status { code: 0, message: format!("{count} vars applied") }))
}

/// Table/namespace/compaction/garbage-collection operations whose actual
/// cell-store mutation is performed by an out-of-scope collaborator; here
/// they simply advance through the standard `INITIAL -> STARTED ->
/// COMPLETE` lifecycle and are durably recorded at each step.
async fn generic_metadata_op(op: &Operation) -> MasterResult<Outcome> {
    let _ = extra_unblock_labels(op);
    Ok(Outcome::Complete(OperationResult::Status { code: 0, message: format!("{} complete", op.label()) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::name_service::InMemoryNameService;

    fn test_ctx() -> (ProcessorContext, mpsc::UnboundedReceiver<Operation>) {
        let (recover_tx, recover_rx) = mpsc::unbounded_channel();
        let ctx = ProcessorContext {
            connections: Arc::new(ConnectionManager::new(crate::core::connection_manager::DiskThreshold(90.0))),
            balance_authority: Arc::new(BalancePlanAuthority::new()),
            metalog: Arc::new(MetalogWriter::open(std::env::temp_dir().join(format!("rangemaster-test-{}", rand::random::<u64>()))).unwrap()),
            name_service: Arc::new(InMemoryNameService::new()),
            responses: Arc::new(ResponseManager::new()),
            recovery: Arc::new(RecoveryRegistry::new()),
            references: Arc::new(ReferenceManager::new()),
            clock_skew_max_us: 5_000_000,
            failover_quorum_pct: 100,
            balancers: Vec::new(),
            next_op_id: Arc::new(AtomicU64::new(1000)),
            recover_tx,
        };
        (ctx, recover_rx)
    }

    #[tokio::test]
    async fn register_server_mints_a_proxy_name_and_connects() {
        let (ctx, recover_rx) = test_ctx();
        let processor = OperationProcessor::new(ctx, recover_rx);
        let mut op = Operation::new(1, OperationType::RegisterServer);
        op.request = OperationRequest::RegisterServer {
            proxy: None,
            listen_port: 9876,
            system_stats: Vec::new(),
            client_timestamp_us: chrono::Utc::now().timestamp_micros(),
        };
        processor.submit(op).unwrap();
        processor.run_once().await;
        let (result, _, _) = processor.operation_result(1).unwrap();
        assert!(matches!(result, OperationResult::AssignedProxy(p) if p.starts_with("rs")));
    }

    #[tokio::test]
    async fn clock_skew_over_ceiling_completes_with_error_instead_of_retrying_forever() {
        let (ctx, recover_rx) = test_ctx();
        let processor = OperationProcessor::new(ctx, recover_rx);
        let mut op = Operation::new(1, OperationType::RegisterServer);
        op.request = OperationRequest::RegisterServer {
            proxy: Some("rs1".into()),
            listen_port: 9876,
            system_stats: Vec::new(),
            client_timestamp_us: 0,
        };
        processor.submit(op).unwrap();
        processor.run_once().await;
        assert_eq!(processor.operation_state(1), Some(OperationState::Complete));
        let (_, code, message) = processor.operation_result(1).unwrap();
        assert_eq!(code, MasterError::ClockSkewExceeded {
            proxy: "rs1".into(),
            skew_us: 0,
            max_us: 0,
        }.code());
        assert!(message.unwrap().contains("skew"));
    }

    #[tokio::test]
    async fn recover_blocks_when_live_servers_fall_below_quorum() {
        let (ctx, _recover_rx) = test_ctx();
        let ctx = Arc::new(ctx);
        ctx.connections.add_server("rs1");
        ctx.connections.add_server("rs2");
        // Neither server is connected: live_count() stays 0 while
        // registered_count() is 2, so a 100% quorum can never be met.
        let mut op = Operation::new(1, OperationType::Recover);
        op.request = OperationRequest::Recover { proxy: "rs1".into() };
        let err = recover(&ctx, &op).await.unwrap_err();
        assert!(matches!(err, MasterError::RecoveryQuorumNotMet { available: 0, quorum: 2 }));
    }

    #[tokio::test]
    async fn stop_with_recover_queues_a_recover_operation() {
        let (ctx, mut recover_rx) = test_ctx();
        let ctx = Arc::new(ctx);
        ctx.connections.add_server("rs1");
        let mut op = Operation::new(1, OperationType::Stop);
        op.request = OperationRequest::Stop { proxy: "rs1".into(), recover: true };
        let outcome = stop(&ctx, &op).await.unwrap();
        assert!(matches!(outcome, Outcome::Complete(_)));
        assert!(ctx.connections.record("rs1").unwrap().flags.contains(crate::core::connection_manager::ServerFlags::RECOVERING));
        let queued = recover_rx.try_recv().unwrap();
        assert_eq!(queued.op_type, OperationType::Recover);
        assert!(matches!(queued.request, OperationRequest::Recover { ref proxy } if proxy == "rs1"));
    }

    #[tokio::test]
    async fn stop_without_recover_does_not_queue_anything() {
        let (ctx, mut recover_rx) = test_ctx();
        let ctx = Arc::new(ctx);
        let mut op = Operation::new(1, OperationType::Stop);
        op.request = OperationRequest::Stop { proxy: "rs1".into(), recover: false };
        stop(&ctx, &op).await.unwrap();
        assert!(recover_rx.try_recv().is_err());
    }
}
