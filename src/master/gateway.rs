// src/master/gateway.rs

//! Translates wire frames into operation submissions and response-manager
//! queries. One [`Gateway`] is shared (via `Arc`) by every accepted
//! connection; it owns no per-connection state.

use crate::core::balancer::BalancePlanAuthority;
use crate::core::connection_manager::{ConnectionManager, RecoveryBarrier};
use crate::core::errors::MasterError;
use crate::core::name_service::NameService;
use crate::core::operation::{Operation, OperationProcessor, OperationType};
use crate::core::operation::types::{OperationRequest, OperationResult};
use crate::core::recovery::{RecoveryPhase, RecoveryRegistry};
use crate::core::response_manager::ResponseManager;
use crate::core::wire::MasterFrame;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::warn;

pub struct Gateway {
    pub processor: Arc<OperationProcessor>,
    pub connections: Arc<ConnectionManager>,
    pub balance_authority: Arc<BalancePlanAuthority>,
    pub responses: Arc<ResponseManager>,
    pub recovery: Arc<RecoveryRegistry>,
    pub name_service: Arc<dyn NameService>,
    pub recovery_barrier: Arc<RecoveryBarrier>,
    pub shutdown_tx: broadcast::Sender<()>,
    request_timeout: Duration,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        processor: Arc<OperationProcessor>,
        connections: Arc<ConnectionManager>,
        balance_authority: Arc<BalancePlanAuthority>,
        responses: Arc<ResponseManager>,
        recovery: Arc<RecoveryRegistry>,
        name_service: Arc<dyn NameService>,
        recovery_barrier: Arc<RecoveryBarrier>,
        shutdown_tx: broadcast::Sender<()>,
        request_timeout: Duration,
    ) -> Self {
        Gateway {
            processor,
            connections,
            balance_authority,
            responses,
            recovery,
            name_service,
            recovery_barrier,
            shutdown_tx,
            request_timeout,
        }
    }

    /// Ids are allocated from the counter shared with the processor's own
    /// self-submitted operations (see `ProcessorContext::next_op_id`), so a
    /// client-submitted id and a `Stop`-staged `Recover` id never collide.
    fn alloc_op_id(&self) -> u64 {
        self.processor.alloc_op_id()
    }

    fn submit(&self, op_type: OperationType, request: OperationRequest, exclusivity: Option<String>) -> MasterFrame {
        let id = self.alloc_op_id();
        let mut op = Operation::new(id, op_type).with_request(request);
        if let Some(label) = exclusivity {
            op.deps.add_exclusivity(label);
        }
        match self.processor.submit(op) {
            Ok(id) => MasterFrame::OperationId { operation_id: id },
            Err(e) => error_frame(e),
        }
    }

    /// Handles one request frame, returning the reply frame to write back.
    /// Every mutating command becomes a graph-resident operation and
    /// returns its id immediately; the caller retrieves the terminal
    /// result later via `FetchResult`.
    pub async fn handle_frame(&self, frame: MasterFrame) -> MasterFrame {
        match frame {
            MasterFrame::Status => self.submit(OperationType::Status, OperationRequest::None, None),
            MasterFrame::SystemStatus => self.submit(OperationType::SystemStatus, OperationRequest::None, None),
            MasterFrame::Compact { table, row, flags } => self.submit(
                OperationType::Compact,
                OperationRequest::Compact { table: table.clone(), row, flags },
                Some(format!("table:{table}")),
            ),
            MasterFrame::CreateTable { name, schema } => self.submit(
                OperationType::CreateTable,
                OperationRequest::Table { name: name.clone(), schema: Some(schema.to_vec()), new_name: None },
                Some(format!("table:{name}")),
            ),
            MasterFrame::DropTable { name } => self.submit(
                OperationType::DropTable,
                OperationRequest::Table { name: name.clone(), schema: None, new_name: None },
                Some(format!("table:{name}")),
            ),
            MasterFrame::AlterTable { name, schema } => self.submit(
                OperationType::AlterTable,
                OperationRequest::Table { name: name.clone(), schema: Some(schema.to_vec()), new_name: None },
                Some(format!("table:{name}")),
            ),
            MasterFrame::RenameTable { name, new_name } => self.submit(
                OperationType::RenameTable,
                OperationRequest::Table { name: name.clone(), schema: None, new_name: Some(new_name) },
                Some(format!("table:{name}")),
            ),
            MasterFrame::RegisterServer { proxy, listen_port, system_stats, client_timestamp_us } => self.submit(
                OperationType::RegisterServer,
                OperationRequest::RegisterServer {
                    proxy,
                    listen_port,
                    system_stats: system_stats.to_vec(),
                    client_timestamp_us,
                },
                None,
            ),
            MasterFrame::MoveRange { source, table, range_spec, range_id } => self.submit(
                OperationType::MoveRange,
                OperationRequest::MoveRange { source, table: table.clone(), range_spec: range_spec.to_vec(), range_id },
                Some(format!("range:{table}:{range_id}")),
            ),
            MasterFrame::RelinquishAcknowledge { source, range_id, table, range_spec } => self.submit(
                OperationType::RelinquishAcknowledge,
                OperationRequest::RelinquishAcknowledge {
                    source,
                    range_id,
                    table: table.clone(),
                    range_spec: range_spec.to_vec(),
                },
                Some(format!("range:{table}:{range_id}")),
            ),
            MasterFrame::Balance { algorithm, args } => {
                self.submit(OperationType::Balance, OperationRequest::Balance { algorithm, args }, Some("balance".into()))
            }
            MasterFrame::SetState { vars } => {
                self.submit(OperationType::SetState, OperationRequest::SetState { vars }, None)
            }
            MasterFrame::Stop { proxy, recover } => self.submit(
                OperationType::Stop,
                OperationRequest::Stop { proxy: proxy.clone(), recover },
                Some(format!("server:{proxy}")),
            ),
            MasterFrame::Shutdown { recover } => {
                let _ = recover;
                let _ = self.shutdown_tx.send(());
                MasterFrame::Ok
            }
            MasterFrame::CreateNamespace { path, flags } => self.submit(
                OperationType::CreateNamespace,
                OperationRequest::Namespace { path: path.clone(), flags },
                Some(format!("namespace:{path}")),
            ),
            MasterFrame::DropNamespace { path, flags } => self.submit(
                OperationType::DropNamespace,
                OperationRequest::Namespace { path: path.clone(), flags },
                Some(format!("namespace:{path}")),
            ),
            MasterFrame::RecreateIndexTables { table, parts_mask } => self.submit(
                OperationType::RecreateIndexTables,
                OperationRequest::RecreateIndexTables { table: table.clone(), parts_mask },
                Some(format!("table:{table}")),
            ),
            MasterFrame::FetchResult { operation_id } => self.fetch_result(operation_id).await,
            MasterFrame::ReplayStatus { .. } => MasterFrame::Ok,
            MasterFrame::ReplayComplete { operation_id, proxy, plan_generation, error } => {
                self.report_recovery_phase(operation_id, RecoveryPhase::ReplayFragments, proxy, plan_generation, error)
            }
            MasterFrame::PhantomPrepareComplete { operation_id, proxy, plan_generation, error } => {
                self.report_recovery_phase(operation_id, RecoveryPhase::PhantomPrepare, proxy, plan_generation, error)
            }
            MasterFrame::PhantomCommitComplete { operation_id, proxy, plan_generation, error } => {
                self.report_recovery_phase(operation_id, RecoveryPhase::PhantomCommit, proxy, plan_generation, error)
            }
            // Reply variants are never sent to the master; a client that
            // does so has a protocol bug.
            MasterFrame::Ok
            | MasterFrame::Error { .. }
            | MasterFrame::OperationId { .. }
            | MasterFrame::Result { .. } => {
                MasterFrame::Error { code: MasterError::Protocol("unexpected reply frame from client".into()).code(), message: "unexpected reply frame".into() }
            }
        }
    }

    fn report_recovery_phase(
        &self,
        operation_id: u64,
        phase: RecoveryPhase,
        proxy: String,
        plan_generation: u64,
        error: u32,
    ) -> MasterFrame {
        match self.recovery.get(operation_id, phase) {
            Some(future) => {
                if error == 0 {
                    future.success(&proxy, plan_generation);
                } else {
                    future.failure(&proxy, plan_generation, error, "range server reported failure");
                }
                MasterFrame::Ok
            }
            None => {
                warn!(operation_id, proxy = %proxy, ?phase, "recovery report for unknown/expired phase future");
                MasterFrame::Ok
            }
        }
    }

    /// Submits an automatic `Balance` operation, used by the periodic
    /// load-balance background task. Returns the assigned operation id,
    /// or the submission error if one was exclusive-conflicted.
    pub fn trigger_balance(&self, algorithm: String) -> Result<u64, MasterError> {
        let id = self.alloc_op_id();
        let mut op = Operation::new(id, OperationType::Balance)
            .with_request(OperationRequest::Balance { algorithm, args: Vec::new() });
        op.deps.add_exclusivity("balance".into());
        self.processor.submit(op)
    }

    /// Submits a `Recover` operation for `proxy`, used by the background
    /// task that watches the name service's lock-release stream once a
    /// server's recovery grace period has elapsed (spec §4.3). Shares the
    /// `server:{proxy}` exclusivity label with `Stop` so the two can never
    /// run concurrently against the same server.
    pub fn trigger_recover(&self, proxy: String) -> Result<u64, MasterError> {
        let id = self.alloc_op_id();
        let mut op = Operation::new(id, OperationType::Recover)
            .with_request(OperationRequest::Recover { proxy: proxy.clone() });
        op.deps.add_exclusivity(format!("server:{proxy}"));
        self.processor.submit(op)
    }

    async fn fetch_result(&self, operation_id: u64) -> MasterFrame {
        let deadline = Instant::now() + self.request_timeout;
        match self.responses.add_delivery_info(operation_id, deadline) {
            Ok((result, error)) => result_frame(operation_id, result, error),
            Err(rx) => match tokio::time::timeout(self.request_timeout, rx).await {
                Ok(Ok((result, error))) => result_frame(operation_id, result, error),
                Ok(Err(_)) | Err(_) => MasterFrame::Error {
                    code: MasterError::Timeout(self.request_timeout).code(),
                    message: format!("result for operation {operation_id} not available within {:?}", self.request_timeout),
                },
            },
        }
    }
}

fn error_frame(e: MasterError) -> MasterFrame {
    MasterFrame::Error { code: e.code(), message: e.to_string() }
}

fn result_frame(operation_id: u64, result: OperationResult, error: Option<(u32, String)>) -> MasterFrame {
    if let Some((code, message)) = error {
        return MasterFrame::Error { code, message };
    }
    let payload = bincode::serde::encode_to_vec(&result, bincode::config::standard()).unwrap_or_default();
    MasterFrame::Result { operation_id, payload: Bytes::from(payload) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::balancer::BalancePlanAuthority;
    use crate::core::connection_manager::{ConnectionManager, DiskThreshold};
    use crate::core::metalog::MetalogWriter;
    use crate::core::name_service::InMemoryNameService;
    use crate::core::operation::ProcessorContext;
    use crate::core::reference_manager::ReferenceManager;

    fn test_gateway() -> Gateway {
        let (recover_tx, recover_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = ProcessorContext {
            connections: Arc::new(ConnectionManager::new(DiskThreshold(90.0))),
            balance_authority: Arc::new(BalancePlanAuthority::new()),
            metalog: Arc::new(
                MetalogWriter::open(std::env::temp_dir().join(format!("rangemaster-gw-test-{}", rand::random::<u64>())))
                    .unwrap(),
            ),
            name_service: Arc::new(InMemoryNameService::new()),
            responses: Arc::new(ResponseManager::new()),
            recovery: Arc::new(RecoveryRegistry::new()),
            references: Arc::new(ReferenceManager::new()),
            clock_skew_max_us: 5_000_000,
            failover_quorum_pct: 100,
            balancers: Vec::new(),
            next_op_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            recover_tx,
        };
        let connections = ctx.connections.clone();
        let balance_authority = ctx.balance_authority.clone();
        let responses = ctx.responses.clone();
        let recovery = ctx.recovery.clone();
        let name_service = ctx.name_service.clone();
        let processor = Arc::new(OperationProcessor::new(ctx, recover_rx));
        let (shutdown_tx, _) = broadcast::channel(1);
        Gateway::new(
            processor,
            connections,
            balance_authority,
            responses,
            recovery,
            name_service,
            Arc::new(RecoveryBarrier::new(Duration::from_secs(60))),
            shutdown_tx,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn status_frame_submits_and_fetch_result_round_trips() {
        let gateway = test_gateway();
        let reply = gateway.handle_frame(MasterFrame::Status).await;
        let operation_id = match reply {
            MasterFrame::OperationId { operation_id } => operation_id,
            other => panic!("expected OperationId, got {other:?}"),
        };

        gateway.processor.run_once().await;

        let fetch = gateway.handle_frame(MasterFrame::FetchResult { operation_id }).await;
        match fetch {
            MasterFrame::Result { operation_id: id, payload } => {
                assert_eq!(id, operation_id);
                let (result, _): (OperationResult, usize) =
                    bincode::serde::decode_from_slice(&payload, bincode::config::standard()).unwrap();
                assert!(matches!(result, OperationResult::Status { code: 0, .. }));
            }
            other => panic!("expected Result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn trigger_recover_submits_an_exclusive_recover_operation() {
        let gateway = test_gateway();
        let id = gateway.trigger_recover("rs1".into()).unwrap();
        let err = gateway.trigger_recover("rs1".into()).unwrap_err();
        assert!(matches!(err, MasterError::OperationInProgress(_)));
        gateway.processor.run_once().await;
        assert_eq!(gateway.processor.operation_state(id), Some(crate::core::operation::types::OperationState::Complete));
    }

    #[tokio::test]
    async fn shutdown_frame_broadcasts_without_touching_the_graph() {
        let gateway = test_gateway();
        let mut rx = gateway.shutdown_tx.subscribe();
        let reply = gateway.handle_frame(MasterFrame::Shutdown { recover: false }).await;
        assert!(matches!(reply, MasterFrame::Ok));
        assert!(rx.try_recv().is_ok());
        assert_eq!(gateway.processor.graph_size(), 0);
    }

    #[tokio::test]
    async fn reply_frame_from_client_is_a_protocol_error() {
        let gateway = test_gateway();
        let reply = gateway.handle_frame(MasterFrame::Ok).await;
        assert!(matches!(reply, MasterFrame::Error { .. }));
    }
}
