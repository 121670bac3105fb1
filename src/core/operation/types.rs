// src/core/operation/types.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tag identifying which concrete mutation an [`Operation`] performs.
/// Dispatch elsewhere in the processor is a match on this tag rather than
/// on a trait object, per the tagged-variant re-architecture of the
/// original's ~30-subclass operation hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum OperationType {
    CreateTable,
    DropTable,
    AlterTable,
    RenameTable,
    MoveRange,
    RelinquishAcknowledge,
    RegisterServer,
    Recover,
    Balance,
    SetState,
    Compact,
    DropNamespace,
    CreateNamespace,
    GatherStatistics,
    CollectGarbage,
    Status,
    SystemStatus,
    Stop,
    RecreateIndexTables,
    ToggleTableMaintenance,
    TimedBarrier,
    WaitForServers,
    RegisterServerBlocker,
}

/// Lifecycle state of an operation. Numbered to match the canonical
/// ordering of the system this is modeled on: `Initial` is always `0`,
/// `Complete` is always `1`; type-specific intermediate states start at
/// `3` and are assigned by each operation's own state machine via
/// [`OperationState::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    Initial,
    Complete,
    Started,
    Custom(u16),
}

impl OperationState {
    pub fn code(self) -> u16 {
        match self {
            OperationState::Initial => 0,
            OperationState::Complete => 1,
            OperationState::Started => 3,
            OperationState::Custom(c) => c,
        }
    }
}

/// The three string-labelled constraint sets that drive DAG-edge
/// derivation in [`crate::core::operation::graph::OperationGraph`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencySets {
    /// No other live op may share any of these labels.
    pub exclusivities: BTreeSet<String>,
    /// This op waits until no live op holds any of these labels as an
    /// obstruction.
    pub dependencies: BTreeSet<String>,
    /// Labels this op holds while live; dependents wait on them.
    pub obstructions: BTreeSet<String>,
}

impl DependencySets {
    pub fn add_exclusivity(&mut self, label: impl Into<String>) {
        self.exclusivities.insert(label.into());
    }

    pub fn add_dependency(&mut self, label: impl Into<String>) {
        self.dependencies.insert(label.into());
    }

    pub fn add_obstruction(&mut self, label: impl Into<String>) {
        self.obstructions.insert(label.into());
    }
}

/// Type-specific request payload carried by an operation from submission
/// through to `execute`. Mirrors the request half of the wire protocol's
/// command table, minus commands that never become a graph-resident
/// operation (`FETCH_RESULT`, the `*_COMPLETE`/`REPLAY_STATUS` recovery
/// reports, which are routed directly to the recovery-step futures).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum OperationRequest {
    #[default]
    None,
    Table {
        name: String,
        schema: Option<Vec<u8>>,
        new_name: Option<String>,
    },
    RegisterServer {
        proxy: Option<String>,
        listen_port: u16,
        system_stats: Vec<u8>,
        client_timestamp_us: i64,
    },
    MoveRange {
        source: String,
        table: String,
        range_spec: Vec<u8>,
        range_id: u64,
    },
    RelinquishAcknowledge {
        source: String,
        range_id: u64,
        table: String,
        range_spec: Vec<u8>,
    },
    Balance {
        algorithm: String,
        args: Vec<String>,
    },
    SetState {
        vars: Vec<(u16, i64)>,
    },
    Stop {
        proxy: String,
        recover: bool,
    },
    Namespace {
        path: String,
        flags: u32,
    },
    Compact {
        table: String,
        row: Option<String>,
        flags: u32,
    },
    RecreateIndexTables {
        table: String,
        parts_mask: u32,
    },
    Recover {
        proxy: String,
    },
}

/// Type-specific terminal result, handed back to the client by the
/// response manager once `FETCH_RESULT` names this operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum OperationResult {
    #[default]
    None,
    OperationId(u64),
    AssignedProxy(String),
    Status {
        code: u32,
        message: String,
    },
}

/// A unit of cluster-mutating work tracked by the operation processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: u64,
    pub op_type: OperationType,
    pub state: OperationState,
    pub deps: DependencySets,
    /// Ordered list of staged sub-operation ids.
    pub sub_operations: Vec<u64>,
    pub parent: Option<u64>,
    /// Bit assigned to this op by its parent when staged as a sub-op, if any.
    pub owned_approval_bit: Option<u32>,
    /// Mask of approval bits required before this op may be garbage
    /// collected; cleared bit by bit as owners release it.
    pub remove_approval_mask: u32,
    pub remove_approvals: u32,
    pub blocked: bool,
    pub perpetual: bool,
    pub ephemeral: bool,
    pub expiration_ms: i64,
    pub error_code: u32,
    pub error_message: Option<String>,
    pub request: OperationRequest,
    pub result: OperationResult,
}

impl Operation {
    pub fn new(id: u64, op_type: OperationType) -> Self {
        Operation {
            id,
            op_type,
            state: OperationState::Initial,
            deps: DependencySets::default(),
            sub_operations: Vec::new(),
            parent: None,
            owned_approval_bit: None,
            remove_approval_mask: 0,
            remove_approvals: 0,
            blocked: false,
            perpetual: false,
            ephemeral: false,
            expiration_ms: 0,
            error_code: 0,
            error_message: None,
            request: OperationRequest::None,
            result: OperationResult::None,
        }
    }

    pub fn with_request(mut self, request: OperationRequest) -> Self {
        self.request = request;
        self
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.op_type, self.id)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, OperationState::Complete)
    }

    pub fn complete_ok(&mut self) {
        self.state = OperationState::Complete;
        self.error_code = 0;
        self.error_message = None;
    }

    pub fn complete_error(&mut self, code: u32, message: impl Into<String>) {
        self.state = OperationState::Complete;
        self.error_code = code;
        self.error_message = Some(message.into());
    }

    pub fn block(&mut self) {
        self.blocked = true;
    }

    pub fn unblock(&mut self) {
        self.blocked = false;
    }

    /// Adds one required approval bit, owned by `owner_bit`, to this op's
    /// mask. A staged sub-op typically receives exactly one bit from its
    /// parent, but the mask may accumulate bits from more than one owner —
    /// the original explicitly allows gaps for a sub-op shared by two
    /// unrelated parents.
    pub fn remove_approval_add(&mut self, owner_bit: u32) {
        self.remove_approval_mask |= owner_bit;
    }

    /// Records that `owner_bit` has approved removal. Returns `true` once
    /// every bit in the mask has been approved (OR-then-compare-equal, not
    /// a simple bit count, so a mask with gaps still requires exactly its
    /// named bits).
    pub fn approve_removal(&mut self, owner_bit: u32) -> bool {
        self.remove_approvals |= owner_bit;
        self.is_removable()
    }

    pub fn is_removable(&self) -> bool {
        self.remove_approval_mask == 0
            || (self.remove_approvals & self.remove_approval_mask) == self.remove_approval_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_approval_requires_every_named_bit() {
        let mut op = Operation::new(1, OperationType::MoveRange);
        op.remove_approval_add(0b001);
        op.remove_approval_add(0b100);
        assert!(!op.is_removable());
        op.approve_removal(0b001);
        assert!(!op.is_removable());
        assert!(op.approve_removal(0b100));
        assert!(op.is_removable());
    }

    #[test]
    fn op_with_no_mask_is_always_removable() {
        let op = Operation::new(2, OperationType::Status);
        assert!(op.is_removable());
    }
}
