// src/core/wire/frame.rs

use bytes::Bytes;

/// A single request or reply exchanged over the master's client connection.
///
/// One variant per row of the external-interface command table: the request
/// half carries whatever payload the command needs, the reply half is
/// either an operation id, a terminal result, or a status/ok marker.
#[derive(Debug, Clone, PartialEq)]
pub enum MasterFrame {
    // --- requests ---
    Status,
    SystemStatus,
    Compact {
        table: String,
        row: Option<String>,
        flags: u32,
    },
    CreateTable {
        name: String,
        schema: Bytes,
    },
    DropTable {
        name: String,
    },
    AlterTable {
        name: String,
        schema: Bytes,
    },
    RenameTable {
        name: String,
        new_name: String,
    },
    RegisterServer {
        proxy: Option<String>,
        listen_port: u16,
        system_stats: Bytes,
        client_timestamp_us: i64,
    },
    MoveRange {
        source: String,
        table: String,
        range_spec: Bytes,
        range_id: u64,
    },
    RelinquishAcknowledge {
        source: String,
        range_id: u64,
        table: String,
        range_spec: Bytes,
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
    Shutdown {
        recover: bool,
    },
    CreateNamespace {
        path: String,
        flags: u32,
    },
    DropNamespace {
        path: String,
        flags: u32,
    },
    RecreateIndexTables {
        table: String,
        parts_mask: u32,
    },
    FetchResult {
        operation_id: u64,
    },
    ReplayStatus {
        operation_id: u64,
        proxy: String,
        plan_generation: u64,
        error: u32,
    },
    ReplayComplete {
        operation_id: u64,
        proxy: String,
        plan_generation: u64,
        error: u32,
    },
    PhantomPrepareComplete {
        operation_id: u64,
        proxy: String,
        plan_generation: u64,
        error: u32,
    },
    PhantomCommitComplete {
        operation_id: u64,
        proxy: String,
        plan_generation: u64,
        error: u32,
    },

    // --- replies ---
    Ok,
    Error {
        code: u32,
        message: String,
    },
    OperationId {
        operation_id: u64,
    },
    Result {
        operation_id: u64,
        payload: Bytes,
    },
}

impl MasterFrame {
    /// The single-byte tag written first on the wire, used by the codec to
    /// decide how to parse the rest of the frame.
    pub(super) fn tag(&self) -> u8 {
        match self {
            MasterFrame::Status => 1,
            MasterFrame::SystemStatus => 2,
            MasterFrame::Compact { .. } => 3,
            MasterFrame::CreateTable { .. } => 4,
            MasterFrame::DropTable { .. } => 5,
            MasterFrame::AlterTable { .. } => 6,
            MasterFrame::RenameTable { .. } => 7,
            MasterFrame::RegisterServer { .. } => 8,
            MasterFrame::MoveRange { .. } => 9,
            MasterFrame::RelinquishAcknowledge { .. } => 10,
            MasterFrame::Balance { .. } => 11,
            MasterFrame::SetState { .. } => 12,
            MasterFrame::Stop { .. } => 13,
            MasterFrame::Shutdown { .. } => 14,
            MasterFrame::CreateNamespace { .. } => 15,
            MasterFrame::DropNamespace { .. } => 16,
            MasterFrame::RecreateIndexTables { .. } => 17,
            MasterFrame::FetchResult { .. } => 18,
            MasterFrame::ReplayStatus { .. } => 19,
            MasterFrame::ReplayComplete { .. } => 20,
            MasterFrame::PhantomPrepareComplete { .. } => 21,
            MasterFrame::PhantomCommitComplete { .. } => 22,
            MasterFrame::Ok => 100,
            MasterFrame::Error { .. } => 101,
            MasterFrame::OperationId { .. } => 102,
            MasterFrame::Result { .. } => 105,
        }
    }
}
