// src/core/operation/labels.rs

//! Canonical dependency/exclusivity/obstruction label constants, reproduced
//! from the `Dependency` namespace of the system this processor is modeled
//! on rather than left to ad-hoc string literals scattered through
//! operation constructors.

/// Every operation depends on this until the processor has finished
/// replaying the metalog at startup.
pub const INIT: &str = "INIT";

/// Held as an obstruction by any operation that must run before any op
/// touching range servers may proceed.
pub const SERVERS: &str = "SERVERS";

/// Obstruction held while the root metadata range is unavailable.
pub const ROOT: &str = "ROOT";

/// Obstruction held while any metadata range is unavailable.
pub const METADATA: &str = "METADATA";

/// Obstruction held while system tables are not fully online.
pub const SYSTEM: &str = "SYSTEM";

/// Obstruction that blocks operations touching a table while its recovery
/// blocker is live.
pub const RECOVERY_BLOCKER: &str = "RECOVERY_BLOCKER";

/// Dependency shared by every step of a recovery operation chain.
pub const RECOVERY: &str = "RECOVERY";

/// Per-server recovery label, parameterized by proxy name, used both as the
/// obstruction a `RegisterServer` unblocks and the dependency a recovering
/// operation waits on.
pub fn recover_server(proxy: &str) -> String {
    format!("RECOVER_SERVER {proxy}")
}

/// Label a blocked operation waits on until the named server has
/// (re)registered.
pub fn register_server_blocker(proxy: &str) -> String {
    format!("RegisterServerBlocker {proxy}")
}

/// Synthetic permanent obstruction a parent adds to a staged sub-operation,
/// and the matching dependency it adds to itself.
pub fn suboperation_of(parent_name: &str, child_name: &str, child_hash: u64) -> String {
    format!("{parent_name} subop {child_name} {child_hash:x}")
}
