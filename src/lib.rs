// Core modules for the lodestone command engine
pub mod protocol; // RESP framing + reply encoders
pub mod error; // Routing / validation / storage errors
pub mod storage; // Dict + per-database lock
pub mod client; // Client context, typed replies, mailboxes
pub mod consensus; // Leader routing gate
pub mod command; // Cmd trait, CmdGroup, command table, execute pipeline
pub mod blocking; // Blocking wait registry + wake protocol
pub mod commands; // Built-in command set
pub mod config; // CLI configuration
pub mod context; // Shared server state + dispatcher
pub mod net; // Listener, connection threads, expiry sweeper

// Re-export the main types for easier access
pub use blocking::{BlockKey, BlockedConnNode, BlockingWaitRegistry};
pub use client::{Client, ClientTable, CmdRes, ConnId};
pub use command::{AclCategory, Cmd, CmdFlags, CmdGroup, CmdMeta, CommandTable};
pub use config::Config;
pub use consensus::{Consensus, ConsensusState, ConsistencyGate};
pub use context::Context;
pub use error::{RoutingError, StorageError, ValidationError};
pub use storage::{Backend, Dict, ListStore, Value};

// Default server address
pub const DEFAULT_ADDR: &str = "0.0.0.0:9221";
