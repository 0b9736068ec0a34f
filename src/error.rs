/*!
 * Error Types
 *
 * Every error here ends up as a reply to a single client (or a single
 * blocked waiter). The `Display` strings are what goes on the wire, so
 * several of them must match Redis/Raft client expectations exactly.
 */

use crate::client::CmdRes;
use thiserror::Error;

/// Leader-routing rejection produced by the consistency gate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The consensus module has not finished starting up
    #[error("PRAFT is not initialized")]
    NotInitialized,
    /// This node is a follower and no leader is currently known
    #[error("-CLUSTERDOWN No Raft leader")]
    NoLeader,
    /// This node is a follower; retry against the leader
    #[error("-MOVED {0}")]
    Moved(String),
}

/// Request shape problems detected before any storage access
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("{cmd} unknown subcommand for '{sub}'")]
    UnknownSubcommand { cmd: String, sub: String },
}

impl ValidationError {
    /// Typed result and content to hand to `Client::set_res`
    pub fn to_res(&self) -> (CmdRes, String) {
        match self {
            ValidationError::UnknownCommand(name) => (CmdRes::UnknownCmd, name.clone()),
            ValidationError::WrongArity(name) => (CmdRes::WrongNum, name.clone()),
            ValidationError::UnknownSubcommand { .. } => (CmdRes::ErrOther, self.to_string()),
        }
    }
}

/// Status of a storage operation other than plain success
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("key not found")]
    NotFound,
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }

    /// Typed result for replying with this error
    pub fn to_res(&self) -> (CmdRes, String) {
        match self {
            StorageError::WrongType => (CmdRes::WrongType, String::new()),
            _ => (CmdRes::ErrOther, self.to_string()),
        }
    }
}
