/*!
 * Leader Routing
 *
 * The command layer never takes part in consensus; it only asks the
 * consensus module who the leader is. Reads and writes are served by the
 * leader alone, followers answer with a redirect.
 */

use crate::command::CmdFlags;
use crate::error::RoutingError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Read-only view of the consensus module
pub trait Consensus: Send + Sync {
    fn is_initialized(&self) -> bool;
    fn is_leader(&self) -> bool;
    /// Address of the current leader, empty when unknown
    fn leader_address(&self) -> String;
}

/// Consensus state published by whatever drives the Raft node
///
/// Also used on its own when the server runs with a fixed role.
#[derive(Debug, Default)]
pub struct ConsensusState {
    initialized: AtomicBool,
    leader: AtomicBool,
    leader_addr: RwLock<String>,
}

impl ConsensusState {
    /// Not yet initialized: every gated command is rejected
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialized, and this node is the leader
    pub fn leader() -> Self {
        let s = Self::new();
        s.set_initialized(true);
        s.set_leader(true);
        s
    }

    /// Initialized follower; `leader_addr` may be empty when unknown
    pub fn follower(leader_addr: impl Into<String>) -> Self {
        let s = Self::new();
        s.set_initialized(true);
        s.set_leader_address(leader_addr);
        s
    }

    pub fn set_initialized(&self, v: bool) {
        self.initialized.store(v, Ordering::Release);
    }

    pub fn set_leader(&self, v: bool) {
        self.leader.store(v, Ordering::Release);
    }

    pub fn set_leader_address(&self, addr: impl Into<String>) {
        *self.leader_addr.write() = addr.into();
    }
}

impl Consensus for ConsensusState {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }

    fn leader_address(&self) -> String {
        self.leader_addr.read().clone()
    }
}

/// Admission check run before a command touches its database
pub struct ConsistencyGate {
    enabled: AtomicBool,
    consensus: Arc<dyn Consensus>,
}

impl ConsistencyGate {
    pub fn new(enabled: bool, consensus: Arc<dyn Consensus>) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            consensus,
        }
    }

    /// Whether consensus routing is switched on
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, v: bool) {
        self.enabled.store(v, Ordering::Relaxed);
    }

    pub fn consensus(&self) -> &dyn Consensus {
        self.consensus.as_ref()
    }

    /// Decide whether a command with `flags` may run on this node
    ///
    /// Only readonly and write commands are routed; everything passes
    /// while consensus routing is off.
    pub fn check(&self, flags: CmdFlags) -> Result<(), RoutingError> {
        if !self.is_enabled() || !flags.intersects(CmdFlags::READONLY | CmdFlags::WRITE) {
            return Ok(());
        }
        admit(self.consensus.as_ref())
    }
}

/// Leader check proper: initialized, then leader, else redirect
pub fn admit(consensus: &dyn Consensus) -> Result<(), RoutingError> {
    if !consensus.is_initialized() {
        return Err(RoutingError::NotInitialized);
    }
    if !consensus.is_leader() {
        let leader = consensus.leader_address();
        if leader.is_empty() {
            return Err(RoutingError::NoLeader);
        }
        return Err(RoutingError::Moved(leader));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(state: ConsensusState) -> ConsistencyGate {
        ConsistencyGate::new(true, Arc::new(state))
    }

    #[test]
    fn uninitialized_rejects() {
        let g = gate(ConsensusState::new());
        assert_eq!(g.check(CmdFlags::WRITE), Err(RoutingError::NotInitialized));
    }

    #[test]
    fn follower_redirects_or_reports_cluster_down() {
        let g = gate(ConsensusState::follower("10.0.0.5:9221"));
        assert_eq!(
            g.check(CmdFlags::READONLY),
            Err(RoutingError::Moved("10.0.0.5:9221".into()))
        );
        let g = gate(ConsensusState::follower(""));
        assert_eq!(g.check(CmdFlags::WRITE), Err(RoutingError::NoLeader));
    }

    #[test]
    fn leader_and_ungated_commands_pass() {
        assert_eq!(gate(ConsensusState::leader()).check(CmdFlags::WRITE), Ok(()));
        let g = gate(ConsensusState::new());
        assert_eq!(g.check(CmdFlags::ADMIN), Ok(()));
        g.set_enabled(false);
        assert_eq!(g.check(CmdFlags::WRITE | CmdFlags::READONLY), Ok(()));
    }
}
