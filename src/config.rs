/*!
 * Server Configuration
 *
 * Parsed once from the command line at startup. Only `use-raft` can be
 * changed afterwards, through `CONFIG SET`.
 */

use crate::consensus::ConsensusState;
use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "lodestone", version, about = "Raft-aware Redis-compatible key-value server")]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = crate::DEFAULT_ADDR)]
    pub bind: SocketAddr,

    /// Number of logical databases
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u32).range(1..=1024))]
    pub databases: u32,

    /// Route reads and writes through the Raft leader
    #[arg(long)]
    pub use_raft: bool,

    /// Fixed Raft role for this node: `self` if it leads, otherwise the
    /// leader's address. Leave unset while no consensus module is attached.
    #[arg(long, value_name = "ADDR")]
    pub raft_leader: Option<String>,

    /// How often expired blocking waits are swept, in milliseconds
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["lodestone"])
    }
}

impl Config {
    /// Consensus state matching `--raft-leader`
    pub fn consensus_state(&self) -> ConsensusState {
        match self.raft_leader.as_deref() {
            None => ConsensusState::new(),
            Some("self") => ConsensusState::leader(),
            Some(addr) => ConsensusState::follower(addr),
        }
    }
}
