/*!
 * Lodestone Server Entry Point
 *
 * Parses the command line, builds the shared context and runs the
 * connection loop until the listener fails.
 */

use anyhow::*;
use clap::Parser;
use lodestone::{net, Config, Consensus, Context};
use std::sync::Arc;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    // Respects RUST_LOG, e.g. RUST_LOG=debug cargo run --release
    env_logger::init();

    let config = Config::parse();
    if config.use_raft && config.raft_leader.is_none() {
        log::warn!("raft routing is on but no leader is configured; reads and writes will be refused");
    }

    let consensus: Arc<dyn Consensus> = Arc::new(config.consensus_state());
    let ctx = Arc::new(Context::new(&config, consensus));

    println!("lodestone running on {}", config.bind);
    net::run(&config, ctx)
}
