/*!
 * Server Context
 *
 * Everything shared between connection threads lives here: the database
 * table, the routing gate, the blocking wait registry, the client
 * mailboxes and the command table. It is built once at startup and
 * handed to every connection behind an `Arc`.
 */

use crate::blocking::{now_ms, BlockKey, BlockingWaitRegistry};
use crate::client::{Client, ClientTable, ConnId};
use crate::command::CommandTable;
use crate::commands;
use crate::config::Config;
use crate::consensus::{Consensus, ConsistencyGate};
use crate::error::ValidationError;
use crate::protocol::write_null_array;
use crate::storage::Backend;
use bytes::{Bytes, BytesMut};
use crossbeam::channel::Receiver;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct Context {
    dbs: Vec<Backend>,
    gate: ConsistencyGate,
    blocking: BlockingWaitRegistry,
    clients: ClientTable,
    commands: CommandTable,
    next_conn: AtomicU64,
}

impl Context {
    /// Context with every built-in command registered
    pub fn new(config: &Config, consensus: Arc<dyn Consensus>) -> Self {
        let mut ctx = Self::with_commands(
            config.databases as usize,
            config.use_raft,
            consensus,
            CommandTable::new(),
        );
        commands::register_all(&mut ctx.commands);
        info!(
            "{} commands registered, {} databases, raft routing {}",
            ctx.commands.len(),
            ctx.dbs.len(),
            if config.use_raft { "on" } else { "off" }
        );
        ctx
    }

    /// Context with a caller-supplied command table
    pub fn with_commands(
        databases: usize,
        use_raft: bool,
        consensus: Arc<dyn Consensus>,
        commands: CommandTable,
    ) -> Self {
        Self {
            dbs: (0..databases.max(1)).map(|_| Backend::new()).collect(),
            gate: ConsistencyGate::new(use_raft, consensus),
            blocking: BlockingWaitRegistry::new(),
            clients: ClientTable::default(),
            commands,
            next_conn: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn db(&self, index: usize) -> Option<&Backend> {
        self.dbs.get(index)
    }

    #[inline]
    pub fn databases(&self) -> usize {
        self.dbs.len()
    }

    #[inline]
    pub fn gate(&self) -> &ConsistencyGate {
        &self.gate
    }

    #[inline]
    pub fn blocking(&self) -> &BlockingWaitRegistry {
        &self.blocking
    }

    #[inline]
    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Create a client for a new connection, with its mailbox
    pub fn new_client(&self) -> (Client, Receiver<Bytes>) {
        let id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let mailbox = self.clients.register(id);
        (Client::new(id), mailbox)
    }

    /// Forget a closed connection, including any blocking waits it left
    pub fn drop_client(&self, id: ConnId) {
        self.clients.unregister(id);
        if self.blocking.remove_conn(id) {
            debug!("connection {} closed while blocked", id);
        }
    }

    /// Resolve the command named by `client`'s argv and run it
    pub fn dispatch(&self, client: &mut Client) {
        if client.argv().is_empty() {
            return;
        }

        let Some(cmd) = self.commands.get(client.cmd_name()) else {
            let name = String::from_utf8_lossy(&client.argv()[0]).into_owned();
            let (res, msg) = ValidationError::UnknownCommand(name).to_res();
            return client.set_res(res, msg);
        };
        if !cmd.check_arg(client.argv().len()) {
            let (res, msg) = ValidationError::WrongArity(cmd.name().to_string()).to_res();
            return client.set_res(res, msg);
        }
        cmd.execute(client, self);
    }

    /// Wake clients blocked on `key` in database `db`
    pub fn serve_and_unblock(&self, db: usize, key: &[u8]) -> usize {
        let Some(backend) = self.db(db) else {
            return 0;
        };
        let key = BlockKey::new(db, Bytes::copy_from_slice(key));
        self.blocking.serve_and_unblock(&key, backend.dict(), &self.clients)
    }

    /// Expire blocking waits past their deadline as of `now_ms`
    ///
    /// Each expired client gets a null array, as BLPOP does on timeout.
    pub fn sweep_expired(&self, now_ms: i64) -> usize {
        let expired = self.blocking.sweep_expired(now_ms);
        let mut out = BytesMut::new();
        write_null_array(&mut out);
        let reply = out.freeze();
        for conn in &expired {
            self.clients.send(*conn, reply.clone());
        }
        expired.len()
    }

    /// `sweep_expired` against the current wall clock
    pub fn sweep_expired_now(&self) -> usize {
        self.sweep_expired(now_ms())
    }
}
