/*!
 * Blocking List Waits
 *
 * Clients running BLPOP on empty lists are queued per (database, key).
 * When a producer pushes to a key, the queued clients are served oldest
 * first straight from the list. The registry only stores connection ids;
 * replies travel through the `ClientTable` mailboxes.
 */

use crate::client::{ClientTable, ConnId, Reply};
use crate::error::StorageError;
use crate::storage::ListStore;
use bytes::Bytes;
use hashbrown::HashMap;
use log::debug;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A key in a specific database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub db: usize,
    pub key: Bytes,
}

impl BlockKey {
    pub fn new(db: usize, key: impl Into<Bytes>) -> Self {
        Self { db, key: key.into() }
    }
}

/// One waiting connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockedConnNode {
    conn: ConnId,
    /// Absolute deadline in ms, 0 = wait forever
    expire_time_ms: i64,
}

impl BlockedConnNode {
    pub fn new(conn: ConnId, expire_time_ms: i64) -> Self {
        Self { conn, expire_time_ms }
    }

    #[inline]
    pub fn conn(&self) -> ConnId {
        self.conn
    }

    #[inline]
    pub fn expire_time_ms(&self) -> i64 {
        self.expire_time_ms
    }

    #[inline]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expire_time_ms != 0 && self.expire_time_ms <= now_ms
    }
}

#[derive(Default)]
struct WaitState {
    key_to_conns: HashMap<BlockKey, VecDeque<BlockedConnNode>>,
    /// Reverse index so a client blocked on several keys is dequeued everywhere
    conn_to_keys: FxHashMap<ConnId, Vec<BlockKey>>,
}

impl WaitState {
    /// Queue `node` on `key`; a connection is queued at most once per key
    fn enqueue(&mut self, key: BlockKey, node: BlockedConnNode) {
        let keys = self.conn_to_keys.entry(node.conn).or_default();
        if keys.contains(&key) {
            return;
        }
        keys.push(key.clone());
        self.key_to_conns.entry(key).or_default().push_back(node);
    }

    /// Drop every queue entry of `conn`, returning whether it had any
    fn forget_conn(&mut self, conn: ConnId) -> bool {
        let Some(keys) = self.conn_to_keys.remove(&conn) else {
            return false;
        };
        for key in keys {
            if let Some(queue) = self.key_to_conns.get_mut(&key) {
                queue.retain(|n| n.conn != conn);
                if queue.is_empty() {
                    self.key_to_conns.remove(&key);
                }
            }
        }
        true
    }
}

/// Process-wide table of clients waiting for list data
///
/// Guarded by its own reader/writer lock, separate from the database
/// locks. Lookups share it, any change to a queue takes it exclusively.
#[derive(Default)]
pub struct BlockingWaitRegistry {
    state: RwLock<WaitState>,
}

impl BlockingWaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `node` behind everything already waiting on `key`
    pub fn block(&self, key: BlockKey, node: BlockedConnNode) {
        self.state.write().enqueue(key, node);
    }

    /// Pop from the first non-empty key, or queue the client on all of them
    ///
    /// Both happen under the registry's exclusive lock, so a producer
    /// that pushes after the emptiness check is guaranteed to find the
    /// client already queued.
    ///
    /// # Returns
    /// * `Ok(Some((key, value)))` - data was available
    /// * `Ok(None)` - the client is now queued on every key
    /// * `Err(e)` - a key holds a non-list value or storage failed
    pub fn try_pop_or_block(
        &self,
        db: usize,
        keys: &[Bytes],
        store: &dyn ListStore,
        node: BlockedConnNode,
    ) -> Result<Option<(Bytes, Bytes)>, StorageError> {
        let mut state = self.state.write();
        for key in keys {
            match store.pop_front(key) {
                Ok(v) => return Ok(Some((key.clone(), v))),
                Err(StorageError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        for key in keys {
            state.enqueue(BlockKey::new(db, key.clone()), node);
        }
        Ok(None)
    }

    /// Whether anyone is waiting on `key`
    pub fn has_waiters(&self, key: &BlockKey) -> bool {
        self.state.read().key_to_conns.contains_key(key)
    }

    /// Connections waiting on `key`, oldest first
    pub fn waiters(&self, key: &BlockKey) -> Vec<ConnId> {
        self.state
            .read()
            .key_to_conns
            .get(key)
            .map(|q| q.iter().map(|n| n.conn).collect())
            .unwrap_or_default()
    }

    /// Number of keys with at least one waiter
    pub fn len(&self) -> usize {
        self.state.read().key_to_conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand freshly pushed data on `key` to its waiters
    ///
    /// Waiters are served oldest first, one element each, until the list
    /// runs dry; whoever is left stays queued. A storage error other than
    /// not-found is reported to the waiter it happened for, and serving
    /// moves on to the next one.
    ///
    /// # Returns
    /// * Number of waiters removed from the queue
    pub fn serve_and_unblock(
        &self,
        key: &BlockKey,
        store: &dyn ListStore,
        clients: &ClientTable,
    ) -> usize {
        // Nobody waiting is by far the common case: stay on the shared lock
        if !self.has_waiters(key) {
            return 0;
        }

        let mut state = self.state.write();
        let Some(queue) = state.key_to_conns.get_mut(key) else {
            return 0;
        };

        let mut served: Vec<ConnId> = Vec::new();
        while let Some(node) = queue.front().copied() {
            let conn = node.conn;
            if served.contains(&conn) {
                queue.pop_front();
                continue;
            }
            if !clients.contains(conn) {
                // Connection went away without cleaning up; don't pop data for it
                queue.pop_front();
                served.push(conn);
                continue;
            }

            let mut reply = Reply::default();
            match store.pop_front(&key.key) {
                Ok(v) => {
                    reply.append_array_len(2);
                    reply.append_string(&key.key);
                    reply.append_string(&v);
                }
                Err(StorageError::NotFound) => break,
                Err(e) => {
                    let (res, msg) = e.to_res();
                    reply.set_res(res, msg);
                }
            }
            clients.send(conn, reply.take());
            // erasing the head moves the cursor to the next waiter
            queue.pop_front();
            served.push(conn);
        }

        if queue.is_empty() {
            state.key_to_conns.remove(key);
        }
        for conn in &served {
            state.forget_conn(*conn);
        }
        debug!("served {} blocked client(s) on db {}", served.len(), key.db);
        served.len()
    }

    /// Remove every queue entry of a connection, e.g. on disconnect
    pub fn remove_conn(&self, conn: ConnId) -> bool {
        // Skip the exclusive lock for connections that never blocked
        if !self.state.read().conn_to_keys.contains_key(&conn) {
            return false;
        }
        self.state.write().forget_conn(conn)
    }

    /// Remove all waiters whose deadline is at or before `now_ms`
    ///
    /// Nothing expires on its own; the caller decides when to sweep and
    /// what to tell the expired connections.
    ///
    /// # Returns
    /// * Ids of the expired connections, each listed once
    pub fn sweep_expired(&self, now_ms: i64) -> Vec<ConnId> {
        let mut state = self.state.write();
        let mut expired: Vec<ConnId> = state
            .key_to_conns
            .values()
            .flat_map(|q| q.iter())
            .filter(|n| n.is_expired(now_ms))
            .map(|n| n.conn)
            .collect();
        expired.sort_unstable();
        expired.dedup();
        for conn in &expired {
            state.forget_conn(*conn);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Dict;
    use crossbeam::channel::Receiver;
    use parking_lot::Mutex;

    fn key(k: &'static [u8]) -> BlockKey {
        BlockKey::new(0, Bytes::from_static(k))
    }

    fn push(d: &Dict, k: &'static [u8], vals: &[&'static [u8]]) {
        let vals: Vec<Bytes> = vals.iter().map(|v| Bytes::from_static(v)).collect();
        d.push(Bytes::from_static(k), &vals, false).unwrap();
    }

    fn pair(k: &str, v: &str) -> Bytes {
        Bytes::from(format!("*2\r\n${}\r\n{}\r\n${}\r\n{}\r\n", k.len(), k, v.len(), v))
    }

    fn enqueue_waiters(
        table: &ClientTable,
        reg: &BlockingWaitRegistry,
        n: u64,
    ) -> Vec<Receiver<Bytes>> {
        (1..=n)
            .map(|id| {
                let rx = table.register(id);
                reg.block(key(b"K"), BlockedConnNode::new(id, 0));
                rx
            })
            .collect()
    }

    #[test]
    fn fifo_service() {
        let (reg, table, dict) = (BlockingWaitRegistry::new(), ClientTable::default(), Dict::default());
        let rx = enqueue_waiters(&table, &reg, 3);
        push(&dict, b"K", &[b"a", b"b", b"c"]);

        assert_eq!(reg.serve_and_unblock(&key(b"K"), &dict, &table), 3);
        assert_eq!(rx[0].try_recv().unwrap(), pair("K", "a"));
        assert_eq!(rx[1].try_recv().unwrap(), pair("K", "b"));
        assert_eq!(rx[2].try_recv().unwrap(), pair("K", "c"));
        assert!(!reg.has_waiters(&key(b"K")));
        assert!(reg.is_empty());
    }

    #[test]
    fn stops_when_list_runs_dry() {
        let (reg, table, dict) = (BlockingWaitRegistry::new(), ClientTable::default(), Dict::default());
        let rx = enqueue_waiters(&table, &reg, 2);
        push(&dict, b"K", &[b"a"]);

        assert_eq!(reg.serve_and_unblock(&key(b"K"), &dict, &table), 1);
        assert_eq!(rx[0].try_recv().unwrap(), pair("K", "a"));
        assert!(rx[1].try_recv().is_err());
        assert_eq!(reg.waiters(&key(b"K")), vec![2]);
    }

    struct Flaky {
        results: Mutex<VecDeque<Result<Bytes, StorageError>>>,
    }

    impl ListStore for Flaky {
        fn pop_front(&self, _key: &[u8]) -> Result<Bytes, StorageError> {
            self.results.lock().pop_front().unwrap_or(Err(StorageError::NotFound))
        }
    }

    #[test]
    fn storage_error_goes_to_one_waiter_only() {
        let (reg, table) = (BlockingWaitRegistry::new(), ClientTable::default());
        let rx = enqueue_waiters(&table, &reg, 3);
        let store = Flaky {
            results: Mutex::new(VecDeque::from(vec![
                Err(StorageError::Other("IO error: disk".into())),
                Ok(Bytes::from_static(b"x")),
            ])),
        };

        assert_eq!(reg.serve_and_unblock(&key(b"K"), &store, &table), 2);
        assert_eq!(rx[0].try_recv().unwrap(), Bytes::from_static(b"-ERR IO error: disk\r\n"));
        assert_eq!(rx[1].try_recv().unwrap(), pair("K", "x"));
        assert_eq!(reg.waiters(&key(b"K")), vec![3]);
    }

    #[test]
    fn departed_waiter_is_dropped_without_popping() {
        let (reg, table, dict) = (BlockingWaitRegistry::new(), ClientTable::default(), Dict::default());
        let rx = enqueue_waiters(&table, &reg, 2);
        table.unregister(1);
        push(&dict, b"K", &[b"a"]);

        assert_eq!(reg.serve_and_unblock(&key(b"K"), &dict, &table), 2);
        assert_eq!(rx[1].try_recv().unwrap(), pair("K", "a"));
        assert!(reg.is_empty());
    }

    #[test]
    fn no_waiters_stays_on_shared_lock() {
        let (reg, table, dict) = (BlockingWaitRegistry::new(), ClientTable::default(), Dict::default());
        push(&dict, b"K", &[b"a"]);
        // a write lock attempt would deadlock against this guard
        let _held = reg.state.read();
        assert_eq!(reg.serve_and_unblock(&key(b"K"), &dict, &table), 0);
        assert_eq!(dict.list_len(b"K"), Ok(1));
    }

    #[test]
    fn repeated_key_queues_once() {
        let (reg, table, dict) = (BlockingWaitRegistry::new(), ClientTable::default(), Dict::default());
        let rx = table.register(1);
        let keys = [Bytes::from_static(b"K"), Bytes::from_static(b"K")];
        assert!(reg.try_pop_or_block(0, &keys, &dict, BlockedConnNode::new(1, 0)).unwrap().is_none());
        assert_eq!(reg.waiters(&key(b"K")), vec![1]);

        push(&dict, b"K", &[b"a", b"b"]);
        assert_eq!(reg.serve_and_unblock(&key(b"K"), &dict, &table), 1);
        assert_eq!(rx.try_recv().unwrap(), pair("K", "a"));
        assert!(rx.try_recv().is_err());
        assert_eq!(dict.list_len(b"K"), Ok(1));
    }

    #[test]
    fn multi_key_waiter_is_served_once() {
        let (reg, table, dict) = (BlockingWaitRegistry::new(), ClientTable::default(), Dict::default());
        let rx = table.register(1);
        let keys = [Bytes::from_static(b"A"), Bytes::from_static(b"B")];
        let got = reg.try_pop_or_block(0, &keys, &dict, BlockedConnNode::new(1, 0)).unwrap();
        assert!(got.is_none());
        assert_eq!(reg.len(), 2);

        push(&dict, b"B", &[b"v"]);
        assert_eq!(reg.serve_and_unblock(&key(b"B"), &dict, &table), 1);
        assert_eq!(rx.try_recv().unwrap(), pair("B", "v"));
        assert!(reg.is_empty());
    }

    #[test]
    fn try_pop_prefers_available_data() {
        let (reg, dict) = (BlockingWaitRegistry::new(), Dict::default());
        push(&dict, b"B", &[b"v"]);
        let keys = [Bytes::from_static(b"A"), Bytes::from_static(b"B")];
        let got = reg.try_pop_or_block(0, &keys, &dict, BlockedConnNode::new(1, 0)).unwrap();
        assert_eq!(got, Some((Bytes::from_static(b"B"), Bytes::from_static(b"v"))));
        assert!(reg.is_empty());
    }

    #[test]
    fn sweep_and_disconnect() {
        let reg = BlockingWaitRegistry::new();
        reg.block(key(b"K"), BlockedConnNode::new(1, 1_000));
        reg.block(key(b"K"), BlockedConnNode::new(2, 0));
        reg.block(key(b"K"), BlockedConnNode::new(3, 5_000));
        reg.block(key(b"J"), BlockedConnNode::new(3, 5_000));

        assert!(reg.sweep_expired(999).is_empty());
        assert_eq!(reg.sweep_expired(1_000), vec![1]);
        assert_eq!(reg.waiters(&key(b"K")), vec![2, 3]);
        assert_eq!(reg.sweep_expired(i64::MAX), vec![3]);
        assert!(!reg.has_waiters(&key(b"J")));

        assert!(reg.remove_conn(2));
        assert!(!reg.remove_conn(2));
        assert!(reg.is_empty());
    }

    #[test]
    fn expiry_predicate() {
        assert!(!BlockedConnNode::new(1, 0).is_expired(i64::MAX));
        assert!(BlockedConnNode::new(1, 10).is_expired(10));
        assert!(!BlockedConnNode::new(1, 10).is_expired(9));
    }
}
