/*!
 * List commands, including the blocking BLPOP
 *
 * Pushes wake clients blocked on the key before replying; BLPOP either
 * pops immediately or parks the connection in the wait registry.
 */

use crate::blocking::{now_ms, BlockedConnNode};
use crate::client::{Client, CmdRes};
use crate::command::{AclCategory, Cmd, CmdFlags, CmdMeta};
use crate::context::Context;
use crate::impl_cmd_meta;
use crate::storage::ListStore;

/// LPUSH / RPUSH key element [element ...]
pub struct Push {
    meta: CmdMeta,
    front: bool,
}

impl Push {
    pub fn lpush() -> Self {
        Self::new("lpush", true)
    }

    pub fn rpush() -> Self {
        Self::new("rpush", false)
    }

    fn new(name: &str, front: bool) -> Self {
        Self {
            meta: CmdMeta::new(
                name,
                -3,
                CmdFlags::WRITE | CmdFlags::FAST,
                AclCategory::WRITE | AclCategory::LIST | AclCategory::FAST,
            ),
            front,
        }
    }
}

impl Cmd for Push {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let db_index = client.current_db();
        let Some(db) = ctx.db(db_index) else {
            return client.set_res(CmdRes::InvalidDb, "");
        };
        let key = client.argv()[1].clone();
        match db.dict().push(key.clone(), &client.argv()[2..], self.front) {
            Ok(len) => {
                client.append_integer(len as i64);
                ctx.serve_and_unblock(db_index, &key);
            }
            Err(e) => {
                let (res, msg) = e.to_res();
                client.set_res(res, msg);
            }
        }
    }
}

/// LPOP key
pub struct LPop {
    meta: CmdMeta,
}

impl LPop {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(
                "lpop",
                2,
                CmdFlags::WRITE | CmdFlags::FAST,
                AclCategory::WRITE | AclCategory::LIST | AclCategory::FAST,
            ),
        }
    }
}

impl Cmd for LPop {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let Some(db) = ctx.db(client.current_db()) else {
            return client.set_res(CmdRes::InvalidDb, "");
        };
        match db.dict().pop_front(client.key()) {
            Ok(v) => client.append_string(&v),
            Err(e) if e.is_not_found() => client.append_null(),
            Err(e) => {
                let (res, msg) = e.to_res();
                client.set_res(res, msg);
            }
        }
    }
}

/// LLEN key
pub struct LLen {
    meta: CmdMeta,
}

impl LLen {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(
                "llen",
                2,
                CmdFlags::READONLY | CmdFlags::FAST,
                AclCategory::READ | AclCategory::LIST | AclCategory::FAST,
            ),
        }
    }
}

impl Cmd for LLen {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let Some(db) = ctx.db(client.current_db()) else {
            return client.set_res(CmdRes::InvalidDb, "");
        };
        match db.dict().list_len(client.key()) {
            Ok(n) => client.append_integer(n as i64),
            Err(e) => {
                let (res, msg) = e.to_res();
                client.set_res(res, msg);
            }
        }
    }
}

/// BLPOP key [key ...] timeout
///
/// The timeout is in seconds and may be fractional; 0 waits forever.
pub struct BLPop {
    meta: CmdMeta,
}

impl BLPop {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(
                "blpop",
                -3,
                CmdFlags::WRITE,
                AclCategory::WRITE | AclCategory::LIST | AclCategory::SLOW | AclCategory::BLOCKING,
            ),
        }
    }
}

/// Parse a BLPOP timeout into an absolute deadline (0 = none)
fn parse_deadline(arg: &[u8], now_ms: i64) -> Result<i64, &'static str> {
    let secs = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| s.is_finite())
        .ok_or("timeout is not a float or out of range")?;
    if secs < 0.0 {
        return Err("timeout is negative");
    }
    if secs == 0.0 {
        return Ok(0);
    }
    // sub-millisecond timeouts still expire
    let ms = ((secs * 1000.0).ceil() as i64).max(1);
    Ok(now_ms.saturating_add(ms))
}

impl Cmd for BLPop {
    impl_cmd_meta!();

    fn do_initial(&self, client: &mut Client, _ctx: &Context) -> bool {
        let timeout = &client.argv()[client.argv().len() - 1];
        if let Err(msg) = parse_deadline(timeout, 0) {
            client.set_res(CmdRes::ErrOther, msg);
            return false;
        }
        true
    }

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let db_index = client.current_db();
        let Some(db) = ctx.db(db_index) else {
            return client.set_res(CmdRes::InvalidDb, "");
        };
        let argc = client.argv().len();
        let deadline = match parse_deadline(&client.argv()[argc - 1], now_ms()) {
            Ok(d) => d,
            Err(msg) => return client.set_res(CmdRes::ErrOther, msg),
        };

        let node = BlockedConnNode::new(client.id(), deadline);
        let keys = &client.argv()[1..argc - 1];
        match ctx.blocking().try_pop_or_block(db_index, keys, db.dict(), node) {
            Ok(Some((key, value))) => {
                client.append_array_len(2);
                client.append_string(&key);
                client.append_string(&value);
            }
            // the reply arrives later through the connection's mailbox
            Ok(None) => client.set_blocked(),
            Err(e) => {
                let (res, msg) = e.to_res();
                client.set_res(res, msg);
            }
        }
    }
}
