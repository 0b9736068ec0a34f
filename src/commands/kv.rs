/*!
 * Connection and string/keyspace commands
 */

use crate::client::{Client, CmdRes};
use crate::command::{AclCategory, Cmd, CmdFlags, CmdMeta};
use crate::context::Context;
use crate::impl_cmd_meta;
use crate::storage::Value;

/// PING [message]
pub struct Ping {
    meta: CmdMeta,
}

impl Ping {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("ping", -1, CmdFlags::FAST, AclCategory::FAST | AclCategory::CONNECTION),
        }
    }
}

impl Cmd for Ping {
    impl_cmd_meta!();

    fn do_initial(&self, client: &mut Client, _ctx: &Context) -> bool {
        if client.argv().len() > 2 {
            client.set_res(CmdRes::WrongNum, self.name());
            return false;
        }
        true
    }

    fn do_cmd(&self, client: &mut Client, _ctx: &Context) {
        match client.argv().get(1).cloned() {
            Some(msg) => client.append_string(&msg),
            None => client.set_res(CmdRes::Pong, ""),
        }
    }
}

/// SELECT index
pub struct Select {
    meta: CmdMeta,
}

impl Select {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("select", 2, CmdFlags::FAST, AclCategory::FAST | AclCategory::CONNECTION),
        }
    }
}

impl Cmd for Select {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let index = std::str::from_utf8(&client.argv()[1])
            .ok()
            .and_then(|s| s.parse::<i64>().ok());
        match index {
            None => client.set_res(CmdRes::InvalidInt, ""),
            Some(i) if i < 0 || i as usize >= ctx.databases() => {
                client.set_res(CmdRes::InvalidDb, "")
            }
            Some(i) => {
                client.set_current_db(i as usize);
                client.set_res(CmdRes::Ok, "");
            }
        }
    }
}

/// GET key
pub struct Get {
    meta: CmdMeta,
}

impl Get {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(
                "get",
                2,
                CmdFlags::READONLY | CmdFlags::FAST,
                AclCategory::READ | AclCategory::STRING | AclCategory::FAST,
            ),
        }
    }
}

impl Cmd for Get {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let Some(db) = ctx.db(client.current_db()) else {
            return client.set_res(CmdRes::InvalidDb, "");
        };
        match db.dict().get(client.key()) {
            Some(Value::Str(v)) => client.append_string(&v),
            // GET always answers with a bulk string
            Some(Value::Int(i)) => client.append_string(i.to_string().as_bytes()),
            Some(Value::List(_)) => client.set_res(CmdRes::WrongType, ""),
            None => client.append_null(),
        }
    }
}

/// SET key value
pub struct Set {
    meta: CmdMeta,
}

impl Set {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("set", 3, CmdFlags::WRITE, AclCategory::WRITE | AclCategory::STRING),
        }
    }
}

impl Cmd for Set {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let Some(db) = ctx.db(client.current_db()) else {
            return client.set_res(CmdRes::InvalidDb, "");
        };
        let argv = client.argv();
        db.dict().set(argv[1].clone(), Value::from_bytes(argv[2].clone()));
        client.set_res(CmdRes::Ok, "");
    }
}

/// DEL key [key ...]
pub struct Del {
    meta: CmdMeta,
}

impl Del {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("del", -2, CmdFlags::WRITE, AclCategory::WRITE | AclCategory::KEYSPACE),
        }
    }
}

impl Cmd for Del {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let Some(db) = ctx.db(client.current_db()) else {
            return client.set_res(CmdRes::InvalidDb, "");
        };
        let removed = client.argv()[1..].iter().filter(|k| db.dict().del(k)).count();
        client.append_integer(removed as i64);
    }
}

/// EXISTS key [key ...]
pub struct Exists {
    meta: CmdMeta,
}

impl Exists {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(
                "exists",
                -2,
                CmdFlags::READONLY | CmdFlags::FAST,
                AclCategory::READ | AclCategory::KEYSPACE | AclCategory::FAST,
            ),
        }
    }
}

impl Cmd for Exists {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let Some(db) = ctx.db(client.current_db()) else {
            return client.set_res(CmdRes::InvalidDb, "");
        };
        let found = client.argv()[1..].iter().filter(|k| db.dict().exists(k)).count();
        client.append_integer(found as i64);
    }
}

/// DBSIZE
pub struct DbSize {
    meta: CmdMeta,
}

impl DbSize {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(
                "dbsize",
                1,
                CmdFlags::READONLY | CmdFlags::FAST,
                AclCategory::READ | AclCategory::KEYSPACE | AclCategory::FAST,
            ),
        }
    }
}

impl Cmd for DbSize {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let size = ctx.db(client.current_db()).map(|db| db.dict().len()).unwrap_or(0);
        client.append_integer(size as i64);
    }
}
