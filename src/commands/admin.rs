/*!
 * Administrative commands
 */

use crate::client::{Client, CmdRes};
use crate::command::{AclCategory, Cmd, CmdFlags, CmdGroup, CmdMeta};
use crate::context::Context;
use crate::impl_cmd_meta;
use log::info;

/// FLUSHDB
///
/// Runs with the database lock held exclusively, so no other command on
/// the same database observes a half-cleared keyspace.
pub struct FlushDb {
    meta: CmdMeta,
}

impl FlushDb {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(
                "flushdb",
                1,
                CmdFlags::WRITE | CmdFlags::EXCLUSIVE | CmdFlags::ADMIN,
                AclCategory::WRITE | AclCategory::KEYSPACE | AclCategory::SLOW | AclCategory::DANGEROUS,
            ),
        }
    }
}

impl Cmd for FlushDb {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        if let Some(db) = ctx.db(client.current_db()) {
            db.dict().clear();
        }
        client.set_res(CmdRes::Ok, "");
    }
}

const PARAM_DATABASES: &str = "databases";
const PARAM_USE_RAFT: &str = "use-raft";

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

/// CONFIG GET parameter
pub struct ConfigGet {
    meta: CmdMeta,
}

impl Cmd for ConfigGet {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let param = String::from_utf8_lossy(&client.argv()[2]).to_ascii_lowercase();
        let value = match param.as_str() {
            PARAM_DATABASES => ctx.databases().to_string(),
            PARAM_USE_RAFT => yes_no(ctx.gate().is_enabled()).to_string(),
            _ => {
                client.append_array_len(0);
                return;
            }
        };
        client.append_array_len(2);
        client.append_string(param.as_bytes());
        client.append_string(value.as_bytes());
    }
}

/// CONFIG SET parameter value
pub struct ConfigSet {
    meta: CmdMeta,
}

impl Cmd for ConfigSet {
    impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        let param = String::from_utf8_lossy(&client.argv()[2]).to_ascii_lowercase();
        let value = String::from_utf8_lossy(&client.argv()[3]).to_ascii_lowercase();
        match (param.as_str(), value.as_str()) {
            (PARAM_USE_RAFT, "yes") | (PARAM_USE_RAFT, "no") => {
                let enabled = value == "yes";
                ctx.gate().set_enabled(enabled);
                info!("raft routing switched {}", if enabled { "on" } else { "off" });
                client.set_res(CmdRes::Ok, "");
            }
            (PARAM_USE_RAFT, _) => client.set_res(
                CmdRes::ErrOther,
                format!("Invalid argument '{}' for CONFIG SET '{}'", value, param),
            ),
            _ => client.set_res(
                CmdRes::ErrOther,
                format!("Unsupported CONFIG parameter: {}", param),
            ),
        }
    }
}

/// The CONFIG group with its GET and SET sub-commands
pub fn config_group() -> CmdGroup {
    let mut group = CmdGroup::new("config", CmdFlags::ADMIN);
    group.meta_mut().add_acl_category(AclCategory::ADMIN | AclCategory::SLOW | AclCategory::DANGEROUS);
    group.add_sub_cmd(Box::new(ConfigGet {
        meta: CmdMeta::new("get", 3, CmdFlags::ADMIN, AclCategory::ADMIN | AclCategory::SLOW),
    }));
    group.add_sub_cmd(Box::new(ConfigSet {
        meta: CmdMeta::new("set", 4, CmdFlags::ADMIN, AclCategory::ADMIN | AclCategory::SLOW),
    }));
    group
}
