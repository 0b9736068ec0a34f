/*!
 * Command Model and Execution Pipeline
 *
 * Every command carries its name, arity, behaviour flags and ACL
 * categories, and runs through the same pipeline: leader routing, then
 * the database lock, then command-specific validation, then the body.
 */

use crate::client::{Client, CmdRes};
use crate::context::Context;
use crate::error::ValidationError;
use bitflags::bitflags;
use hashbrown::HashMap;
use log::debug;
use smol_str::SmolStr;
use std::sync::atomic::{AtomicU32, Ordering};

bitflags! {
    /// Behaviour flags consulted by the routing gate and the database lock
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CmdFlags: u32 {
        /// The command modifies the dataset
        const WRITE     = 1 << 0;
        /// The command only reads data
        const READONLY  = 1 << 1;
        /// Runs with no other command active on the same database
        const EXCLUSIVE = 1 << 2;
        /// Administrative command
        const ADMIN     = 1 << 3;
        /// Constant or log time
        const FAST      = 1 << 4;
    }
}

bitflags! {
    /// Access-control categories
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AclCategory: u32 {
        const KEYSPACE   = 1 << 0;
        const READ       = 1 << 1;
        const WRITE      = 1 << 2;
        const STRING     = 1 << 3;
        const LIST       = 1 << 4;
        const ADMIN      = 1 << 5;
        const FAST       = 1 << 6;
        const SLOW       = 1 << 7;
        const BLOCKING   = 1 << 8;
        const CONNECTION = 1 << 9;
        const DANGEROUS  = 1 << 10;
    }
}

static NEXT_CMD_ID: AtomicU32 = AtomicU32::new(0);

/// Identity and shape of a command
#[derive(Debug, Clone)]
pub struct CmdMeta {
    name: SmolStr,
    id: u32,
    arity: i16,
    flags: CmdFlags,
    acl: AclCategory,
}

impl CmdMeta {
    /// Arity counts the command name itself. A positive arity is an exact
    /// argument count; zero or negative means at least `-arity`.
    pub fn new(name: &str, arity: i16, flags: CmdFlags, acl: AclCategory) -> Self {
        Self {
            name: SmolStr::new(name.to_ascii_lowercase()),
            id: NEXT_CMD_ID.fetch_add(1, Ordering::Relaxed),
            arity,
            flags,
            acl,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn arity(&self) -> i16 {
        self.arity
    }

    #[inline]
    pub fn check_arg(&self, num: usize) -> bool {
        if self.arity > 0 {
            return num == self.arity as usize;
        }
        num >= (-(self.arity as i32)) as usize
    }

    #[inline]
    pub fn flags(&self) -> CmdFlags {
        self.flags
    }

    #[inline]
    pub fn has_flag(&self, flag: CmdFlags) -> bool {
        self.flags.intersects(flag)
    }

    pub fn set_flag(&mut self, flag: CmdFlags) {
        self.flags.insert(flag);
    }

    pub fn reset_flag(&mut self, flag: CmdFlags) {
        self.flags.remove(flag);
    }

    #[inline]
    pub fn acl_category(&self) -> AclCategory {
        self.acl
    }

    pub fn add_acl_category(&mut self, acl: AclCategory) {
        self.acl.insert(acl);
    }
}

/// Implements `meta`/`meta_mut` for a command struct with a `meta` field
#[macro_export]
macro_rules! impl_cmd_meta {
    () => {
        fn meta(&self) -> &$crate::command::CmdMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut $crate::command::CmdMeta {
            &mut self.meta
        }
    };
}

/// A command that can be executed against a client
pub trait Cmd: Send + Sync {
    fn meta(&self) -> &CmdMeta;
    fn meta_mut(&mut self) -> &mut CmdMeta;

    /// Command-specific validation, run under the database lock
    ///
    /// Returning `false` means a reply has already been set and the body
    /// must not run.
    fn do_initial(&self, _client: &mut Client, _ctx: &Context) -> bool {
        true
    }

    fn do_cmd(&self, client: &mut Client, ctx: &Context);

    fn has_sub_command(&self) -> bool {
        false
    }

    fn get_sub_cmd(&self, _name: &str) -> Option<&dyn Cmd> {
        None
    }

    #[inline]
    fn name(&self) -> &str {
        self.meta().name()
    }

    #[inline]
    fn check_arg(&self, num: usize) -> bool {
        self.meta().check_arg(num)
    }

    #[inline]
    fn has_flag(&self, flag: CmdFlags) -> bool {
        self.meta().has_flag(flag)
    }

    /// Run the full pipeline for this command
    ///
    /// Routing rejections are answered before any lock is taken. The
    /// database lock guard lives until the end of this call.
    fn execute(&self, client: &mut Client, ctx: &Context) {
        debug!("execute command: {}", client.cmd_name());

        if let Err(e) = ctx.gate().check(self.meta().flags()) {
            return client.set_res(CmdRes::ErrOther, e.to_string());
        }

        let Some(db) = ctx.db(client.current_db()) else {
            return client.set_res(CmdRes::InvalidDb, "");
        };
        let _guard = if self.has_flag(CmdFlags::EXCLUSIVE) {
            db.lock_exclusive()
        } else {
            db.lock_shared()
        };

        if !self.do_initial(client, ctx) {
            return;
        }
        self.do_cmd(client, ctx);
    }
}

/// A command whose behaviour is picked by its first argument
///
/// `CONFIG GET ...` and `CONFIG SET ...` are two sub-commands owned by the
/// `config` group.
pub struct CmdGroup {
    meta: CmdMeta,
    sub_cmds: HashMap<SmolStr, Box<dyn Cmd>>,
}

impl CmdGroup {
    /// A group requires at least the sub-command name
    pub fn new(name: &str, flags: CmdFlags) -> Self {
        Self::with_arity(name, -2, flags)
    }

    pub fn with_arity(name: &str, arity: i16, flags: CmdFlags) -> Self {
        Self {
            meta: CmdMeta::new(name, arity, flags, AclCategory::empty()),
            sub_cmds: HashMap::new(),
        }
    }

    /// Take ownership of `cmd`, replacing any sub-command with the same name
    pub fn add_sub_cmd(&mut self, cmd: Box<dyn Cmd>) {
        self.sub_cmds.insert(SmolStr::new(cmd.name()), cmd);
    }

    fn lookup(&self, name: &str) -> Option<&dyn Cmd> {
        self.sub_cmds.get(name.to_ascii_lowercase().as_str()).map(|c| c.as_ref())
    }
}

impl Cmd for CmdGroup {
    impl_cmd_meta!();

    fn do_initial(&self, client: &mut Client, ctx: &Context) -> bool {
        let Some(sub_name) = client.argv().get(1) else {
            let (res, msg) = ValidationError::WrongArity(self.name().to_string()).to_res();
            client.set_res(res, msg);
            return false;
        };
        let sub_name = String::from_utf8_lossy(sub_name).into_owned();
        client.set_sub_cmd_name(sub_name.as_str());

        let Some(sub) = self.lookup(&sub_name) else {
            let cmd = String::from_utf8_lossy(&client.argv()[0]).into_owned();
            let (res, msg) = ValidationError::UnknownSubcommand { cmd, sub: sub_name }.to_res();
            client.set_res(res, msg);
            return false;
        };

        if !sub.check_arg(client.argv().len()) {
            let name = format!("{}|{}", self.name(), sub.name());
            let (res, msg) = ValidationError::WrongArity(name).to_res();
            client.set_res(res, msg);
            return false;
        }
        sub.do_initial(client, ctx)
    }

    fn do_cmd(&self, client: &mut Client, ctx: &Context) {
        // do_initial has already resolved the name
        if let Some(sub) = self.lookup(client.sub_cmd_name()) {
            sub.do_cmd(client, ctx);
        }
    }

    fn has_sub_command(&self) -> bool {
        true
    }

    fn get_sub_cmd(&self, name: &str) -> Option<&dyn Cmd> {
        self.lookup(name)
    }
}

/// All registered commands, keyed by lowercase name
#[derive(Default)]
pub struct CommandTable {
    cmds: HashMap<SmolStr, Box<dyn Cmd>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cmd`, replacing any command with the same name
    pub fn register(&mut self, cmd: Box<dyn Cmd>) {
        self.cmds.insert(SmolStr::new(cmd.name()), cmd);
    }

    /// Look a command up by (case-insensitive) name
    pub fn get(&self, name: &str) -> Option<&dyn Cmd> {
        match self.cmds.get(name) {
            Some(c) => Some(c.as_ref()),
            None => self.cmds.get(name.to_ascii_lowercase().as_str()).map(|c| c.as_ref()),
        }
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_arity() {
        let m = CmdMeta::new("get", 2, CmdFlags::READONLY, AclCategory::READ);
        assert!(m.check_arg(2));
        assert!(!m.check_arg(1));
        assert!(!m.check_arg(3));
    }

    #[test]
    fn minimum_arity() {
        let m = CmdMeta::new("del", -2, CmdFlags::WRITE, AclCategory::WRITE);
        assert!(!m.check_arg(1));
        assert!(m.check_arg(2));
        assert!(m.check_arg(100));

        let m = CmdMeta::new("any", 0, CmdFlags::empty(), AclCategory::empty());
        assert!(m.check_arg(0));
        assert!(m.check_arg(5));
    }

    #[test]
    fn check_arg_matches_definition_for_all_small_arities() {
        for arity in -8i16..=8 {
            let m = CmdMeta::new("x", arity, CmdFlags::empty(), AclCategory::empty());
            for num in 0usize..12 {
                let expected = if arity > 0 {
                    num == arity as usize
                } else {
                    num as i64 >= -(arity as i64)
                };
                assert_eq!(m.check_arg(num), expected, "arity {} num {}", arity, num);
            }
        }
    }

    #[test]
    fn flags_and_acl() {
        let mut m = CmdMeta::new("Flush", 1, CmdFlags::WRITE, AclCategory::KEYSPACE);
        assert_eq!(m.name(), "flush");
        assert!(m.has_flag(CmdFlags::WRITE));
        assert!(!m.has_flag(CmdFlags::EXCLUSIVE));
        m.set_flag(CmdFlags::EXCLUSIVE);
        assert!(m.has_flag(CmdFlags::EXCLUSIVE));
        m.reset_flag(CmdFlags::WRITE);
        assert!(!m.has_flag(CmdFlags::WRITE));
        m.add_acl_category(AclCategory::DANGEROUS);
        assert_eq!(m.acl_category(), AclCategory::KEYSPACE | AclCategory::DANGEROUS);
    }

    #[test]
    fn ids_are_distinct() {
        let a = CmdMeta::new("a", 1, CmdFlags::empty(), AclCategory::empty());
        let b = CmdMeta::new("b", 1, CmdFlags::empty(), AclCategory::empty());
        assert_ne!(a.id(), b.id());
    }
}
