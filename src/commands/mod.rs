/*!
 * Built-in commands
 */

pub mod admin;
pub mod kv;
pub mod list;

use crate::command::CommandTable;

/// Register every built-in command into `table`
pub fn register_all(table: &mut CommandTable) {
    table.register(Box::new(kv::Ping::new()));
    table.register(Box::new(kv::Select::new()));
    table.register(Box::new(kv::Get::new()));
    table.register(Box::new(kv::Set::new()));
    table.register(Box::new(kv::Del::new()));
    table.register(Box::new(kv::Exists::new()));
    table.register(Box::new(kv::DbSize::new()));

    table.register(Box::new(list::Push::lpush()));
    table.register(Box::new(list::Push::rpush()));
    table.register(Box::new(list::LPop::new()));
    table.register(Box::new(list::LLen::new()));
    table.register(Box::new(list::BLPop::new()));

    table.register(Box::new(admin::FlushDb::new()));
    table.register(Box::new(admin::config_group()));
}
