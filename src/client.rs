/*!
 * Client Connection Context
 *
 * A `Client` carries everything the command pipeline needs to know about
 * one connection: its selected database, the current argument vector and
 * the reply being built. Replies for a connection that is parked on a
 * blocking command are delivered through its mailbox in the `ClientTable`.
 */

use crate::protocol::{
    write_array_len, write_bulk, write_error, write_integer, write_null, write_null_array,
    write_simple,
};
use bytes::{Bytes, BytesMut};
use crossbeam::channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;

/// Identifier of one client connection
pub type ConnId = u64;

/// Typed command result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdRes {
    Ok,
    Pong,
    SyntaxErr,
    InvalidInt,
    InvalidDb,
    WrongNum,
    UnknownCmd,
    WrongType,
    ErrOther,
}

/// Reply under construction, plus the last typed result set on it
#[derive(Debug, Default)]
pub struct Reply {
    buf: BytesMut,
    res: Option<(CmdRes, String)>,
}

impl Reply {
    /// Set a typed result and encode it
    ///
    /// For `WrongNum` and `UnknownCmd` the content is the command name;
    /// for `ErrOther` it is the full message. Messages that already start
    /// with `-` are redirect-style errors and go on the wire untouched.
    pub fn set_res(&mut self, res: CmdRes, content: impl Into<String>) {
        let content = content.into();
        let text = match res {
            CmdRes::Ok => "OK".to_string(),
            CmdRes::Pong => "PONG".to_string(),
            CmdRes::SyntaxErr => "syntax error".to_string(),
            CmdRes::InvalidInt => "value is not an integer or out of range".to_string(),
            CmdRes::InvalidDb => "DB index is out of range".to_string(),
            CmdRes::WrongNum => format!("wrong number of arguments for '{}' command", content),
            CmdRes::UnknownCmd => format!("unknown command '{}'", content),
            CmdRes::WrongType => {
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string()
            }
            CmdRes::ErrOther => content,
        };
        match res {
            CmdRes::Ok | CmdRes::Pong => write_simple(&text, &mut self.buf),
            CmdRes::WrongType => write_error(&text, &mut self.buf),
            _ => match text.strip_prefix('-') {
                Some(raw) => write_error(raw, &mut self.buf),
                None => write_error(&format!("ERR {}", text), &mut self.buf),
            },
        }
        self.res = Some((res, text));
    }

    #[inline]
    pub fn append_array_len(&mut self, n: usize) {
        write_array_len(n, &mut self.buf);
    }

    #[inline]
    pub fn append_string(&mut self, s: &[u8]) {
        write_bulk(s, &mut self.buf);
    }

    #[inline]
    pub fn append_integer(&mut self, i: i64) {
        write_integer(i, &mut self.buf);
    }

    #[inline]
    pub fn append_simple(&mut self, s: &str) {
        write_simple(s, &mut self.buf);
    }

    #[inline]
    pub fn append_null(&mut self) {
        write_null(&mut self.buf);
    }

    #[inline]
    pub fn append_null_array(&mut self) {
        write_null_array(&mut self.buf);
    }

    /// Last typed result, if any
    pub fn res(&self) -> Option<CmdRes> {
        self.res.as_ref().map(|(r, _)| *r)
    }

    /// Text of the last typed result (without RESP framing)
    pub fn message(&self) -> Option<&str> {
        self.res.as_ref().map(|(_, m)| m.as_str())
    }

    /// Hand out the encoded bytes and reset for the next command
    pub fn take(&mut self) -> Bytes {
        self.res = None;
        self.buf.split().freeze()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Per-connection state seen by commands
#[derive(Debug)]
pub struct Client {
    id: ConnId,
    db: usize,
    argv: Vec<Bytes>,
    cmd_name: String,
    sub_cmd_name: String,
    reply: Reply,
    blocked: bool,
}

impl Client {
    pub fn new(id: ConnId) -> Self {
        Self {
            id,
            db: 0,
            argv: Vec::new(),
            cmd_name: String::new(),
            sub_cmd_name: String::new(),
            reply: Reply::default(),
            blocked: false,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Load the next request
    ///
    /// The command name is matched case-insensitively, so it is stored
    /// lowercased.
    pub fn set_argv(&mut self, argv: Vec<Bytes>) {
        self.cmd_name = argv
            .first()
            .map(|n| String::from_utf8_lossy(n).to_ascii_lowercase())
            .unwrap_or_default();
        self.sub_cmd_name.clear();
        self.argv = argv;
    }

    #[inline]
    pub fn argv(&self) -> &[Bytes] {
        &self.argv
    }

    #[inline]
    pub fn cmd_name(&self) -> &str {
        &self.cmd_name
    }

    /// The requested key, i.e. the first argument after the command name
    #[inline]
    pub fn key(&self) -> &[u8] {
        self.argv.get(1).map(|k| &k[..]).unwrap_or_default()
    }

    #[inline]
    pub fn sub_cmd_name(&self) -> &str {
        &self.sub_cmd_name
    }

    pub fn set_sub_cmd_name(&mut self, name: impl Into<String>) {
        self.sub_cmd_name = name.into();
    }

    #[inline]
    pub fn current_db(&self) -> usize {
        self.db
    }

    pub fn set_current_db(&mut self, db: usize) {
        self.db = db;
    }

    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    pub fn reply_mut(&mut self) -> &mut Reply {
        &mut self.reply
    }

    #[inline]
    pub fn set_res(&mut self, res: CmdRes, content: impl Into<String>) {
        self.reply.set_res(res, content);
    }

    #[inline]
    pub fn append_array_len(&mut self, n: usize) {
        self.reply.append_array_len(n);
    }

    #[inline]
    pub fn append_string(&mut self, s: &[u8]) {
        self.reply.append_string(s);
    }

    #[inline]
    pub fn append_integer(&mut self, i: i64) {
        self.reply.append_integer(i);
    }

    #[inline]
    pub fn append_null(&mut self) {
        self.reply.append_null();
    }

    /// Take the encoded reply for writing to the socket
    pub fn take_reply(&mut self) -> Bytes {
        self.reply.take()
    }

    /// Mark the connection as waiting for a blocking-list wake-up
    pub fn set_blocked(&mut self) {
        self.blocked = true;
    }

    pub fn unblock(&mut self) {
        self.blocked = false;
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }
}

/// Mailboxes of live connections, keyed by connection id
///
/// Lets one connection's thread deliver a reply to another connection
/// without owning it.
#[derive(Default)]
pub struct ClientTable {
    mailboxes: DashMap<ConnId, Sender<Bytes>, ahash::RandomState>,
}

impl ClientTable {
    /// Open a mailbox for `id`, returning its receiving end
    pub fn register(&self, id: ConnId) -> Receiver<Bytes> {
        let (tx, rx) = unbounded();
        self.mailboxes.insert(id, tx);
        rx
    }

    pub fn unregister(&self, id: ConnId) {
        self.mailboxes.remove(&id);
    }

    #[inline]
    pub fn contains(&self, id: ConnId) -> bool {
        self.mailboxes.contains_key(&id)
    }

    /// Deliver an encoded reply; `false` if the connection is gone
    pub fn send(&self, id: ConnId, reply: Bytes) -> bool {
        match self.mailboxes.get(&id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }
}
