use bytes::Bytes;
use lodestone::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Tracker {
    shared: AtomicUsize,
    exclusive: AtomicUsize,
    violations: AtomicUsize,
    runs: AtomicUsize,
}

/// Records how many commands are inside their body at the same time
struct LockProbe {
    meta: CmdMeta,
    tracker: Arc<Tracker>,
}

impl Cmd for LockProbe {
    lodestone::impl_cmd_meta!();

    fn do_cmd(&self, client: &mut Client, _ctx: &Context) {
        let t = &self.tracker;
        if self.has_flag(CmdFlags::EXCLUSIVE) {
            let inside = t.exclusive.fetch_add(1, Ordering::SeqCst) + 1;
            if inside > 1 || t.shared.load(Ordering::SeqCst) > 0 {
                t.violations.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_micros(200));
            t.exclusive.fetch_sub(1, Ordering::SeqCst);
        } else {
            t.shared.fetch_add(1, Ordering::SeqCst);
            if t.exclusive.load(Ordering::SeqCst) > 0 {
                t.violations.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_micros(50));
            t.shared.fetch_sub(1, Ordering::SeqCst);
        }
        t.runs.fetch_add(1, Ordering::SeqCst);
        client.set_res(CmdRes::Ok, "");
    }
}

struct Boom {
    meta: CmdMeta,
}

impl Cmd for Boom {
    lodestone::impl_cmd_meta!();

    fn do_cmd(&self, _client: &mut Client, _ctx: &Context) {
        panic!("command body failed");
    }
}

fn probe_ctx(tracker: &Arc<Tracker>) -> Arc<Context> {
    let mut table = CommandTable::new();
    commands::register_all(&mut table);
    table.register(Box::new(LockProbe {
        meta: CmdMeta::new("shared", 1, CmdFlags::READONLY, AclCategory::empty()),
        tracker: tracker.clone(),
    }));
    table.register(Box::new(LockProbe {
        meta: CmdMeta::new("exclusive", 1, CmdFlags::WRITE | CmdFlags::EXCLUSIVE, AclCategory::empty()),
        tracker: tracker.clone(),
    }));
    table.register(Box::new(Boom {
        meta: CmdMeta::new("boom", 1, CmdFlags::EXCLUSIVE, AclCategory::empty()),
    }));
    Arc::new(Context::with_commands(2, false, Arc::new(ConsensusState::new()), table))
}

fn run(ctx: &Context, client: &mut Client, args: &[&str]) -> Bytes {
    let argv = args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect();
    client.set_argv(argv);
    ctx.dispatch(client);
    client.take_reply()
}

#[test]
fn exclusive_commands_never_overlap() {
    let tracker = Arc::new(Tracker::default());
    let ctx = probe_ctx(&tracker);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                let (mut c, _mailbox) = ctx.new_client();
                let name = if i % 3 == 0 { "EXCLUSIVE" } else { "SHARED" };
                for _ in 0..200 {
                    assert_eq!(&run(&ctx, &mut c, &[name])[..], b"+OK\r\n");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(tracker.runs.load(Ordering::SeqCst), 8 * 200);
    assert_eq!(tracker.violations.load(Ordering::SeqCst), 0);
}

#[test]
fn panicking_command_releases_the_lock() {
    let tracker = Arc::new(Tracker::default());
    let ctx = probe_ctx(&tracker);
    let (mut c, _mailbox) = ctx.new_client();

    let res = catch_unwind(AssertUnwindSafe(|| run(&ctx, &mut c, &["BOOM"])));
    assert!(res.is_err());

    // would deadlock if the exclusive guard had leaked
    c.take_reply();
    assert_eq!(&run(&ctx, &mut c, &["EXCLUSIVE"])[..], b"+OK\r\n");
    assert_eq!(&run(&ctx, &mut c, &["SHARED"])[..], b"+OK\r\n");
}

#[test]
fn concurrent_pushes_are_all_kept() {
    let tracker = Arc::new(Tracker::default());
    let ctx = probe_ctx(&tracker);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                let (mut c, _mailbox) = ctx.new_client();
                for i in 0..250 {
                    let v = format!("{}-{}", t, i);
                    run(&ctx, &mut c, &["RPUSH", "shared-list", &v]);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let (mut c, _mailbox) = ctx.new_client();
    assert_eq!(&run(&ctx, &mut c, &["LLEN", "shared-list"])[..], b":1000\r\n");
}

#[test]
fn no_wake_up_is_lost() {
    const WAITERS: usize = 8;
    let tracker = Arc::new(Tracker::default());
    let ctx = probe_ctx(&tracker);

    let consumers: Vec<_> = (0..WAITERS)
        .map(|_| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                let (mut c, mailbox) = ctx.new_client();
                let reply = run(&ctx, &mut c, &["BLPOP", "jobs", "0"]);
                let reply = if c.is_blocked() {
                    let r = mailbox.recv_timeout(Duration::from_secs(10)).unwrap();
                    c.unblock();
                    r
                } else {
                    reply
                };
                ctx.drop_client(c.id());
                String::from_utf8(reply.to_vec()).unwrap()
            })
        })
        .collect();

    let producer = {
        let ctx = ctx.clone();
        thread::spawn(move || {
            let (mut c, _mailbox) = ctx.new_client();
            for i in 0..WAITERS {
                run(&ctx, &mut c, &["RPUSH", "jobs", &i.to_string()]);
                if i % 2 == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };
    producer.join().unwrap();

    let mut got: Vec<String> = consumers.into_iter().map(|h| h.join().unwrap()).collect();
    got.sort();
    let mut want: Vec<String> = (0..WAITERS)
        .map(|i| format!("*2\r\n$4\r\njobs\r\n$1\r\n{}\r\n", i))
        .collect();
    want.sort();
    assert_eq!(got, want);
    assert!(ctx.blocking().is_empty());
}
