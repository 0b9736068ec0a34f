/*!
 * Network Layer
 *
 * One thread per connection: each request is parsed, dispatched and
 * answered synchronously on that thread. A client blocked by BLPOP parks
 * its thread on the connection mailbox until it is served or its wait
 * expires. A separate sweeper thread expires blocking waits.
 */

use crate::config::Config;
use crate::context::Context;
use crate::protocol::{parse_many, write_error};
use anyhow::*;
use bytes::{Bytes, BytesMut};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::result::Result::{Err, Ok};
use std::sync::Arc;
use std::time::Duration;

/// Size of read buffer for incoming data
const READ_BUF: usize = 4096;

/// How often a blocked connection checks whether its peer is still there
const PEER_CHECK: Duration = Duration::from_millis(50);

/// Bind a TCP listener with SO_REUSEADDR set
pub fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

/// Bind `config.bind` and serve until the listener fails
pub fn run(config: &Config, ctx: Arc<Context>) -> Result<()> {
    let listener = bind(config.bind)?;
    info!("listening on {}", config.bind);
    spawn_sweeper(ctx.clone(), Duration::from_millis(config.sweep_interval_ms))?;
    serve(listener, ctx)
}

/// Start the thread that expires blocking waits every `interval`
pub fn spawn_sweeper(ctx: Arc<Context>, interval: Duration) -> Result<()> {
    std::thread::Builder::new()
        .name("expire-sweeper".into())
        .spawn(move || loop {
            std::thread::sleep(interval);
            let n = ctx.sweep_expired_now();
            if n > 0 {
                debug!("expired {} blocked client(s)", n);
            }
        })?;
    Ok(())
}

/// Accept connections on `listener`, one thread each
pub fn serve(listener: TcpListener, ctx: Arc<Context>) -> Result<()> {
    for stream in listener.incoming() {
        let sock = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("accept error: {}", e);
                continue;
            }
        };
        let ctx = ctx.clone();
        let spawned = std::thread::Builder::new()
            .name("conn".into())
            .spawn(move || {
                if let Err(e) = handle_conn(&ctx, sock) {
                    debug!("connection closed: {}", e);
                }
            });
        if let Err(e) = spawned {
            error!("failed to spawn connection thread: {}", e);
        }
    }
    Ok(())
}

/// Serve one connection until the peer goes away
fn handle_conn(ctx: &Context, mut sock: TcpStream) -> Result<()> {
    sock.set_nodelay(true).ok();
    let (mut client, mailbox) = ctx.new_client();
    let id = client.id();
    debug!("connection {} from {:?}", id, sock.peer_addr().ok());

    let res = conn_loop(ctx, &mut sock, &mut client, &mailbox);
    ctx.drop_client(id);
    res
}

fn conn_loop(
    ctx: &Context,
    sock: &mut TcpStream,
    client: &mut crate::client::Client,
    mailbox: &Receiver<Bytes>,
) -> Result<()> {
    let mut rbuf = BytesMut::with_capacity(READ_BUF);
    let mut tmp_buf = [0u8; READ_BUF];
    let mut reqs = Vec::with_capacity(32);

    loop {
        let n = match sock.read(&mut tmp_buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        rbuf.extend_from_slice(&tmp_buf[..n]);

        if let Err(e) = parse_many(&mut rbuf, &mut reqs) {
            // The stream can't be resynchronised after a framing error
            let mut out = BytesMut::new();
            write_error(&format!("ERR {}", e), &mut out);
            sock.write_all(&out)?;
            bail!("protocol error: {}", e);
        }

        for argv in reqs.drain(..) {
            client.set_argv(argv);
            ctx.dispatch(client);
            let reply = client.take_reply();
            if !reply.is_empty() {
                sock.write_all(&reply)?;
            }

            if client.is_blocked() {
                let Some(reply) = wait_blocked(sock, mailbox)? else {
                    // handle_conn drops the client, which dequeues its waits
                    debug!("connection {} hung up while blocked", client.id());
                    return Ok(());
                };
                client.unblock();
                sock.write_all(&reply)?;
            }
        }
    }
}

/// Park until a reply for a blocked client arrives
///
/// Returns `None` once the peer has hung up, so the caller can drop the
/// client before a producer hands it data nobody will read.
fn wait_blocked(sock: &TcpStream, mailbox: &Receiver<Bytes>) -> Result<Option<Bytes>> {
    loop {
        match mailbox.recv_timeout(PEER_CHECK) {
            Ok(reply) => return Ok(Some(reply)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("mailbox closed"),
        }
        if !peer_alive(sock)? {
            return Ok(None);
        }
    }
}

/// Nonblocking peek: `false` on orderly shutdown or a connection error
fn peer_alive(sock: &TcpStream) -> Result<bool> {
    sock.set_nonblocking(true)?;
    let mut probe = [0u8; 1];
    let alive = match sock.peek(&mut probe) {
        Ok(0) => false,
        Ok(_) => true,
        Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => true,
        Err(_) => false,
    };
    sock.set_nonblocking(false)?;
    Ok(alive)
}
