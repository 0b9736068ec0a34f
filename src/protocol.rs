/*!
 * RESP Framing and Reply Encoding
 *
 * Requests arrive as RESP arrays of bulk strings and are handed to the
 * dispatcher as a raw argument vector; command lookup and arity checks
 * happen later in the command table, not here. Replies are encoded
 * straight into the connection's output buffer.
 */

use anyhow::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound on the number of arguments in a single request
const MAX_ARGS: i64 = 1024 * 1024;

/// Upper bound on a single bulk string (512MB, same as Redis)
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Parse a single RESP request from byte data
///
/// The request must be an array of bulk strings:
/// `*<count>\r\n$<len>\r\n<data>\r\n...`
///
/// # Returns
/// * `Ok(Some((consumed_bytes, argv)))` - Successfully parsed request
/// * `Ok(None)` - Incomplete data, need more bytes
/// * `Err(...)` - Protocol error
pub fn parse_one(data: &[u8]) -> Result<Option<(usize, Vec<Bytes>)>> {
    if data.is_empty() {
        return Ok(None);
    }

    if data[0] != b'*' {
        bail!("Protocol error: expected '*', got '{}'", data[0] as char);
    }

    let (i, n) = match read_decimal_line(&data[1..])? {
        Some(x) => x,
        None => return Ok(None),
    };
    if n <= 0 || n > MAX_ARGS {
        bail!("Protocol error: invalid multibulk length");
    }
    let mut cursor = 1 + i;

    // the count is client-supplied, so don't preallocate all of it up front
    let mut argv: Vec<Bytes> = Vec::with_capacity(n.min(64) as usize);
    for _ in 0..n {
        if cursor >= data.len() {
            return Ok(None);
        }
        if data[cursor] != b'$' {
            bail!("Protocol error: expected '$', got '{}'", data[cursor] as char);
        }

        let (i2, len) = match read_decimal_line(&data[cursor + 1..])? {
            Some(x) => x,
            None => return Ok(None),
        };
        if !(0..=MAX_BULK_LEN).contains(&len) {
            bail!("Protocol error: invalid bulk length");
        }
        cursor += 1 + i2;

        let need = len as usize + 2;
        if cursor + need > data.len() {
            return Ok(None);
        }
        if &data[cursor + len as usize..cursor + need] != b"\r\n" {
            bail!("Protocol error: bulk string not terminated by CRLF");
        }
        argv.push(Bytes::copy_from_slice(&data[cursor..cursor + len as usize]));
        cursor += need;
    }

    Ok(Some((cursor, argv)))
}

/// Parse every complete request currently in `buf`
///
/// Consumed bytes are removed from the buffer; a trailing partial
/// request stays in place until more data arrives. Used for pipelining.
pub fn parse_many(buf: &mut BytesMut, out: &mut Vec<Vec<Bytes>>) -> Result<()> {
    while let Some((consumed, argv)) = parse_one(&buf[..])? {
        buf.advance(consumed);
        out.push(argv);
    }
    Ok(())
}

/// Read a signed decimal number terminated by CRLF
///
/// Returns `None` when the line is not complete yet.
fn read_decimal_line(s: &[u8]) -> Result<Option<(usize, i64)>> {
    let mut i = 0;
    let mut sign: i64 = 1;
    if s.first() == Some(&b'-') {
        sign = -1;
        i += 1;
    }

    let start = i;
    let mut num: i64 = 0;
    while i < s.len() && s[i].is_ascii_digit() {
        num = num
            .checked_mul(10)
            .and_then(|n| n.checked_add((s[i] - b'0') as i64))
            .ok_or_else(|| anyhow!("Protocol error: number overflow"))?;
        i += 1;
    }

    if i + 1 >= s.len() {
        return Ok(None);
    }
    if i == start || s[i] != b'\r' || s[i + 1] != b'\n' {
        bail!("Protocol error: expected CRLF after number");
    }
    Ok(Some((i + 2, num * sign)))
}

//
// RESP reply encoders
//

/// `+<s>\r\n`
#[inline]
pub fn write_simple(s: &str, out: &mut BytesMut) {
    out.reserve(s.len() + 3);
    out.put_u8(b'+');
    out.put_slice(s.as_bytes());
    out.put_slice(b"\r\n");
}

/// `-<msg>\r\n`
///
/// The message is written as-is, so it must already carry its error
/// prefix (`ERR`, `MOVED`, `CLUSTERDOWN`, ...).
#[inline]
pub fn write_error(msg: &str, out: &mut BytesMut) {
    out.reserve(msg.len() + 3);
    out.put_u8(b'-');
    out.put_slice(msg.as_bytes());
    out.put_slice(b"\r\n");
}

/// `$<len>\r\n<data>\r\n`
#[inline]
pub fn write_bulk(b: &[u8], out: &mut BytesMut) {
    let len = b.len().to_string();
    out.reserve(1 + len.len() + 2 + b.len() + 2);
    out.put_u8(b'$');
    out.put_slice(len.as_bytes());
    out.put_slice(b"\r\n");
    out.put_slice(b);
    out.put_slice(b"\r\n");
}

/// `:<i>\r\n`
#[inline]
pub fn write_integer(i: i64, out: &mut BytesMut) {
    out.put_u8(b':');
    out.put_slice(i.to_string().as_bytes());
    out.put_slice(b"\r\n");
}

/// Null bulk string, `$-1\r\n`
#[inline]
pub fn write_null(out: &mut BytesMut) {
    out.put_slice(b"$-1\r\n");
}

/// Null array, `*-1\r\n`. Sent to blocking clients that time out.
#[inline]
pub fn write_null_array(out: &mut BytesMut) {
    out.put_slice(b"*-1\r\n");
}

/// `*<n>\r\n`, to be followed by `n` encoded elements
#[inline]
pub fn write_array_len(n: usize, out: &mut BytesMut) {
    out.put_u8(b'*');
    out.put_slice(n.to_string().as_bytes());
    out.put_slice(b"\r\n");
}
