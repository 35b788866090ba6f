//! Wire protocol: request framing and tagged reply serialization.
//!
//! A request is one little-endian u32 body length, then the body: a u32
//! argument count followed by each argument as a u32 length plus bytes.
//! A reply body is a single tagged value; arrays flatten their elements
//! depth-first after a u32 count.

use thiserror::Error;

use crate::buffer::Buffer;

/// Largest request body and largest serialized reply body, in bytes.
pub const K_MAX_MSG: usize = 32 << 20;
/// Most arguments accepted in one request.
pub const K_MAX_ARGS: usize = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Nil = 0,
    Err = 1,
    Str = 2,
    Int = 3,
    Dbl = 4,
    Arr = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrCode {
    /// Unrecognized command name or arity.
    Unknown = 1,
    /// Serialized reply exceeded [`K_MAX_MSG`].
    TooBig = 2,
    /// Operation against a key holding the wrong value type.
    BadTyp = 3,
    /// Argument failed to parse.
    BadArg = 4,
}

/// Protocol violations that are fatal to a connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("request body exceeds the {K_MAX_MSG} byte limit")]
    TooLong,
    #[error("request body is truncated or carries trailing bytes")]
    Malformed,
    #[error("request carries more than {K_MAX_ARGS} arguments")]
    TooManyArgs,
}

fn read_u32(cur: &mut &[u8]) -> Option<u32> {
    if cur.len() < 4 {
        return None;
    }
    let (head, rest) = cur.split_at(4);
    *cur = rest;
    Some(u32::from_le_bytes(head.try_into().expect("four bytes")))
}

/// Split a complete request body into its arguments. The body must be
/// consumed exactly; trailing bytes are a protocol violation.
pub fn parse_request(body: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
    let mut cur = body;
    let nargs = read_u32(&mut cur).ok_or(FrameError::Malformed)? as usize;
    if nargs > K_MAX_ARGS {
        return Err(FrameError::TooManyArgs);
    }
    let mut out = Vec::with_capacity(nargs);
    while out.len() < nargs {
        let len = read_u32(&mut cur).ok_or(FrameError::Malformed)? as usize;
        if cur.len() < len {
            return Err(FrameError::Malformed);
        }
        let (arg, rest) = cur.split_at(len);
        out.push(arg.to_vec());
        cur = rest;
    }
    if !cur.is_empty() {
        return Err(FrameError::Malformed);
    }
    Ok(out)
}

pub fn out_nil(out: &mut Buffer) {
    out.append_u8(Tag::Nil as u8);
}

pub fn out_str(out: &mut Buffer, s: &[u8]) {
    out.append_u8(Tag::Str as u8);
    out.append_u32(s.len() as u32);
    out.append(s);
}

pub fn out_int(out: &mut Buffer, v: i64) {
    out.append_u8(Tag::Int as u8);
    out.append_i64(v);
}

pub fn out_dbl(out: &mut Buffer, v: f64) {
    out.append_u8(Tag::Dbl as u8);
    out.append_f64(v);
}

pub fn out_err(out: &mut Buffer, code: ErrCode, msg: &str) {
    out.append_u8(Tag::Err as u8);
    out.append_u32(code as u32);
    out.append_u32(msg.len() as u32);
    out.append(msg.as_bytes());
}

pub fn out_arr(out: &mut Buffer, n: u32) {
    out.append_u8(Tag::Arr as u8);
    out.append_u32(n);
}

/// Start an array whose length is not yet known. Returns the position to
/// hand back to [`out_end_arr`].
pub fn out_begin_arr(out: &mut Buffer) -> usize {
    out.append_u8(Tag::Arr as u8);
    let ctx = out.len();
    out.append_u32(0);
    ctx
}

pub fn out_end_arr(out: &mut Buffer, ctx: usize, n: u32) {
    debug_assert_eq!(out.byte_at(ctx - 1), Tag::Arr as u8);
    out.patch_u32(ctx, n);
}

/// Reserve the 4-byte frame header; the reply body follows it.
pub fn response_begin(out: &mut Buffer) -> usize {
    let header = out.len();
    out.append_u32(0);
    header
}

fn response_size(out: &Buffer, header: usize) -> usize {
    out.len() - header - 4
}

/// Backfill the frame header. An oversized body is thrown away and
/// replaced by a single TOO_BIG error.
pub fn response_end(out: &mut Buffer, header: usize) {
    let mut size = response_size(out, header);
    if size > K_MAX_MSG {
        out.truncate(header + 4);
        out_err(out, ErrCode::TooBig, "response is too big.");
        size = response_size(out, header);
    }
    out.patch_u32(header, size as u32);
}
