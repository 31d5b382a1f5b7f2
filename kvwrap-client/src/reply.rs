//! # Typed Reply Conversion
//!
//! `FromReply` turns a raw [`Reply`] into the representation a caller asked
//! for. Nil is reported as [`WrapperError::Nil`] unless the target is an
//! `Option`, so "key absent" stays distinguishable from "wrong type".

use bytes::Bytes;

use crate::error::{WrapperError, WrapperResult};
use crate::resp::Reply;

/// Conversion from a server reply.
pub trait FromReply: Sized {
    /// Converts `reply`, failing with a conversion error when it does not fit.
    fn from_reply(reply: Reply) -> WrapperResult<Self>;
}

impl FromReply for Reply {
    fn from_reply(reply: Reply) -> WrapperResult<Self> {
        Ok(reply)
    }
}

impl<T: FromReply> FromReply for Option<T> {
    fn from_reply(reply: Reply) -> WrapperResult<Self> {
        match reply {
            Reply::Nil => Ok(None),
            other => T::from_reply(other).map(Some),
        }
    }
}

impl FromReply for Bytes {
    fn from_reply(reply: Reply) -> WrapperResult<Self> {
        match reply {
            Reply::Bulk(data) | Reply::Status(data) => Ok(data),
            Reply::Integer(value) => Ok(Bytes::from(value.to_string())),
            Reply::Nil => Err(WrapperError::Nil),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl FromReply for Vec<u8> {
    fn from_reply(reply: Reply) -> WrapperResult<Self> {
        Bytes::from_reply(reply).map(|data| data.to_vec())
    }
}

impl FromReply for String {
    fn from_reply(reply: Reply) -> WrapperResult<Self> {
        match reply {
            Reply::Bulk(data) | Reply::Status(data) => String::from_utf8(data.to_vec())
                .map_err(|_| WrapperError::conversion("string", "non-UTF-8 bulk string")),
            Reply::Integer(value) => Ok(value.to_string()),
            Reply::Nil => Err(WrapperError::Nil),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromReply for i64 {
    fn from_reply(reply: Reply) -> WrapperResult<Self> {
        match reply {
            Reply::Integer(value) => Ok(value),
            Reply::Bulk(data) | Reply::Status(data) => parse_decimal(&data, "i64"),
            Reply::Nil => Err(WrapperError::Nil),
            other => Err(mismatch("i64", &other)),
        }
    }
}

impl FromReply for i32 {
    fn from_reply(reply: Reply) -> WrapperResult<Self> {
        narrow(reply, "i32")
    }
}

impl FromReply for u64 {
    fn from_reply(reply: Reply) -> WrapperResult<Self> {
        narrow(reply, "u64")
    }
}

fn narrow<T>(reply: Reply, target: &'static str) -> WrapperResult<T>
where
    T: TryFrom<i64> + std::str::FromStr,
{
    // Bulk strings are parsed directly so u64 values above i64::MAX still work.
    if let Reply::Bulk(data) | Reply::Status(data) = &reply {
        return parse_decimal(data, target);
    }
    let wide = i64::from_reply(reply).map_err(|err| match err {
        WrapperError::Conversion { reply, .. } => WrapperError::Conversion { target, reply },
        other => other,
    })?;
    T::try_from(wide)
        .map_err(|_| WrapperError::conversion(target, format!("{} (out of range)", wide)))
}

fn parse_decimal<T: std::str::FromStr>(data: &[u8], target: &'static str) -> WrapperResult<T> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| {
            WrapperError::conversion(target, format!("{:?}", String::from_utf8_lossy(data)))
        })
}

fn mismatch(target: &'static str, reply: &Reply) -> WrapperError {
    let shape = match reply {
        Reply::Array(items) => format!("array of {} items", items.len()),
        Reply::Error(message) => format!("error reply {:?}", String::from_utf8_lossy(message)),
        other => other.to_string(),
    };
    WrapperError::conversion(target, shape)
}
