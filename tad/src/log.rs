//! Leveled message logging with typed arguments.
//!
//! Messages are built from a format string with `{}` placeholders and a slice of typed
//! arguments, at most [`MAX_ARGS`] of them. The formatted message is handed to `tracing` so any
//! installed subscriber decides where it ends up; the `user` string is attached as a field to
//! identify the emitting component (a CSAP, a send queue, a forwarder task).
//!
//! The levels map onto `tracing` levels as follows:
//!
//! | Level       | tracing |
//! |-------------|---------|
//! | `Error`     | `ERROR` |
//! | `Warn`      | `WARN`  |
//! | `Ring`      | `INFO`, with `ring = true` |
//! | `Info`      | `INFO`  |
//! | `Verb`      | `DEBUG` |
//! | `EntryExit` | `TRACE` |
//!
//! [`MAX_ARGS`]: constant.MAX_ARGS.html
use core::fmt::{self, Write};

/// The maximum number of arguments of a single message.
pub const MAX_ARGS: usize = 12;

/// Severity of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// A failure of an operation.
    Error,
    /// Something unexpected that did not fail the operation.
    Warn,
    /// Condensed progress, kept in the ring of recent messages.
    Ring,
    /// General information.
    Info,
    /// Verbose details.
    Verb,
    /// Entering and leaving functions.
    EntryExit,
}

/// One typed argument of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg<'a> {
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    Uint(u64),
    /// A string.
    Str(&'a str),
    /// Raw bytes, printed as hex.
    Bytes(&'a [u8]),
}

/// Emit a message.
///
/// Placeholders without a matching argument are printed verbatim. More than [`MAX_ARGS`]
/// arguments are truncated and an additional warning is emitted.
///
/// [`MAX_ARGS`]: constant.MAX_ARGS.html
pub fn log(level: Level, user: &str, fmt: &str, args: &[Arg]) {
    let args = if args.len() > MAX_ARGS {
        tracing::warn!(user, given = args.len(), "log message with too many arguments truncated");
        &args[..MAX_ARGS]
    } else {
        args
    };

    let message = format(fmt, args);
    match level {
        Level::Error => tracing::error!(user, "{}", message),
        Level::Warn => tracing::warn!(user, "{}", message),
        Level::Ring => tracing::info!(user, ring = true, "{}", message),
        Level::Info => tracing::info!(user, "{}", message),
        Level::Verb => tracing::debug!(user, "{}", message),
        Level::EntryExit => tracing::trace!(user, "{}", message),
    }
}

/// Substitute the `{}` placeholders of `fmt` in order.
pub fn format(fmt: &str, args: &[Arg]) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut args = args.iter();
    let mut rest = fmt;

    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => { let _ = write!(out, "{}", arg); },
            None => out.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }

    out.push_str(rest);
    out
}

impl fmt::Display for Arg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Arg::Int(val) => write!(f, "{}", val),
            Arg::Uint(val) => write!(f, "{}", val),
            Arg::Str(val) => f.write_str(val),
            Arg::Bytes(bytes) => {
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_char(':')?;
                    }
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            },
        }
    }
}

macro_rules! arg_from_int {
    ($variant:ident as $target:ty: $($ty:ty),*) => {
        $(
            impl From<$ty> for Arg<'_> {
                fn from(val: $ty) -> Self {
                    Arg::$variant(val as $target)
                }
            }
        )*
    };
}

arg_from_int!(Int as i64: i8, i16, i32, i64, isize);
arg_from_int!(Uint as u64: u8, u16, u32, u64, usize);

impl<'a> From<&'a str> for Arg<'a> {
    fn from(val: &'a str) -> Self {
        Arg::Str(val)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(val: &'a String) -> Self {
        Arg::Str(val.as_str())
    }
}

impl<'a> From<&'a [u8]> for Arg<'a> {
    fn from(val: &'a [u8]) -> Self {
        Arg::Bytes(val)
    }
}

impl<'a> From<&'a Vec<u8>> for Arg<'a> {
    fn from(val: &'a Vec<u8>) -> Self {
        Arg::Bytes(val.as_slice())
    }
}

/// Log a message with arguments converted at the call site.
///
/// ```
/// use tad::log::Level;
/// tad::tad_log!(Level::Info, "csap 1", "sent {} packets on {}", 3u32, "eth0");
/// ```
#[macro_export]
macro_rules! tad_log {
    ($level:expr, $user:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::log::log($level, $user, $fmt, &[$($crate::log::Arg::from($arg)),*])
    };
}
