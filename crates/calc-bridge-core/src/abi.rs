//! The `calc-bridge/1` calling convention.
//!
//! Arguments travel through a guest-owned exchange area made of 16-byte
//! slots:
//!
//! ```text
//! offset  size  field
//! 0       4     tag (i32 LE): 0 number, 1 text, 2 bool, 3 null
//! 4       4     padding
//! 8       8     value (f64 LE), zero unless the tag is "number"
//! ```
//!
//! The export is called as `fn(argc: i32) -> i32`. Status 0 leaves an `i64`
//! result at offset 0 of the exchange area; status 1 leaves a message
//! pointer (`i32`, offset 0) and length (`i32`, offset 4).

use calc_bridge_common::CallError;

/// ABI identifier a bridge manifest must declare.
pub const ABI_VERSION: &str = "calc-bridge/1";

/// Size of one argument slot in bytes.
pub const SLOT_SIZE: usize = 16;

/// Number of slots the host writes. Extra arguments are counted but not
/// written.
pub const MAX_SLOTS: usize = 8;

/// Bytes the exchange area must provide.
pub const EXCHANGE_SIZE: usize = SLOT_SIZE * MAX_SLOTS;

/// Longest guest error message the host will read.
pub const MAX_MESSAGE_LEN: usize = 1024;

const STATUS_OK: i32 = 0;
const STATUS_REJECTED: i32 = 1;

/// A host value passed to the guest.
///
/// Only numbers carry a payload across the boundary; the other variants
/// tell the guest what kind of value it was given.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// A numeric value.
    Number(f64),
    /// A string.
    Text(String),
    /// A boolean.
    Bool(bool),
    /// An absent value.
    Null,
}

impl ArgValue {
    fn tag(&self) -> i32 {
        match self {
            ArgValue::Number(_) => 0,
            ArgValue::Text(_) => 1,
            ArgValue::Bool(_) => 2,
            ArgValue::Null => 3,
        }
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Number(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Text(value.to_string())
    }
}

/// What the guest function answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestReturn {
    /// The computed value.
    Value(i64),
    /// The guest rejected its input.
    Error(String),
}

impl GuestReturn {
    /// Returns the value if the guest accepted its input.
    pub fn value(&self) -> Option<i64> {
        match self {
            GuestReturn::Value(v) => Some(*v),
            GuestReturn::Error(_) => None,
        }
    }
}

/// Encode arguments into the exchange-area layout.
///
/// Returns the bytes to write and the `argc` to pass.
pub fn encode_args(args: &[ArgValue]) -> Result<(Vec<u8>, i32), CallError> {
    let argc = i32::try_from(args.len())
        .map_err(|_| CallError::abi(format!("too many arguments: {}", args.len())))?;

    let written = args.len().min(MAX_SLOTS);
    let mut buf = vec![0u8; written * SLOT_SIZE];

    for (slot, arg) in buf.chunks_exact_mut(SLOT_SIZE).zip(args) {
        slot[0..4].copy_from_slice(&arg.tag().to_le_bytes());
        if let ArgValue::Number(n) = arg {
            slot[8..16].copy_from_slice(&n.to_le_bytes());
        }
    }

    Ok((buf, argc))
}

/// Interpretation of a status word, before any message is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Result is an `i64` at offset 0.
    Ok,
    /// Result is a `(ptr, len)` message reference.
    Rejected,
}

/// Decode the status returned by the export.
pub fn decode_status(status: i32) -> Result<Status, CallError> {
    match status {
        STATUS_OK => Ok(Status::Ok),
        STATUS_REJECTED => Ok(Status::Rejected),
        other => Err(CallError::abi(format!("unknown status {other}"))),
    }
}

/// Decode an `i64` result from the first 8 bytes of the exchange area.
pub fn decode_value(head: &[u8; 8]) -> i64 {
    i64::from_le_bytes(*head)
}

/// Decode a `(ptr, len)` message reference from the first 8 bytes of the
/// exchange area.
pub fn decode_message_ref(head: &[u8; 8]) -> Result<(usize, usize), CallError> {
    let ptr = i32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    let len = i32::from_le_bytes([head[4], head[5], head[6], head[7]]);

    let ptr = usize::try_from(ptr).map_err(|_| CallError::abi("negative message pointer"))?;
    let len = usize::try_from(len).map_err(|_| CallError::abi("negative message length"))?;
    if len > MAX_MESSAGE_LEN {
        return Err(CallError::abi(format!("message too long: {len} bytes")));
    }

    Ok((ptr, len))
}
