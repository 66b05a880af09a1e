/// Errors raised while encoding, decoding, or moving binding frames.
///
/// `Io` is kept apart from the decode variants so callers can tell a dead
/// socket from a garbled frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame body too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("truncated frame: needed {needed} bytes at offset {offset}, {remaining} left")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("varint at offset {offset} exceeds 64 bits")]
    VarintOverflow { offset: usize },

    #[error("field {field} is not valid utf-8")]
    InvalidUtf8 { field: u64 },

    #[error("unknown wire kind {kind} for field {field}")]
    UnknownWireKind { field: u64, kind: u8 },

    #[error("field {field} has wire kind {actual}, expected {expected}")]
    WireKindMismatch { field: u64, expected: u8, actual: u8 },

    #[error("field {field} value {value} out of range")]
    OutOfRange { field: u64, value: u64 },
}

/// The relay decoded our request but refused to bind the connection.
///
/// Carried by a [`ConnectResponse`](crate::ConnectResponse) whose error code
/// or error message is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("binding rejected [{code}]: {message}")]
pub struct Rejected {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_frame_too_large() {
        let err = CodecError::FrameTooLarge {
            size: 70_000,
            max: 65_535,
        };
        assert_eq!(
            err.to_string(),
            "frame body too large: 70000 bytes (max 65535)"
        );
    }

    #[test]
    fn test_display_rejected() {
        let err = Rejected {
            code: "ERR_404".into(),
            message: "no such endpoint".into(),
        };
        assert_eq!(err.to_string(), "binding rejected [ERR_404]: no such endpoint");
    }
}
