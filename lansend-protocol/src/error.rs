use thiserror::Error;

/// Errors raised while decoding pipe frames or protocol payloads.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame exceeds maximum length ({0} bytes)")]
    FrameTooLarge(usize),
}

/// Upper bound on a single pipe frame. Operations are small control
/// messages; anything larger indicates a corrupted or hostile stream.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Decode one newline-delimited `{type, data}` frame.
pub fn decode_frame<T: serde::de::DeserializeOwned>(line: &str) -> Result<T, WireError> {
    if line.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(line.len()));
    }
    Ok(serde_json::from_str(line)?)
}

/// Encode a message as a single newline-terminated frame.
pub fn encode_frame<T: serde::Serialize>(msg: &T) -> Result<String, WireError> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Operation;

    #[test]
    fn test_frame_roundtrip() {
        let op = Operation::CancelReceive { transfer_id: 9 };
        let line = encode_frame(&op).unwrap();
        assert!(line.ends_with('\n'));
        let parsed: Operation = decode_frame(line.trim()).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let line = "x".repeat(MAX_FRAME_LEN + 1);
        let result: Result<Operation, _> = decode_frame(&line);
        assert!(matches!(result, Err(WireError::FrameTooLarge(_))));
    }
}
