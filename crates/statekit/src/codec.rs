//! State encoding

use crate::error::{Error, Result};
use crate::types::State;

/// Turns a snapshot into bytes and back.
///
/// Both the local state file and the console fallback go through a codec,
/// so a snapshot that cannot be encoded cannot be recovered by either.
pub trait StateCodec: Send + Sync {
    /// Encode a snapshot
    fn encode(&self, state: &State) -> Result<Vec<u8>>;

    /// Decode a snapshot
    fn decode(&self, bytes: &[u8]) -> Result<State>;

    /// Encode as text for printing
    fn encode_text(&self, state: &State) -> Result<String> {
        let bytes = self.encode(state)?;
        String::from_utf8(bytes).map_err(|e| Error::Encode(e.to_string()))
    }
}

/// Indented JSON, two spaces per level
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl StateCodec for JsonCodec {
    fn encode(&self, state: &State) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(state)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<State> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceInstance;

    #[test]
    fn test_json_codec_is_indented() {
        let state = State::new().with_resource(
            "null_resource.a",
            ResourceInstance::new("null_resource", "123").with_attribute("triggers", "x"),
        );

        let text = JsonCodec.encode_text(&state).unwrap();
        assert!(text.starts_with("{\n  \"version\""));
        assert!(text.contains("\"null_resource.a\""));
        assert_eq!(JsonCodec.decode(text.as_bytes()).unwrap(), state);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        assert!(JsonCodec.decode(b"not json").is_err());
    }
}
