//! Internal format: how typed values become plaintext bytes before sealing.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::ProtoError;

pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode_json<T: DeserializeOwned>(raw: &[u8]) -> Result<T, ProtoError> {
    Ok(serde_json::from_slice(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageBody};

    #[test]
    fn message_through_json() {
        let m = Message::new(1, 0, MessageBody::Meta { name: "🤡".into() });
        let bytes = encode_json(&m).unwrap();
        assert_eq!(decode_json::<Message>(&bytes).unwrap(), m);
    }

    #[test]
    fn garbage_is_a_serialisation_error() {
        assert!(matches!(
            decode_json::<Message>(b"\x00\x01"),
            Err(ProtoError::Serialisation(_))
        ));
    }
}
