//! Envelope wire encoding, the only form in which ciphertext leaves the client.
//!
//! ```text
//! Envelope           <b64(header)>.<b64(payload)>
//! HandshakeEnvelope  <b64(h0)>:<b64(h1)>.<b64(p0)>:<b64(p1)>
//! ```
//!
//! Standard base64 never produces `.` or `:`, so splitting is unambiguous.

use base64::{engine::general_purpose::STANDARD, Engine};
use edm_crypto::{Envelope, HandshakeEnvelope};

use crate::error::ProtoError;

const INTRA_SPLIT: char = '.';
const INTER_SPLIT: char = ':';

/// Stateless, invertible framing of envelopes into transport-safe strings.
pub trait EnvelopeEncoding: Send + Sync {
    fn encode_envelope(&self, envelope: &Envelope) -> String;
    fn decode_envelope(&self, encoded: &str) -> Result<Envelope, ProtoError>;
    fn encode_handshake_envelope(&self, envelope: &HandshakeEnvelope) -> String;
    fn decode_handshake_envelope(&self, encoded: &str) -> Result<HandshakeEnvelope, ProtoError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Base64EnvelopeEncoding;

fn split_pair(s: &str, sep: char) -> Result<(&str, &str), ProtoError> {
    let mut parts = s.split(sep);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => Ok((a, b)),
        _ => Err(ProtoError::MalformedEnvelope(format!(
            "expected exactly two '{sep}'-separated parts"
        ))),
    }
}

impl EnvelopeEncoding for Base64EnvelopeEncoding {
    fn encode_envelope(&self, envelope: &Envelope) -> String {
        format!(
            "{}{INTRA_SPLIT}{}",
            STANDARD.encode(&envelope.header),
            STANDARD.encode(&envelope.payload)
        )
    }

    fn decode_envelope(&self, encoded: &str) -> Result<Envelope, ProtoError> {
        let (header, payload) = split_pair(encoded, INTRA_SPLIT)?;
        Ok(Envelope {
            header: STANDARD.decode(header)?,
            payload: STANDARD.decode(payload)?,
        })
    }

    fn encode_handshake_envelope(&self, envelope: &HandshakeEnvelope) -> String {
        let [h0, h1] = &envelope.header;
        let [p0, p1] = &envelope.payload;
        format!(
            "{}{INTER_SPLIT}{}{INTRA_SPLIT}{}{INTER_SPLIT}{}",
            STANDARD.encode(h0),
            STANDARD.encode(h1),
            STANDARD.encode(p0),
            STANDARD.encode(p1)
        )
    }

    fn decode_handshake_envelope(&self, encoded: &str) -> Result<HandshakeEnvelope, ProtoError> {
        let (header, payload) = split_pair(encoded, INTRA_SPLIT)?;
        let (h0, h1) = split_pair(header, INTER_SPLIT)?;
        let (p0, p1) = split_pair(payload, INTER_SPLIT)?;
        Ok(HandshakeEnvelope {
            header: [STANDARD.decode(h0)?, STANDARD.decode(h1)?],
            payload: [STANDARD.decode(p0)?, STANDARD.decode(p1)?],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip_is_exact() {
        let enc = Base64EnvelopeEncoding;
        let env = Envelope {
            header: vec![0xff, 0x00, 0x3e, 0x3f],
            payload: (0u8..=255).collect(),
        };
        let wire = enc.encode_envelope(&env);
        assert_eq!(wire.matches('.').count(), 1);
        assert_eq!(enc.decode_envelope(&wire).unwrap(), env);
    }

    #[test]
    fn handshake_layout() {
        let enc = Base64EnvelopeEncoding;
        let env = HandshakeEnvelope {
            header: [b"a".to_vec(), b"b".to_vec()],
            payload: [b"c".to_vec(), b"d".to_vec()],
        };
        let wire = enc.encode_handshake_envelope(&env);
        assert_eq!(wire, "YQ==:Yg==.Yw==:ZA==");
        assert_eq!(enc.decode_handshake_envelope(&wire).unwrap(), env);
    }

    #[test]
    fn empty_parts_survive() {
        let enc = Base64EnvelopeEncoding;
        let env = Envelope { header: vec![], payload: vec![1] };
        assert_eq!(enc.decode_envelope(&enc.encode_envelope(&env)).unwrap(), env);
    }

    #[test]
    fn wrong_part_counts_rejected() {
        let enc = Base64EnvelopeEncoding;
        assert!(matches!(enc.decode_envelope("YQ=="), Err(ProtoError::MalformedEnvelope(_))));
        assert!(matches!(enc.decode_envelope("YQ==.YQ==.YQ=="), Err(ProtoError::MalformedEnvelope(_))));
        assert!(matches!(
            enc.decode_handshake_envelope("YQ==.Yg=="),
            Err(ProtoError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            enc.decode_handshake_envelope("YQ==:Yg==:Yw==.ZA==:ZA=="),
            Err(ProtoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn invalid_base64_rejected() {
        let enc = Base64EnvelopeEncoding;
        assert!(matches!(enc.decode_envelope("***.YQ=="), Err(ProtoError::Base64Decode(_))));
    }

    #[test]
    fn handshake_string_is_not_a_plain_envelope() {
        let enc = Base64EnvelopeEncoding;
        let wire = "YQ==:Yg==.Yw==:ZA==";
        assert!(enc.decode_envelope(wire).is_err());
    }
}
