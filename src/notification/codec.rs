//! Wire encoding of the notification envelope.
//!
//! The payload on a data channel is the serialized [`SubscribeResponse`] and
//! nothing else: routing metadata lives in the channel name.

use thiserror::Error;

use super::SubscribeResponse;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode notification: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode notification: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("empty payload")]
    Empty,
}

pub fn encode(response: &SubscribeResponse) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(response).map_err(CodecError::Encode)
}

pub fn decode(payload: &[u8]) -> Result<SubscribeResponse, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    serde_json::from_slice(payload).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{Notification, Path, TypedValue, Update};

    #[test]
    fn test_decode_recovers_encoded_update() {
        let response = SubscribeResponse::update(Notification {
            timestamp: 1_700_000_000_000_000_000,
            prefix: Some(Path::with_target("router1")),
            update: vec![Update::new(
                "interface[name=ethernet-1/1]/statistics/in-octets".parse().unwrap(),
                TypedValue::UintVal(42),
            )],
            delete: vec!["interface[name=ethernet-1/2]".parse().unwrap()],
            atomic: false,
        });

        let bytes = encode(&response).unwrap();
        assert_eq!(decode(&bytes).unwrap(), response);
    }

    fn double_response(value: f64) -> SubscribeResponse {
        SubscribeResponse::update(Notification {
            timestamp: 1,
            prefix: Some(Path::with_target("router1")),
            update: vec![Update::new("sensor/temperature".parse().unwrap(), TypedValue::DoubleVal(value))],
            ..Default::default()
        })
    }

    fn decoded_double(value: f64) -> f64 {
        let bytes = encode(&double_response(value)).unwrap();
        let decoded = decode(&bytes).unwrap();
        match decoded.notification().unwrap().update[0].val {
            Some(TypedValue::DoubleVal(v)) => v,
            ref other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_doubles_survive() {
        assert!(decoded_double(f64::NAN).is_nan());
        assert_eq!(decoded_double(f64::INFINITY), f64::INFINITY);
        assert_eq!(decoded_double(f64::NEG_INFINITY), f64::NEG_INFINITY);
    }

    #[test]
    fn test_finite_doubles_are_exact() {
        for value in [0.1, -2.5, f64::MIN_POSITIVE, f64::MAX, 1.0 / 3.0, 5e-324] {
            assert_eq!(decoded_double(value).to_bits(), value.to_bits());
        }
    }

    #[test]
    fn test_unknown_double_text_is_rejected() {
        let bytes = encode(&double_response(f64::NAN)).unwrap();
        let text = String::from_utf8(bytes).unwrap().replace("\"NaN\"", "\"nope\"");
        assert!(matches!(decode(text.as_bytes()), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_decode_empty_payload() {
        assert!(matches!(decode(&[]), Err(CodecError::Empty)));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode(b"\x00\x01not json"), Err(CodecError::Decode(_))));
        assert!(matches!(decode(br#"{"response": {"unknown": 1}}"#), Err(CodecError::Decode(_))));
    }
}
