//! Body serializers

use crate::protocol::{Request, Response, Value};
use minirpc_core::{Capability, Error, Result};

/// Serializer identifiers carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SerializerKind {
    Json = 0x01,
    MessagePack = 0x02,
    Bincode = 0x03,
}

impl SerializerKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(SerializerKind::Json),
            0x02 => Some(SerializerKind::MessagePack),
            0x03 => Some(SerializerKind::Bincode),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(SerializerKind::Json),
            "msgpack" => Some(SerializerKind::MessagePack),
            "bincode" => Some(SerializerKind::Bincode),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Extension name the codec resolves for this id
    pub fn name(self) -> &'static str {
        match self {
            SerializerKind::Json => "json",
            SerializerKind::MessagePack => "msgpack",
            SerializerKind::Bincode => "bincode",
        }
    }
}

/// Converts requests and responses to and from frame bodies
pub trait Serializer: Send + Sync {
    fn kind(&self) -> SerializerKind;

    fn serialize_request(&self, request: &Request) -> Result<Vec<u8>>;

    fn deserialize_request(&self, bytes: &[u8]) -> Result<Request>;

    fn serialize_response(&self, response: &Response) -> Result<Vec<u8>>;

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Response>;
}

impl Capability for dyn Serializer {
    const NAME: &'static str = "serializer";
}

fn ser_error(format: &str, e: impl std::fmt::Display) -> Error {
    Error::Serialization(format!("{} serialization failed: {}", format, e))
}

fn de_error(format: &str, e: impl std::fmt::Display) -> Error {
    Error::Serialization(format!("{} deserialization failed: {}", format, e))
}

fn non_finite_in(value: &Value) -> Option<f64> {
    match value {
        Value::F64(f) if !f.is_finite() => Some(*f),
        Value::List(items) => items.iter().find_map(non_finite_in),
        Value::Map(entries) => entries.iter().find_map(|(_, v)| non_finite_in(v)),
        _ => None,
    }
}

/// First NaN or infinite float among `values`, searching nested values
pub(crate) fn first_non_finite<'a>(values: impl IntoIterator<Item = &'a Value>) -> Option<f64> {
    values.into_iter().find_map(non_finite_in)
}

/// JSON writes non-finite floats as `null`, which cannot be read back
fn reject_non_finite<'a>(label: &str, values: impl IntoIterator<Item = &'a Value>) -> Result<()> {
    match first_non_finite(values) {
        Some(f) => Err(ser_error(label, format!("{} has no {} representation", f, label))),
        None => Ok(()),
    }
}

macro_rules! serde_serializer {
    ($name:ident, $kind:expr, $label:expr, $finite_only:expr, $to_vec:path, $from_slice:path) => {
        #[derive(Debug, Default)]
        pub struct $name;

        impl Serializer for $name {
            fn kind(&self) -> SerializerKind {
                $kind
            }

            fn serialize_request(&self, request: &Request) -> Result<Vec<u8>> {
                if $finite_only {
                    reject_non_finite($label, &request.parameters)?;
                }
                $to_vec(request).map_err(|e| ser_error($label, e))
            }

            fn deserialize_request(&self, bytes: &[u8]) -> Result<Request> {
                $from_slice(bytes).map_err(|e| de_error($label, e))
            }

            fn serialize_response(&self, response: &Response) -> Result<Vec<u8>> {
                if $finite_only {
                    reject_non_finite($label, &response.data)?;
                }
                $to_vec(response).map_err(|e| ser_error($label, e))
            }

            fn deserialize_response(&self, bytes: &[u8]) -> Result<Response> {
                $from_slice(bytes).map_err(|e| de_error($label, e))
            }
        }
    };
}

serde_serializer!(JsonSerializer, SerializerKind::Json, "JSON", true, serde_json::to_vec, serde_json::from_slice);
serde_serializer!(
    MessagePackSerializer,
    SerializerKind::MessagePack,
    "MessagePack",
    false,
    rmp_serde::to_vec_named,
    rmp_serde::from_slice
);
serde_serializer!(
    BincodeSerializer,
    SerializerKind::Bincode,
    "Bincode",
    false,
    bincode::serialize,
    bincode::deserialize
);

#[cfg(test)]
mod tests {
    use super::*;

    fn serializers() -> Vec<Box<dyn Serializer>> {
        vec![
            Box::new(JsonSerializer),
            Box::new(MessagePackSerializer),
            Box::new(BincodeSerializer),
        ]
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(SerializerKind::from_code(0x03), Some(SerializerKind::Bincode));
        assert_eq!(SerializerKind::from_name("msgpack").map(SerializerKind::code), Some(0x02));
        assert_eq!(SerializerKind::Json.name(), "json");
        assert!(SerializerKind::from_code(0x09).is_none());
    }

    #[test]
    fn test_nested_values_survive_every_format() {
        let request = Request::new(
            "r1",
            "Hello:g1:v1",
            "hello",
            vec![
                Value::Map(vec![("k".into(), Value::List(vec![Value::U64(u64::MAX), Value::Null]))]),
                Value::Bytes(vec![0, 1, 2]),
                Value::F64(1.5),
            ],
        );
        let response = Response::success("r1", Value::Bool(true));

        for serializer in serializers() {
            let bytes = serializer.serialize_request(&request).unwrap();
            assert_eq!(serializer.deserialize_request(&bytes).unwrap(), request);

            let bytes = serializer.serialize_response(&response).unwrap();
            assert_eq!(serializer.deserialize_response(&bytes).unwrap(), response);
        }
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        for serializer in serializers() {
            let err = serializer.deserialize_request(&[0xff, 0x00, 0x13]).err().unwrap();
            assert!(matches!(err, Error::Serialization(_)), "{:?}", serializer.kind());
        }
    }

    #[test]
    fn test_json_refuses_non_finite_floats() {
        let nested = Value::Map(vec![("ratio".into(), Value::List(vec![Value::F64(f64::INFINITY)]))]);
        let request = Request::new("r1", "Hello:g1:v1", "hello", vec![Value::I64(1), nested]);
        let err = JsonSerializer.serialize_request(&request).err().unwrap();
        assert!(matches!(err, Error::Serialization(ref m) if m.contains("inf")), "{}", err);

        let response = Response::success("r1", Value::F64(f64::NAN));
        assert!(matches!(
            JsonSerializer.serialize_response(&response),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_binary_formats_keep_non_finite_floats() {
        let request = Request::new(
            "r1",
            "Hello:g1:v1",
            "hello",
            vec![Value::F64(f64::INFINITY), Value::F64(f64::NEG_INFINITY)],
        );
        for serializer in [&MessagePackSerializer as &dyn Serializer, &BincodeSerializer] {
            let bytes = serializer.serialize_request(&request).unwrap();
            assert_eq!(serializer.deserialize_request(&bytes).unwrap(), request);
        }
    }
}
