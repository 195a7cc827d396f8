//! RPC protocol definitions

use minirpc_core::{Error, Result};
use minirpc_net::Routable;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag opening every frame
pub const MAGIC_NUMBER: [u8; 4] = *b"grpc";

/// Protocol version spoken by this implementation
pub const VERSION: u8 = 1;

/// Fixed header size
pub const HEAD_LENGTH: usize = 16;

/// Default upper bound on a frame, header included
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Heartbeat sentinels
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";

/// Frame message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    HeartbeatPing = 3,
    HeartbeatPong = 4,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Request),
            2 => Some(MessageType::Response),
            3 => Some(MessageType::HeartbeatPing),
            4 => Some(MessageType::HeartbeatPong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Heartbeat frames carry no body
    pub fn is_heartbeat(self) -> bool {
        matches!(self, MessageType::HeartbeatPing | MessageType::HeartbeatPong)
    }
}

/// Self-describing argument and return value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

/// Type descriptor used for method signature matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Bool,
    I64,
    U64,
    F64,
    String,
    Bytes,
    List,
    Map,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::I64(_) => ValueType::I64,
            Value::U64(_) => ValueType::U64,
            Value::F64(_) => ValueType::F64,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(n) => write!(f, "{}", n),
            Value::U64(n) => write!(f, "{}", n),
            Value::F64(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(bytes) => {
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Rust types that travel as a [`Value`] of a fixed [`ValueType`]
pub trait RpcValue: Sized {
    const VALUE_TYPE: ValueType;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self>;
}

macro_rules! rpc_value {
    ($ty:ty, $variant:ident) => {
        impl RpcValue for $ty {
            const VALUE_TYPE: ValueType = ValueType::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::$variant(inner) => Ok(inner),
                    other => Err(Error::InvalidArguments(format!(
                        "expected {}, got {}",
                        ValueType::$variant,
                        other.value_type()
                    ))),
                }
            }
        }
    };
}

rpc_value!(bool, Bool);
rpc_value!(i64, I64);
rpc_value!(u64, U64);
rpc_value!(f64, F64);
rpc_value!(String, String);
rpc_value!(Vec<u8>, Bytes);

impl RpcValue for () {
    const VALUE_TYPE: ValueType = ValueType::Null;

    fn into_value(self) -> Value {
        Value::Null
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(()),
            other => Err(Error::InvalidArguments(format!(
                "expected Null, got {}",
                other.value_type()
            ))),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::I64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Logical service identity: interface, group and version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub interface: String,
    pub group: String,
    pub version: String,
}

impl ServiceKey {
    pub fn new(interface: impl Into<String>, group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            group: group.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.interface, self.group, self.version)
    }
}

/// A call to one method of a remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub correlation_id: String,
    pub service_name: String,
    pub method_name: String,
    pub param_types: Vec<ValueType>,
    pub parameters: Vec<Value>,
}

impl Request {
    /// Build a request whose parameter types are taken from the values
    pub fn new(
        correlation_id: impl Into<String>,
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        parameters: Vec<Value>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            service_name: service_name.into(),
            method_name: method_name.into(),
            param_types: parameters.iter().map(Value::value_type).collect(),
            parameters,
        }
    }
}

impl Routable for Request {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn routing_key(&self) -> String {
        let params: Vec<String> = self.parameters.iter().map(Value::to_string).collect();
        format!("{}[{}]", self.service_name, params.join(", "))
    }
}

/// Response status carried in [`Response::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    Fail,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Success => 200,
            StatusCode::Fail => 500,
        }
    }
}

/// Outcome of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub correlation_id: String,
    pub status: StatusCode,
    pub message: String,
    pub data: Option<Value>,
}

impl Response {
    pub fn success(correlation_id: impl Into<String>, data: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: StatusCode::Success,
            message: "The remote call is successful".to_string(),
            data: Some(data),
        }
    }

    pub fn fail(correlation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: StatusCode::Fail,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusCode::Success
    }
}

/// Frame contents
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Request(Request),
    Response(Response),
    Ping,
    Pong,
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Request(_) => MessageType::Request,
            Payload::Response(_) => MessageType::Response,
            Payload::Ping => MessageType::HeartbeatPing,
            Payload::Pong => MessageType::HeartbeatPong,
        }
    }

    /// Sentinel text for heartbeat payloads
    pub fn sentinel(&self) -> Option<&'static str> {
        match self {
            Payload::Ping => Some(PING),
            Payload::Pong => Some(PONG),
            _ => None,
        }
    }
}

/// Wire-level message
///
/// `sequence_id` is assigned by the encoding connection when `None`; decoded
/// envelopes always carry the value read from the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub codec: u8,
    pub compression: u8,
    pub sequence_id: Option<u32>,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(codec: u8, compression: u8, payload: Payload) -> Self {
        Self {
            codec,
            compression,
            sequence_id: None,
            payload,
        }
    }

    pub fn request(codec: u8, compression: u8, request: Request) -> Self {
        Self::new(codec, compression, Payload::Request(request))
    }

    pub fn response(codec: u8, compression: u8, response: Response) -> Self {
        Self::new(codec, compression, Payload::Response(response))
    }

    pub fn ping(codec: u8, compression: u8) -> Self {
        Self::new(codec, compression, Payload::Ping)
    }

    /// Pong answering a ping, echoing its sequence id
    pub fn pong_for(ping: &Envelope) -> Self {
        Self {
            codec: ping.codec,
            compression: ping.compression,
            sequence_id: ping.sequence_id,
            payload: Payload::Pong,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Correlation id of the request or response inside, if any
    pub fn correlation_id(&self) -> Option<&str> {
        match &self.payload {
            Payload::Request(r) => Some(&r.correlation_id),
            Payload::Response(r) => Some(&r.correlation_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes() {
        for t in [
            MessageType::Request,
            MessageType::Response,
            MessageType::HeartbeatPing,
            MessageType::HeartbeatPong,
        ] {
            assert_eq!(MessageType::from_u8(t.as_u8()), Some(t));
        }
        assert_eq!(MessageType::Request.as_u8(), 1);
        assert_eq!(MessageType::HeartbeatPong.as_u8(), 4);
        assert!(MessageType::from_u8(0).is_none());
        assert!(MessageType::HeartbeatPing.is_heartbeat());
        assert!(!MessageType::Response.is_heartbeat());
    }

    #[test]
    fn test_request_param_types() {
        let request = Request::new("r1", "Hello:g1:v1", "hello", vec!["ping".into(), Value::I64(3)]);
        assert_eq!(request.param_types, vec![ValueType::String, ValueType::I64]);
    }

    #[test]
    fn test_routing_key_includes_arguments() {
        let a = Request::new("r1", "Hello:g1:v1", "hello", vec!["ping".into()]);
        let b = Request::new("r2", "Hello:g1:v1", "hello", vec!["pong".into()]);
        let c = Request::new("r3", "Hello:g1:v1", "other", vec!["ping".into()]);
        assert_eq!(a.routing_key(), "Hello:g1:v1[ping]");
        assert_ne!(a.routing_key(), b.routing_key());
        // Correlation id and method do not affect routing
        assert_eq!(a.routing_key(), c.routing_key());
    }

    #[test]
    fn test_service_key() {
        assert_eq!(ServiceKey::new("Hello", "g1", "v1").to_string(), "Hello:g1:v1");
    }

    #[test]
    fn test_rpc_value_conversions() {
        assert_eq!(String::from_value("x".into()).unwrap(), "x");
        assert_eq!(42i64.into_value(), Value::I64(42));
        assert!(matches!(bool::from_value(Value::I64(1)), Err(Error::InvalidArguments(_))));
        assert_eq!(<Vec<u8>>::VALUE_TYPE, ValueType::Bytes);
    }

    #[test]
    fn test_value_display() {
        let value = Value::Map(vec![
            ("a".into(), Value::List(vec![Value::I64(1), Value::Null])),
            ("b".into(), Value::Bytes(vec![0xde, 0xad])),
        ]);
        assert_eq!(value.to_string(), "{a: [1, null], b: dead}");
    }

    #[test]
    fn test_response_constructors() {
        let ok = Response::success("r1", "pong".into());
        assert!(ok.is_success());
        assert_eq!(ok.status.code(), 200);

        let failed = Response::fail("r1", "boom");
        assert!(!failed.is_success());
        assert_eq!(failed.status.code(), 500);
        assert!(failed.data.is_none());
    }

    #[test]
    fn test_pong_echoes_sequence() {
        let mut ping = Envelope::ping(3, 1);
        ping.sequence_id = Some(41);
        let pong = Envelope::pong_for(&ping);
        assert_eq!(pong.sequence_id, Some(41));
        assert_eq!(pong.message_type(), MessageType::HeartbeatPong);
        assert_eq!(pong.payload.sentinel(), Some(PONG));
    }
}
