//! Frame encoder/decoder
//!
//! ```text
//! 0     4        5             9        10      11        12         16
//! +-----+--------+-------------+--------+-------+---------+----------+------+
//! |magic|version | full length | type   | codec | compress| sequence | body |
//! +-----+--------+-------------+--------+-------+---------+----------+------+
//! ```
//!
//! All integers are big-endian. `full length` counts the header.

use crate::compress::{Compress, CompressKind};
use crate::protocol::{
    Envelope, MessageType, Payload, HEAD_LENGTH, MAGIC_NUMBER, MAX_FRAME_LENGTH, VERSION,
};
use crate::serializer::{Serializer, SerializerKind};
use bytes::{Buf, BufMut, BytesMut};
use minirpc_core::{Error, PluginRegistry, Result};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

const LENGTH_OFFSET: usize = 5;

/// Length-prefixed codec for [`Envelope`]s
///
/// Serializers and compressors are resolved through the plugin registry by
/// the ids in each frame header. Each instance numbers the frames it encodes.
#[derive(Clone)]
pub struct WireCodec {
    plugins: Arc<PluginRegistry>,
    max_frame_length: usize,
    next_sequence: u32,
}

impl WireCodec {
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self::with_max_frame_length(plugins, MAX_FRAME_LENGTH)
    }

    /// Codec accepting frames up to `max_frame_length` bytes
    ///
    /// The bound is clamped to what the 32-bit length field can carry.
    pub fn with_max_frame_length(plugins: Arc<PluginRegistry>, max_frame_length: usize) -> Self {
        Self {
            plugins,
            max_frame_length: max_frame_length.clamp(HEAD_LENGTH, u32::MAX as usize),
            next_sequence: 0,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    fn serializer(&self, code: u8) -> Result<Arc<dyn Serializer>> {
        let kind = SerializerKind::from_code(code)
            .ok_or_else(|| Error::Protocol(format!("unknown serializer id {:#04x}", code)))?;
        self.plugins.resolve::<dyn Serializer>(kind.name())
    }

    fn compressor(&self, code: u8) -> Result<Arc<dyn Compress>> {
        let kind = CompressKind::from_code(code)
            .ok_or_else(|| Error::Protocol(format!("unknown compressor id {:#04x}", code)))?;
        self.plugins.resolve::<dyn Compress>(kind.name())
    }

    fn encode_body(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let serialized = match &envelope.payload {
            Payload::Ping | Payload::Pong => return Ok(Vec::new()),
            Payload::Request(request) => self.serializer(envelope.codec)?.serialize_request(request)?,
            Payload::Response(response) => {
                self.serializer(envelope.codec)?.serialize_response(response)?
            }
        };
        self.compressor(envelope.compression)?.compress(&serialized)
    }

    fn decode_body(
        &self,
        message_type: MessageType,
        codec: u8,
        compression: u8,
        body: &[u8],
    ) -> Result<Payload> {
        match message_type {
            MessageType::HeartbeatPing => return Ok(Payload::Ping),
            MessageType::HeartbeatPong => return Ok(Payload::Pong),
            _ => {}
        }

        if body.is_empty() {
            return Err(Error::Protocol(format!("{:?} frame without a body", message_type)));
        }

        let body = self
            .compressor(compression)?
            .decompress(body, self.max_frame_length)?;
        let serializer = self.serializer(codec)?;

        match message_type {
            MessageType::Request => Ok(Payload::Request(serializer.deserialize_request(&body)?)),
            _ => Ok(Payload::Response(serializer.deserialize_response(&body)?)),
        }
    }
}

impl Encoder<Envelope> for WireCodec {
    type Error = Error;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<()> {
        let body = self.encode_body(&envelope)?;
        let full_length = HEAD_LENGTH + body.len();
        if full_length > self.max_frame_length {
            return Err(Error::FrameTooLarge {
                length: full_length,
                max: self.max_frame_length,
            });
        }

        let sequence_id = envelope.sequence_id.unwrap_or_else(|| {
            let id = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);
            id
        });

        dst.reserve(full_length);
        dst.put_slice(&MAGIC_NUMBER);
        dst.put_u8(VERSION);
        let length_at = dst.len();
        dst.put_u32(0);
        dst.put_u8(envelope.message_type().as_u8());
        dst.put_u8(envelope.codec);
        dst.put_u8(envelope.compression);
        dst.put_u32(sequence_id);
        dst.put_slice(&body);

        // Patch the length once the body is in place
        dst[length_at..length_at + 4].copy_from_slice(&(full_length as u32).to_be_bytes());

        trace!(
            "Encoded {:?} frame #{} ({} bytes)",
            envelope.message_type(),
            sequence_id,
            full_length
        );
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = Envelope;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        // Reject a bad peer as soon as the offending bytes arrive
        let magic_len = src.len().min(MAGIC_NUMBER.len());
        if src[..magic_len] != MAGIC_NUMBER[..magic_len] {
            let mut magic = [0u8; 4];
            magic[..magic_len].copy_from_slice(&src[..magic_len]);
            return Err(Error::MagicMismatch(magic));
        }
        if src.len() > MAGIC_NUMBER.len() && src[MAGIC_NUMBER.len()] != VERSION {
            return Err(Error::VersionMismatch(src[MAGIC_NUMBER.len()]));
        }

        if src.len() < HEAD_LENGTH {
            src.reserve(HEAD_LENGTH - src.len());
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[LENGTH_OFFSET..LENGTH_OFFSET + 4]);
        let full_length = u32::from_be_bytes(length_bytes) as usize;

        if full_length < HEAD_LENGTH {
            return Err(Error::Protocol(format!(
                "frame length {} is shorter than the header",
                full_length
            )));
        }
        if full_length > self.max_frame_length {
            return Err(Error::FrameTooLarge {
                length: full_length,
                max: self.max_frame_length,
            });
        }
        if src.len() < full_length {
            src.reserve(full_length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(full_length);
        frame.advance(LENGTH_OFFSET + 4);
        let type_code = frame.get_u8();
        let codec = frame.get_u8();
        let compression = frame.get_u8();
        let sequence_id = frame.get_u32();

        let message_type = MessageType::from_u8(type_code)
            .ok_or_else(|| Error::Protocol(format!("unknown message type {}", type_code)))?;
        let payload = self.decode_body(message_type, codec, compression, &frame)?;

        trace!("Decoded {:?} frame #{} ({} bytes)", message_type, sequence_id, full_length);
        Ok(Some(Envelope {
            codec,
            compression,
            sequence_id: Some(sequence_id),
            payload,
        }))
    }
}
