//! FrameCodec: decodes a plaintext frame buffer into a typed payload.
//!
//! The wire format is a small protobuf message with exactly one of nine
//! optional submessage fields set. Rather than generate message structs with
//! `protobuf-codegen` at build time, this module reads the wire format
//! directly with `protobuf::CodedInputStream` — the schema is flat enough
//! that a hand-written reader is simpler than wiring up a protoc step for a
//! single binary. See DESIGN.md for the field-number table this relies on.
use protobuf::rt::WireType;
use protobuf::CodedInputStream;

use crate::attachment::AttachmentDescriptor;

/// Read a field tag and split it into (field number, wire type).
///
/// `protobuf::CodedInputStream::read_tag_unpack` is crate-private in the
/// `protobuf` version pinned here, so this reimplements it on top of the
/// public `read_raw_varint32` using the same bit layout the crate uses
/// internally (low 3 bits are the wire type, the rest is the field number).
fn read_tag_unpack(is: &mut CodedInputStream) -> protobuf::Result<(u32, WireType)> {
    let value = is.read_raw_varint32()?;
    let wire_type = WireType::new(value & 0x7).ok_or_else(|| {
        protobuf::Error::from(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid wire type",
        ))
    })?;
    Ok((value >> 3, wire_type))
}

/// Discriminant for a decoded frame, independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameType {
    Header,
    Statement,
    Preference,
    Attachment,
    Version,
    End,
    Avatar,
    Sticker,
    KeyValue,
}

/// A single statement parameter, typed the way `rusqlite` expects bound
/// parameters — this crate never executes the statement itself.
pub type SqlParameter = rusqlite::types::Value;

/// A decoded `KeyValue` value, one of the six kinds the wire format allows.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValueKind {
    Blob(Vec<u8>),
    Bool(bool),
    Float(f32),
    Integer(i32),
    Long(i64),
    String(String),
}

/// A fully decoded frame payload.
#[derive(Debug, Clone)]
pub enum Frame {
    /// The unencrypted bootstrap frame: salt and IV seed for key derivation.
    Header { salt: Vec<u8>, iv_seed: Vec<u8> },
    Statement {
        statement: String,
        parameters: Vec<SqlParameter>,
    },
    Preference {
        file: String,
        key: String,
        value: Option<String>,
    },
    Attachment {
        row_id: u64,
        attachment_id: u64,
        data_length: u32,
        descriptor: Option<AttachmentDescriptor>,
    },
    Version { version: u32 },
    End,
    Avatar {
        name: String,
        data_length: u32,
        descriptor: Option<AttachmentDescriptor>,
    },
    Sticker {
        row_id: u64,
        data_length: u32,
        descriptor: Option<AttachmentDescriptor>,
    },
    KeyValue {
        key: String,
        value: Option<KeyValueKind>,
    },
}

impl Frame {
    /// The type discriminant for this frame, independent of payload.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Header { .. } => FrameType::Header,
            Frame::Statement { .. } => FrameType::Statement,
            Frame::Preference { .. } => FrameType::Preference,
            Frame::Attachment { .. } => FrameType::Attachment,
            Frame::Version { .. } => FrameType::Version,
            Frame::End => FrameType::End,
            Frame::Avatar { .. } => FrameType::Avatar,
            Frame::Sticker { .. } => FrameType::Sticker,
            Frame::KeyValue { .. } => FrameType::KeyValue,
        }
    }

    /// Size of the trailing ciphertext blob this frame declares, if any.
    /// Non-zero only for `Attachment`, `Avatar`, and `Sticker`.
    pub fn attachment_size(&self) -> u32 {
        match self {
            Frame::Attachment { data_length, .. }
            | Frame::Avatar { data_length, .. }
            | Frame::Sticker { data_length, .. } => *data_length,
            _ => 0,
        }
    }

    /// Structural validity check: required fields present, sizes sane.
    /// This is distinct from MAC verification — a frame can pass `validate`
    /// and still have failed its MAC, and vice versa during resync probing.
    pub fn validate(&self) -> bool {
        match self {
            Frame::Header { salt, iv_seed } => salt.len() == 16 && iv_seed.len() == 16,
            Frame::Statement { statement, .. } => !statement.is_empty(),
            Frame::Preference { file, key, .. } => !file.is_empty() && !key.is_empty(),
            Frame::Attachment { .. } => true,
            Frame::Version { .. } => true,
            Frame::End => true,
            Frame::Avatar { name, .. } => !name.is_empty(),
            Frame::Sticker { .. } => true,
            // A KeyValue frame with no value set represents deletion of
            // that key, not a malformed frame.
            Frame::KeyValue { key, .. } => !key.is_empty(),
        }
    }

    /// Attach a lazily-decryptable handle to this frame's trailing blob.
    /// Panics if called on a variant without an attachment tail — callers
    /// only invoke this after checking `attachment_size() > 0`.
    pub fn set_descriptor(&mut self, d: AttachmentDescriptor) {
        match self {
            Frame::Attachment { descriptor, .. }
            | Frame::Avatar { descriptor, .. }
            | Frame::Sticker { descriptor, .. } => *descriptor = Some(d),
            _ => panic!("cannot attach a descriptor to a frame variant without one"),
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Header { salt, iv_seed } => write!(
                f,
                "Header (salt: {} bytes, iv_seed: {} bytes)",
                salt.len(),
                iv_seed.len()
            ),
            Frame::Statement { statement, .. } => write!(f, "Statement ({statement:.40})"),
            Frame::Preference { file, key, .. } => write!(f, "Preference ({file}/{key})"),
            Frame::Attachment { data_length, .. } => write!(f, "Attachment (size: {data_length})"),
            Frame::Version { version } => write!(f, "Version ({version})"),
            Frame::End => write!(f, "End"),
            Frame::Avatar { data_length, .. } => write!(f, "Avatar (size: {data_length})"),
            Frame::Sticker { data_length, .. } => write!(f, "Sticker (size: {data_length})"),
            Frame::KeyValue { key, .. } => write!(f, "KeyValue ({key})"),
        }
    }
}

/// Field numbers of the outer `BackupFrame` message; exactly one must be
/// set on any given frame.
mod field {
    pub const HEADER: u32 = 1;
    pub const STATEMENT: u32 = 2;
    pub const PREFERENCE: u32 = 3;
    pub const ATTACHMENT: u32 = 4;
    pub const VERSION: u32 = 5;
    pub const END: u32 = 6;
    pub const AVATAR: u32 = 7;
    pub const STICKER: u32 = 8;
    pub const KEY_VALUE: u32 = 9;
}

/// The frame failed to decode into any recognised variant, or set a number
/// of fields other than exactly one. Distinct from a MAC failure: this is
/// what `FrameReader` turns into `InvalidFrame` when the MAC was good, or a
/// `BadMac` error when it wasn't.
#[derive(Debug)]
pub struct UnparseableFrame;

impl std::convert::TryFrom<&[u8]> for Frame {
    type Error = UnparseableFrame;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let mut is = CodedInputStream::from_bytes(data);
        let mut set_fields: u32 = 0;
        let mut result: Option<Frame> = None;

        while !is.eof().map_err(|_| UnparseableFrame)? {
            let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
            match field_number {
                field::HEADER => {
                    set_fields += 1;
                    let bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                    result = Some(decode_header(&bytes)?);
                }
                field::STATEMENT => {
                    set_fields += 1;
                    let bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                    result = Some(decode_statement(&bytes)?);
                }
                field::PREFERENCE => {
                    set_fields += 1;
                    let bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                    result = Some(decode_preference(&bytes)?);
                }
                field::ATTACHMENT => {
                    set_fields += 1;
                    let bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                    result = Some(decode_attachment(&bytes)?);
                }
                field::VERSION => {
                    set_fields += 1;
                    let bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                    result = Some(decode_version(&bytes)?);
                }
                field::END => {
                    set_fields += 1;
                    let _bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                    result = Some(Frame::End);
                }
                field::AVATAR => {
                    set_fields += 1;
                    let bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                    result = Some(decode_avatar(&bytes)?);
                }
                field::STICKER => {
                    set_fields += 1;
                    let bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                    result = Some(decode_sticker(&bytes)?);
                }
                field::KEY_VALUE => {
                    set_fields += 1;
                    let bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                    result = Some(decode_key_value(&bytes)?);
                }
                _ => {
                    is.skip_field(wire_type).map_err(|_| UnparseableFrame)?;
                }
            }
        }

        if set_fields != 1 {
            return Err(UnparseableFrame);
        }
        result.ok_or(UnparseableFrame)
    }
}

mod header_field {
    pub const IV: u32 = 1;
    pub const SALT: u32 = 2;
}

fn decode_header(data: &[u8]) -> Result<Frame, UnparseableFrame> {
    let mut is = CodedInputStream::from_bytes(data);
    let mut salt = Vec::new();
    let mut iv_seed = Vec::new();
    while !is.eof().map_err(|_| UnparseableFrame)? {
        let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
        match field_number {
            header_field::IV => iv_seed = is.read_bytes().map_err(|_| UnparseableFrame)?,
            header_field::SALT => salt = is.read_bytes().map_err(|_| UnparseableFrame)?,
            _ => is.skip_field(wire_type).map_err(|_| UnparseableFrame)?,
        }
    }
    Ok(Frame::Header { salt, iv_seed })
}

mod statement_field {
    pub const STATEMENT: u32 = 1;
    pub const PARAMETERS: u32 = 2;
}

mod parameter_field {
    pub const STRING: u32 = 1;
    pub const INTEGER: u32 = 2;
    pub const DOUBLE: u32 = 3;
    pub const BLOB: u32 = 4;
    pub const NULL: u32 = 5;
}

fn decode_statement(data: &[u8]) -> Result<Frame, UnparseableFrame> {
    let mut is = CodedInputStream::from_bytes(data);
    let mut statement = String::new();
    let mut parameters = Vec::new();
    while !is.eof().map_err(|_| UnparseableFrame)? {
        let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
        match field_number {
            statement_field::STATEMENT => {
                statement = is.read_string().map_err(|_| UnparseableFrame)?;
            }
            statement_field::PARAMETERS => {
                let bytes = is.read_bytes().map_err(|_| UnparseableFrame)?;
                parameters.push(decode_parameter(&bytes)?);
            }
            _ => is.skip_field(wire_type).map_err(|_| UnparseableFrame)?,
        }
    }
    Ok(Frame::Statement {
        statement,
        parameters,
    })
}

fn decode_parameter(data: &[u8]) -> Result<SqlParameter, UnparseableFrame> {
    let mut is = CodedInputStream::from_bytes(data);
    let mut value: Option<SqlParameter> = None;
    while !is.eof().map_err(|_| UnparseableFrame)? {
        let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
        match field_number {
            parameter_field::STRING => {
                value = Some(is.read_string().map_err(|_| UnparseableFrame)?.into());
            }
            parameter_field::INTEGER => {
                value = Some(is.read_int64().map_err(|_| UnparseableFrame)?.into());
            }
            parameter_field::DOUBLE => {
                value = Some(is.read_double().map_err(|_| UnparseableFrame)?.into());
            }
            parameter_field::BLOB => {
                value = Some(is.read_bytes().map_err(|_| UnparseableFrame)?.into());
            }
            parameter_field::NULL => {
                let _ = is.read_bool().map_err(|_| UnparseableFrame)?;
                value = Some(rusqlite::types::Value::Null);
            }
            _ => is.skip_field(wire_type).map_err(|_| UnparseableFrame)?,
        }
    }
    value.ok_or(UnparseableFrame)
}

mod preference_field {
    pub const FILE: u32 = 1;
    pub const KEY: u32 = 2;
    pub const VALUE: u32 = 3;
}

fn decode_preference(data: &[u8]) -> Result<Frame, UnparseableFrame> {
    let mut is = CodedInputStream::from_bytes(data);
    let mut file = String::new();
    let mut key = String::new();
    let mut value = None;
    while !is.eof().map_err(|_| UnparseableFrame)? {
        let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
        match field_number {
            preference_field::FILE => file = is.read_string().map_err(|_| UnparseableFrame)?,
            preference_field::KEY => key = is.read_string().map_err(|_| UnparseableFrame)?,
            preference_field::VALUE => {
                value = Some(is.read_string().map_err(|_| UnparseableFrame)?)
            }
            _ => is.skip_field(wire_type).map_err(|_| UnparseableFrame)?,
        }
    }
    Ok(Frame::Preference { file, key, value })
}

mod attachment_field {
    pub const ROW_ID: u32 = 1;
    pub const ATTACHMENT_ID: u32 = 2;
    pub const LENGTH: u32 = 3;
}

fn decode_attachment(data: &[u8]) -> Result<Frame, UnparseableFrame> {
    let mut is = CodedInputStream::from_bytes(data);
    let mut row_id = 0;
    let mut attachment_id = 0;
    let mut data_length = 0;
    while !is.eof().map_err(|_| UnparseableFrame)? {
        let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
        match field_number {
            attachment_field::ROW_ID => row_id = is.read_uint64().map_err(|_| UnparseableFrame)?,
            attachment_field::ATTACHMENT_ID => {
                attachment_id = is.read_uint64().map_err(|_| UnparseableFrame)?
            }
            attachment_field::LENGTH => {
                data_length = is.read_uint32().map_err(|_| UnparseableFrame)?
            }
            _ => is.skip_field(wire_type).map_err(|_| UnparseableFrame)?,
        }
    }
    Ok(Frame::Attachment {
        row_id,
        attachment_id,
        data_length,
        descriptor: None,
    })
}

mod version_field {
    pub const VERSION: u32 = 1;
}

fn decode_version(data: &[u8]) -> Result<Frame, UnparseableFrame> {
    let mut is = CodedInputStream::from_bytes(data);
    let mut version = 0;
    while !is.eof().map_err(|_| UnparseableFrame)? {
        let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
        match field_number {
            version_field::VERSION => version = is.read_uint32().map_err(|_| UnparseableFrame)?,
            _ => is.skip_field(wire_type).map_err(|_| UnparseableFrame)?,
        }
    }
    Ok(Frame::Version { version })
}

mod avatar_field {
    pub const NAME: u32 = 1;
    pub const LENGTH: u32 = 2;
}

fn decode_avatar(data: &[u8]) -> Result<Frame, UnparseableFrame> {
    let mut is = CodedInputStream::from_bytes(data);
    let mut name = String::new();
    let mut data_length = 0;
    while !is.eof().map_err(|_| UnparseableFrame)? {
        let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
        match field_number {
            avatar_field::NAME => name = is.read_string().map_err(|_| UnparseableFrame)?,
            avatar_field::LENGTH => data_length = is.read_uint32().map_err(|_| UnparseableFrame)?,
            _ => is.skip_field(wire_type).map_err(|_| UnparseableFrame)?,
        }
    }
    Ok(Frame::Avatar {
        name,
        data_length,
        descriptor: None,
    })
}

mod sticker_field {
    pub const ROW_ID: u32 = 1;
    pub const LENGTH: u32 = 2;
}

fn decode_sticker(data: &[u8]) -> Result<Frame, UnparseableFrame> {
    let mut is = CodedInputStream::from_bytes(data);
    let mut row_id = 0;
    let mut data_length = 0;
    while !is.eof().map_err(|_| UnparseableFrame)? {
        let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
        match field_number {
            sticker_field::ROW_ID => row_id = is.read_uint64().map_err(|_| UnparseableFrame)?,
            sticker_field::LENGTH => data_length = is.read_uint32().map_err(|_| UnparseableFrame)?,
            _ => is.skip_field(wire_type).map_err(|_| UnparseableFrame)?,
        }
    }
    Ok(Frame::Sticker {
        row_id,
        data_length,
        descriptor: None,
    })
}

mod key_value_field {
    pub const KEY: u32 = 1;
    pub const BLOB_VALUE: u32 = 2;
    pub const BOOLEAN_VALUE: u32 = 3;
    pub const FLOAT_VALUE: u32 = 4;
    pub const INTEGER_VALUE: u32 = 5;
    pub const LONG_VALUE: u32 = 6;
    pub const STRING_VALUE: u32 = 7;
}

fn decode_key_value(data: &[u8]) -> Result<Frame, UnparseableFrame> {
    let mut is = CodedInputStream::from_bytes(data);
    let mut key = String::new();
    let mut value = None;
    while !is.eof().map_err(|_| UnparseableFrame)? {
        let (field_number, wire_type) = read_tag_unpack(&mut is).map_err(|_| UnparseableFrame)?;
        match field_number {
            key_value_field::KEY => key = is.read_string().map_err(|_| UnparseableFrame)?,
            key_value_field::BLOB_VALUE => {
                value = Some(KeyValueKind::Blob(is.read_bytes().map_err(|_| UnparseableFrame)?))
            }
            key_value_field::BOOLEAN_VALUE => {
                value = Some(KeyValueKind::Bool(is.read_bool().map_err(|_| UnparseableFrame)?))
            }
            key_value_field::FLOAT_VALUE => {
                value = Some(KeyValueKind::Float(is.read_float().map_err(|_| UnparseableFrame)?))
            }
            key_value_field::INTEGER_VALUE => {
                value = Some(KeyValueKind::Integer(
                    is.read_int32().map_err(|_| UnparseableFrame)?,
                ))
            }
            key_value_field::LONG_VALUE => {
                value = Some(KeyValueKind::Long(is.read_int64().map_err(|_| UnparseableFrame)?))
            }
            key_value_field::STRING_VALUE => {
                value = Some(KeyValueKind::String(
                    is.read_string().map_err(|_| UnparseableFrame)?,
                ))
            }
            _ => is.skip_field(wire_type).map_err(|_| UnparseableFrame)?,
        }
    }
    Ok(Frame::KeyValue { key, value })
}

/// Minimal manual protobuf encoder for building test fixtures, shared by
/// this module's own tests and by other modules' tests that need frame
/// bytes on the wire — the mirror image of the manual decoder above, kept
/// test-only since this crate has no encode path.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub(crate) fn encode_header_frame(salt: &[u8], iv_seed: &[u8]) -> Vec<u8> {
        let mut inner = Vec::new();
        write_tag(&mut inner, header_field::IV, 2);
        write_bytes(&mut inner, iv_seed);
        write_tag(&mut inner, header_field::SALT, 2);
        write_bytes(&mut inner, salt);

        let mut outer = Vec::new();
        write_tag(&mut outer, field::HEADER, 2);
        write_bytes(&mut outer, &inner);
        outer
    }

    pub(crate) fn encode_end_frame() -> Vec<u8> {
        let mut outer = Vec::new();
        write_tag(&mut outer, field::END, 2);
        write_bytes(&mut outer, &[]);
        outer
    }

    pub(crate) fn encode_version_frame(version: u32) -> Vec<u8> {
        let mut inner = Vec::new();
        write_tag(&mut inner, version_field::VERSION, 0);
        write_varint(&mut inner, version as u64);

        let mut outer = Vec::new();
        write_tag(&mut outer, field::VERSION, 2);
        write_bytes(&mut outer, &inner);
        outer
    }

    pub(crate) fn encode_attachment_frame(row_id: u64, attachment_id: u64, length: u32) -> Vec<u8> {
        let mut inner = Vec::new();
        write_tag(&mut inner, attachment_field::ROW_ID, 0);
        write_varint(&mut inner, row_id);
        write_tag(&mut inner, attachment_field::ATTACHMENT_ID, 0);
        write_varint(&mut inner, attachment_id);
        write_tag(&mut inner, attachment_field::LENGTH, 0);
        write_varint(&mut inner, length as u64);

        let mut outer = Vec::new();
        write_tag(&mut outer, field::ATTACHMENT, 2);
        write_bytes(&mut outer, &inner);
        outer
    }

    fn write_tag(buf: &mut Vec<u8>, field_number: u32, wire_type: u32) {
        write_varint(buf, ((field_number as u64) << 3) | wire_type as u64);
    }

    fn write_varint(buf: &mut Vec<u8>, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                buf.push(byte);
                break;
            }
            buf.push(byte | 0x80);
        }
    }

    fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
        write_varint(buf, data.len() as u64);
        buf.extend_from_slice(data);
    }
}
