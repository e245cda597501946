//! Tag-numbered record encoding
//!
//! Every persisted record is a schema version byte followed by a flat sequence of
//! elements. Nested structures (keyset credential slots) are elements whose value is
//! itself an element sequence without the version byte.
//!
//! Element layout:
//!   Tag(1) | Type(1) | Length(2,BE) | Value(Length)
//!
//! Tag numbers are part of the on-disk contract: new fields get new tags, existing
//! tags are never renumbered. Decoders skip tags they do not know.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Record schema version (always 0x01)
pub const SCHEMA_VERSION: u8 = 0x01;

/// Element header size: tag + type + length
const HEADER_LEN: usize = 4;

/// Element value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    UnsignedInt = 0x00,
    ByteString = 0x01,
    Utf8String = 0x02,
    Structure = 0x03,
}

impl TryFrom<u8> for ElementType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(ElementType::UnsignedInt),
            0x01 => Ok(ElementType::ByteString),
            0x02 => Ok(ElementType::Utf8String),
            0x03 => Ok(ElementType::Structure),
            _ => Err(Error::internal(format!("unknown element type: 0x{:02x}", value))),
        }
    }
}

#[derive(Debug, Clone)]
struct Element {
    tag: u8,
    kind: ElementType,
    value: Bytes,
}

/// Builds an encoded record
#[derive(Debug)]
pub struct TlvWriter {
    buf: BytesMut,
}

impl TlvWriter {
    /// Start a top-level record (writes the schema version)
    pub fn record() -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(SCHEMA_VERSION);
        Self { buf }
    }

    fn nested() -> Self {
        Self {
            buf: BytesMut::with_capacity(32),
        }
    }

    fn put_element(&mut self, tag: u8, kind: ElementType, value: &[u8]) {
        debug_assert!(value.len() <= u16::MAX as usize);
        self.buf.put_u8(tag);
        self.buf.put_u8(kind as u8);
        self.buf.put_u16(value.len() as u16);
        self.buf.put_slice(value);
    }

    /// Unsigned integers are written with the smallest of 1, 2, 4 or 8 bytes
    pub fn put_uint(&mut self, tag: u8, value: u64) {
        if let Ok(v) = u8::try_from(value) {
            self.put_element(tag, ElementType::UnsignedInt, &[v]);
        } else if let Ok(v) = u16::try_from(value) {
            self.put_element(tag, ElementType::UnsignedInt, &v.to_be_bytes());
        } else if let Ok(v) = u32::try_from(value) {
            self.put_element(tag, ElementType::UnsignedInt, &v.to_be_bytes());
        } else {
            self.put_element(tag, ElementType::UnsignedInt, &value.to_be_bytes());
        }
    }

    pub fn put_bytes(&mut self, tag: u8, value: &[u8]) {
        self.put_element(tag, ElementType::ByteString, value);
    }

    pub fn put_str(&mut self, tag: u8, value: &str) {
        self.put_element(tag, ElementType::Utf8String, value.as_bytes());
    }

    /// Write a nested structure built by `build`
    pub fn put_struct(&mut self, tag: u8, build: impl FnOnce(&mut TlvWriter)) {
        let mut inner = TlvWriter::nested();
        build(&mut inner);
        self.put_element(tag, ElementType::Structure, &inner.buf);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Parsed view over an encoded record or nested structure
#[derive(Debug, Clone)]
pub struct TlvReader {
    elements: Vec<Element>,
}

impl TlvReader {
    /// Parse a top-level record, checking the schema version
    pub fn parse_record(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::internal("empty record"));
        }
        let mut buf = data;
        let version = buf.get_u8();
        if version == 0 || version > SCHEMA_VERSION {
            return Err(Error::internal(format!(
                "unsupported record schema version: 0x{:02x}",
                version
            )));
        }
        Self::parse(Bytes::copy_from_slice(buf))
    }

    fn parse(mut buf: Bytes) -> Result<Self> {
        let mut elements = Vec::new();
        while buf.has_remaining() {
            if buf.remaining() < HEADER_LEN {
                return Err(Error::internal(format!(
                    "truncated element header: {} bytes left",
                    buf.remaining()
                )));
            }
            let tag = buf.get_u8();
            let kind = ElementType::try_from(buf.get_u8())?;
            let len = buf.get_u16() as usize;
            if buf.remaining() < len {
                return Err(Error::internal(format!(
                    "element tag {} declares {} bytes, only {} available",
                    tag,
                    len,
                    buf.remaining()
                )));
            }
            let value = buf.split_to(len);
            elements.push(Element { tag, kind, value });
        }
        Ok(Self { elements })
    }

    fn element(&self, tag: u8, kind: ElementType) -> Result<&Element> {
        let element = self
            .elements
            .iter()
            .find(|e| e.tag == tag)
            .ok_or_else(|| Error::internal(format!("missing tag {}", tag)))?;
        if element.kind != kind {
            return Err(Error::internal(format!(
                "tag {} expected {:?}, found {:?}",
                tag, kind, element.kind
            )));
        }
        Ok(element)
    }

    /// True when the record carries `tag`, for fields added after the first schema
    pub fn has(&self, tag: u8) -> bool {
        self.elements.iter().any(|e| e.tag == tag)
    }

    pub fn uint(&self, tag: u8) -> Result<u64> {
        let value = &self.element(tag, ElementType::UnsignedInt)?.value;
        match value.len() {
            1 => Ok(value[0] as u64),
            2 => Ok(u16::from_be_bytes([value[0], value[1]]) as u64),
            4 => Ok(u32::from_be_bytes([value[0], value[1], value[2], value[3]]) as u64),
            8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(value);
                Ok(u64::from_be_bytes(raw))
            }
            n => Err(Error::internal(format!("tag {} has invalid integer width {}", tag, n))),
        }
    }

    pub fn u8(&self, tag: u8) -> Result<u8> {
        let value = self.uint(tag)?;
        u8::try_from(value).map_err(|_| Error::internal(format!("tag {} value {} overflows u8", tag, value)))
    }

    pub fn u16(&self, tag: u8) -> Result<u16> {
        let value = self.uint(tag)?;
        u16::try_from(value).map_err(|_| Error::internal(format!("tag {} value {} overflows u16", tag, value)))
    }

    pub fn bytes(&self, tag: u8) -> Result<&[u8]> {
        Ok(&self.element(tag, ElementType::ByteString)?.value)
    }

    /// Fixed-length byte string
    pub fn array<const N: usize>(&self, tag: u8) -> Result<[u8; N]> {
        let value = self.bytes(tag)?;
        value.try_into().map_err(|_| {
            Error::internal(format!("tag {} expected {} bytes, found {}", tag, N, value.len()))
        })
    }

    pub fn str(&self, tag: u8) -> Result<&str> {
        let value = &self.element(tag, ElementType::Utf8String)?.value;
        std::str::from_utf8(value).map_err(|e| Error::internal(format!("tag {} is not UTF-8: {}", tag, e)))
    }

    /// All nested structures carrying `tag`, in encoding order
    pub fn structs(&self, tag: u8) -> Result<Vec<TlvReader>> {
        self.elements
            .iter()
            .filter(|e| e.tag == tag)
            .map(|e| {
                if e.kind != ElementType::Structure {
                    return Err(Error::internal(format!(
                        "tag {} expected Structure, found {:?}",
                        tag, e.kind
                    )));
                }
                TlvReader::parse(e.value.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_fields_read_back() {
        let mut w = TlvWriter::record();
        w.put_uint(1, 7);
        w.put_uint(2, 0xFFFF);
        w.put_uint(3, u64::MAX);
        w.put_str(4, "Lights");
        w.put_bytes(5, &[0xAA, 0xBB]);
        let data = w.finish();

        assert_eq!(data[0], SCHEMA_VERSION);
        // Tag(1) Type(1) Len(2) Value(1)
        assert_eq!(&data[1..6], &[0x01, 0x00, 0x00, 0x01, 0x07]);

        let r = TlvReader::parse_record(&data).unwrap();
        assert_eq!(r.u8(1).unwrap(), 7);
        assert_eq!(r.u16(2).unwrap(), 0xFFFF);
        assert_eq!(r.uint(3).unwrap(), u64::MAX);
        assert_eq!(r.str(4).unwrap(), "Lights");
        assert_eq!(r.array::<2>(5).unwrap(), [0xAA, 0xBB]);
    }

    #[test]
    fn test_nested_structures_keep_order() {
        let mut w = TlvWriter::record();
        for i in 0..3u64 {
            w.put_struct(4, |s| {
                s.put_uint(1, i * 100);
            });
        }
        let r = TlvReader::parse_record(&w.finish()).unwrap();
        let slots = r.structs(4).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[2].uint(1).unwrap(), 200);
    }

    #[test]
    fn test_unknown_tags_are_skipped() {
        let mut w = TlvWriter::record();
        w.put_uint(1, 3);
        w.put_str(99, "added in a later schema");
        let r = TlvReader::parse_record(&w.finish()).unwrap();
        assert_eq!(r.u16(1).unwrap(), 3);
    }

    #[test]
    fn test_missing_or_mistyped_tag_is_internal_error() {
        let mut w = TlvWriter::record();
        w.put_str(1, "not a number");
        let r = TlvReader::parse_record(&w.finish()).unwrap();
        assert!(matches!(r.uint(1), Err(Error::Internal(_))));
        assert!(matches!(r.uint(2), Err(Error::Internal(_))));
    }

    #[test]
    fn test_has_reports_present_tags() {
        let mut w = TlvWriter::record();
        w.put_uint(1, 0);
        let r = TlvReader::parse_record(&w.finish()).unwrap();
        assert!(r.has(1));
        assert!(!r.has(8));
    }

    #[test]
    fn test_overflowing_narrow_read_fails() {
        let mut w = TlvWriter::record();
        w.put_uint(1, 300);
        let r = TlvReader::parse_record(&w.finish()).unwrap();
        assert!(r.u8(1).is_err());
        assert_eq!(r.u16(1).unwrap(), 300);
    }

    #[test]
    fn test_truncated_record_fails() {
        let mut w = TlvWriter::record();
        w.put_bytes(1, &[1, 2, 3, 4]);
        let data = w.finish();
        assert!(TlvReader::parse_record(&data[..data.len() - 1]).is_err());
        assert!(TlvReader::parse_record(&[]).is_err());
        assert!(TlvReader::parse_record(&[0x02]).is_err());
    }
}
