//! Binary encoding of value lists
//!
//! Wire format (all multi-byte integers in the writer's byte order, flagged
//! by `BIG_ENDIAN` in each list header):
//! ```text
//! List header (19 bytes):
//!   [1 byte:  magic 0x6c]
//!   [1 byte:  version 0]
//!   [1 byte:  flags (IGNORE_CASE | NO_UNIQUE | BIG_ENDIAN)]
//!   [8 bytes: descriptor count of this list, nested lists included]
//!   [8 bytes: bytes remaining in the buffer after this header]
//!
//! Pair (19 byte header + name + payload):
//!   [1 byte:  type tag]
//!   [2 bytes: name size, including the NUL]
//!   [8 bytes: payload size]
//!   [8 bytes: item count (arrays)]
//!   [name bytes, NUL]
//!   [payload]
//! ```
//!
//! A nested list pair has an empty payload and is followed inline by the
//! nested header, its pairs, and an `UP` pair with an empty name. Each
//! element of a list array is followed by an `ARRAY_NEXT` pair instead.
//! Descriptor payloads are 8-byte indexes into the descriptors that travel
//! next to the bytes.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use super::{ListFlags, NAME_MAX, Value, ValueList};
use crate::error::ListError;

pub(crate) const HEADER_SIZE: usize = 19;
const PAIR_HEADER_SIZE: usize = 19;

const HEADER_MAGIC: u8 = 0x6c;
const HEADER_VERSION: u8 = 0x00;
const FLAG_BIG_ENDIAN: u8 = 0x80;
const FLAG_ALL: u8 = FLAG_BIG_ENDIAN | ListFlags::all().bits();

const MAX_DEPTH: usize = 128;

const TYPE_NULL: u8 = 1;
const TYPE_BOOL: u8 = 2;
const TYPE_NUMBER: u8 = 3;
const TYPE_STRING: u8 = 4;
const TYPE_NVLIST: u8 = 5;
const TYPE_DESCRIPTOR: u8 = 6;
const TYPE_BINARY: u8 = 7;
const TYPE_BOOL_ARRAY: u8 = 8;
const TYPE_NUMBER_ARRAY: u8 = 9;
const TYPE_STRING_ARRAY: u8 = 10;
const TYPE_NVLIST_ARRAY: u8 = 11;
const TYPE_DESCRIPTOR_ARRAY: u8 = 12;
const TYPE_NVLIST_ARRAY_NEXT: u8 = 254;
const TYPE_NVLIST_UP: u8 = 255;

/// An encoded list plus the descriptors its payload refers to by index
#[derive(Debug)]
pub struct Packed<'a> {
    pub bytes: Vec<u8>,
    pub descriptors: Vec<BorrowedFd<'a>>,
}

/// Header fields a receiver needs before the body arrives
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderInfo {
    pub descriptors: u64,
    pub size: u64,
}

/// Validate a standalone list header, as read off a socket
pub(crate) fn parse_header(bytes: &[u8; HEADER_SIZE]) -> Result<HeaderInfo, ListError> {
    let flags = bytes[2];
    if bytes[0] != HEADER_MAGIC || bytes[1] != HEADER_VERSION || flags & !FLAG_ALL != 0 {
        return Err(ListError::Malformed);
    }
    let big_endian = flags & FLAG_BIG_ENDIAN != 0;
    Ok(HeaderInfo {
        descriptors: read_u64(&bytes[3..11], big_endian),
        size: read_u64(&bytes[11..19], big_endian),
    })
}

fn read_u64(bytes: &[u8], big_endian: bool) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    if big_endian {
        u64::from_be_bytes(raw)
    } else {
        u64::from_le_bytes(raw)
    }
}

pub(crate) fn pack(list: &ValueList) -> Result<Packed<'_>, ListError> {
    let mut writer = Writer::default();
    writer.list(list)?;

    let Writer {
        mut buf,
        headers,
        descriptors,
    } = writer;

    // Every header records the bytes left in the whole buffer after it.
    let total = buf.len();
    for offset in headers {
        let size = (total - offset - HEADER_SIZE) as u64;
        buf[offset + 11..offset + 19].copy_from_slice(&size.to_ne_bytes());
    }

    Ok(Packed {
        bytes: buf,
        descriptors,
    })
}

#[derive(Default)]
struct Writer<'a> {
    buf: Vec<u8>,
    headers: Vec<usize>,
    descriptors: Vec<BorrowedFd<'a>>,
}

impl<'a> Writer<'a> {
    fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    fn header(&mut self, list: &ValueList) {
        let mut flags = list.flags().bits();
        if cfg!(target_endian = "big") {
            flags |= FLAG_BIG_ENDIAN;
        }
        self.headers.push(self.buf.len());
        self.buf.push(HEADER_MAGIC);
        self.buf.push(HEADER_VERSION);
        self.buf.push(flags);
        self.u64(list.descriptor_count() as u64);
        // Patched once the total length is known
        self.u64(0);
    }

    fn pair_header(&mut self, tag: u8, name: &str, datasize: usize, nitems: usize) {
        self.buf.push(tag);
        self.buf
            .extend_from_slice(&((name.len() + 1) as u16).to_ne_bytes());
        self.u64(datasize as u64);
        self.u64(nitems as u64);
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
    }

    fn descriptor(&mut self, fd: &'a OwnedFd) {
        let index = self.descriptors.len() as u64;
        self.descriptors.push(fd.as_fd());
        self.u64(index);
    }

    fn list(&mut self, list: &'a ValueList) -> Result<(), ListError> {
        if let Some(err) = list.error() {
            return Err(err);
        }
        self.header(list);
        for (name, value) in list.iter() {
            self.pair(name, value)?;
        }
        Ok(())
    }

    fn pair(&mut self, name: &str, value: &'a Value) -> Result<(), ListError> {
        match value {
            Value::Null => self.pair_header(TYPE_NULL, name, 0, 0),
            Value::Bool(v) => {
                self.pair_header(TYPE_BOOL, name, 1, 0);
                self.buf.push(u8::from(*v));
            }
            Value::Number(v) => {
                self.pair_header(TYPE_NUMBER, name, 8, 0);
                self.u64(*v as u64);
            }
            Value::String(v) => {
                self.pair_header(TYPE_STRING, name, v.len() + 1, 0);
                self.buf.extend_from_slice(v.as_bytes());
                self.buf.push(0);
            }
            Value::List(nested) => {
                self.pair_header(TYPE_NVLIST, name, 0, 0);
                self.list(nested)?;
                self.pair_header(TYPE_NVLIST_UP, "", 0, 0);
            }
            Value::Descriptor(fd) => {
                self.pair_header(TYPE_DESCRIPTOR, name, 8, 0);
                self.descriptor(fd);
            }
            Value::Binary(v) => {
                self.pair_header(TYPE_BINARY, name, v.len(), 0);
                self.buf.extend_from_slice(v);
            }
            Value::BoolArray(v) => {
                self.pair_header(TYPE_BOOL_ARRAY, name, v.len(), v.len());
                self.buf.extend(v.iter().map(|b| u8::from(*b)));
            }
            Value::NumberArray(v) => {
                self.pair_header(TYPE_NUMBER_ARRAY, name, v.len() * 8, v.len());
                for n in v {
                    self.u64(*n as u64);
                }
            }
            Value::StringArray(v) => {
                let datasize = v.iter().map(|s| s.len() + 1).sum();
                self.pair_header(TYPE_STRING_ARRAY, name, datasize, v.len());
                for s in v {
                    self.buf.extend_from_slice(s.as_bytes());
                    self.buf.push(0);
                }
            }
            Value::ListArray(v) => {
                self.pair_header(TYPE_NVLIST_ARRAY, name, 0, v.len());
                for element in v {
                    self.list(element)?;
                    self.pair_header(TYPE_NVLIST_ARRAY_NEXT, "", 0, 0);
                }
            }
            Value::DescriptorArray(v) => {
                self.pair_header(TYPE_DESCRIPTOR_ARRAY, name, v.len() * 8, v.len());
                for fd in v {
                    self.descriptor(fd);
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn unpack(bytes: &[u8], descriptors: Vec<OwnedFd>) -> Result<ValueList, ListError> {
    let mut reader = Reader {
        buf: bytes,
        pos: 0,
        big_endian: false,
        descriptors: descriptors.into_iter().map(Some).collect(),
    };
    reader.list(Frame::Root, 0)
}

/// Where a list sits, which decides how its pair sequence must end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    /// Ends with the buffer
    Root,
    /// Ends with an `UP` pair
    Nested,
    /// Ends with an `ARRAY_NEXT` pair
    ArrayElement,
}

struct PairHeader<'a> {
    tag: u8,
    name: &'a str,
    datasize: usize,
    nitems: usize,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    big_endian: bool,
    descriptors: Vec<Option<OwnedFd>>,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ListError> {
        if len > self.remaining() {
            return Err(ListError::Malformed);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ListError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ListError> {
        let bytes = self.take(2)?;
        let raw = [bytes[0], bytes[1]];
        Ok(if self.big_endian {
            u16::from_be_bytes(raw)
        } else {
            u16::from_le_bytes(raw)
        })
    }

    fn u64(&mut self) -> Result<u64, ListError> {
        let bytes = self.take(8)?;
        Ok(read_u64(bytes, self.big_endian))
    }

    fn usize(&mut self) -> Result<usize, ListError> {
        usize::try_from(self.u64()?).map_err(|_| ListError::Malformed)
    }

    fn header(&mut self) -> Result<ListFlags, ListError> {
        let magic = self.u8()?;
        let version = self.u8()?;
        let flags = self.u8()?;
        if magic != HEADER_MAGIC || version != HEADER_VERSION || flags & !FLAG_ALL != 0 {
            return Err(ListError::Malformed);
        }
        self.big_endian = flags & FLAG_BIG_ENDIAN != 0;

        let descriptors = self.u64()?;
        let size = self.u64()?;
        if size != self.remaining() as u64 || descriptors > self.descriptors.len() as u64 {
            return Err(ListError::Malformed);
        }
        Ok(ListFlags::from_bits_truncate(flags))
    }

    fn pair_header(&mut self) -> Result<PairHeader<'a>, ListError> {
        if self.remaining() < PAIR_HEADER_SIZE {
            return Err(ListError::Malformed);
        }
        let tag = self.u8()?;
        let namesize = usize::from(self.u16()?);
        let datasize = self.usize()?;
        let nitems = self.usize()?;
        if namesize == 0 || namesize > NAME_MAX {
            return Err(ListError::Malformed);
        }

        let raw = self.take(namesize)?;
        let (terminator, name) = raw.split_last().ok_or(ListError::Malformed)?;
        if *terminator != 0 || name.contains(&0) {
            return Err(ListError::Malformed);
        }
        let name = std::str::from_utf8(name).map_err(|_| ListError::Malformed)?;

        Ok(PairHeader {
            tag,
            name,
            datasize,
            nitems,
        })
    }

    fn descriptor(&mut self) -> Result<OwnedFd, ListError> {
        let index = usize::try_from(self.u64()?).map_err(|_| ListError::Malformed)?;
        self.descriptors
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(ListError::Malformed)
    }

    fn list(&mut self, frame: Frame, depth: usize) -> Result<ValueList, ListError> {
        if depth > MAX_DEPTH {
            return Err(ListError::Malformed);
        }
        let flags = self.header()?;
        let mut list = ValueList::with_flags(flags);

        loop {
            if self.remaining() == 0 {
                return match frame {
                    Frame::Root => Ok(list),
                    Frame::Nested | Frame::ArrayElement => Err(ListError::Malformed),
                };
            }

            let pair = self.pair_header()?;
            match (pair.tag, frame) {
                (TYPE_NVLIST_UP, Frame::Nested) | (TYPE_NVLIST_ARRAY_NEXT, Frame::ArrayElement) => {
                    if !pair.name.is_empty() || pair.datasize != 0 {
                        return Err(ListError::Malformed);
                    }
                    return Ok(list);
                }
                (TYPE_NVLIST_UP | TYPE_NVLIST_ARRAY_NEXT, _) => return Err(ListError::Malformed),
                _ => {
                    let name = pair.name.to_string();
                    let value = self.value(&pair, depth)?;
                    list.push(name, value)?;
                }
            }
        }
    }

    fn value(&mut self, pair: &PairHeader<'a>, depth: usize) -> Result<Value, ListError> {
        let datasize = pair.datasize;
        let nitems = pair.nitems;
        let value = match pair.tag {
            TYPE_NULL => {
                expect(datasize == 0)?;
                Value::Null
            }
            TYPE_BOOL => {
                expect(datasize == 1)?;
                Value::Bool(self.bool()?)
            }
            TYPE_NUMBER => {
                expect(datasize == 8)?;
                Value::Number(self.u64()? as i64)
            }
            TYPE_STRING => {
                expect(datasize > 0)?;
                Value::String(self.string(datasize)?)
            }
            TYPE_NVLIST => Value::List(self.list(Frame::Nested, depth + 1)?),
            TYPE_DESCRIPTOR => {
                expect(datasize == 8)?;
                Value::Descriptor(self.descriptor()?)
            }
            TYPE_BINARY => {
                expect(datasize > 0)?;
                Value::Binary(self.take(datasize)?.to_vec())
            }
            TYPE_BOOL_ARRAY => {
                expect(nitems > 0 && datasize == nitems && datasize <= self.remaining())?;
                let mut values = Vec::with_capacity(nitems);
                for _ in 0..nitems {
                    values.push(self.bool()?);
                }
                Value::BoolArray(values)
            }
            TYPE_NUMBER_ARRAY => {
                expect(array_fits(nitems, datasize, 8, self.remaining()))?;
                let mut values = Vec::with_capacity(nitems);
                for _ in 0..nitems {
                    values.push(self.u64()? as i64);
                }
                Value::NumberArray(values)
            }
            TYPE_STRING_ARRAY => {
                expect(nitems > 0)?;
                let raw = self.take(datasize)?;
                let (terminator, body) = raw.split_last().ok_or(ListError::Malformed)?;
                expect(*terminator == 0)?;
                let values = body
                    .split(|b| *b == 0)
                    .map(|s| String::from_utf8(s.to_vec()).map_err(|_| ListError::Malformed))
                    .collect::<Result<Vec<_>, _>>()?;
                expect(values.len() == nitems)?;
                Value::StringArray(values)
            }
            TYPE_NVLIST_ARRAY => {
                // Each element needs at least a header; refuse absurd counts early.
                expect(nitems > 0 && nitems <= self.remaining() / HEADER_SIZE)?;
                let mut values = Vec::with_capacity(nitems);
                for _ in 0..nitems {
                    values.push(self.list(Frame::ArrayElement, depth + 1)?);
                }
                Value::ListArray(values)
            }
            TYPE_DESCRIPTOR_ARRAY => {
                expect(array_fits(nitems, datasize, 8, self.remaining()))?;
                let mut values = Vec::with_capacity(nitems);
                for _ in 0..nitems {
                    values.push(self.descriptor()?);
                }
                Value::DescriptorArray(values)
            }
            _ => return Err(ListError::Malformed),
        };
        Ok(value)
    }

    fn bool(&mut self) -> Result<bool, ListError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ListError::Malformed),
        }
    }

    fn string(&mut self, datasize: usize) -> Result<String, ListError> {
        let raw = self.take(datasize)?;
        let (terminator, body) = raw.split_last().ok_or(ListError::Malformed)?;
        if *terminator != 0 || body.contains(&0) {
            return Err(ListError::Malformed);
        }
        String::from_utf8(body.to_vec()).map_err(|_| ListError::Malformed)
    }
}

fn expect(condition: bool) -> Result<(), ListError> {
    if condition {
        Ok(())
    } else {
        Err(ListError::Malformed)
    }
}

fn array_fits(nitems: usize, datasize: usize, width: usize, remaining: usize) -> bool {
    nitems > 0 && nitems.checked_mul(width) == Some(datasize) && datasize <= remaining
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    fn roundtrip(list: &ValueList) -> ValueList {
        let bytes = list.serialize().unwrap();
        ValueList::deserialize(&bytes)
    }

    #[test]
    fn test_scalar_roundtrip() {
        let list = ValueList::new()
            .with("none", Value::Null)
            .with("flag", true)
            .with("uid", -5i64)
            .with("name", "alice")
            .with("blob", vec![0u8, 1, 2, 255]);

        let decoded = roundtrip(&list);
        assert!(!decoded.is_errored());
        assert!(decoded.is_null("none").unwrap());
        assert!(decoded.get_bool("flag").unwrap());
        assert_eq!(decoded.get_number("uid").unwrap(), -5);
        assert_eq!(decoded.get_string("name").unwrap(), "alice");
        assert_eq!(decoded.get_binary("blob").unwrap(), &[0, 1, 2, 255]);
        let keys: Vec<&str> = decoded.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["none", "flag", "uid", "name", "blob"]);
    }

    #[test]
    fn test_nested_and_arrays_roundtrip() {
        let inner = ValueList::new()
            .with("depth", 2)
            .with("leaf", ValueList::new().with("x", "y"));
        let list = ValueList::new()
            .with("inner", inner)
            .with("after", "tail")
            .with("bools", vec![true, false, true])
            .with("numbers", vec![1i64, -2, 3])
            .with("strings", vec!["a", "", "ccc"])
            .with(
                "lists",
                vec![
                    ValueList::new().with("i", 0),
                    ValueList::new(),
                    ValueList::new().with("i", 2),
                ],
            );

        let decoded = roundtrip(&list);
        assert!(!decoded.is_errored(), "{:?}", decoded.error());
        let inner = decoded.get_list("inner").unwrap();
        assert_eq!(inner.get_number("depth").unwrap(), 2);
        assert_eq!(inner.get_list("leaf").unwrap().get_string("x").unwrap(), "y");
        assert_eq!(decoded.get_string("after").unwrap(), "tail");

        match decoded.lookup("strings").unwrap() {
            Value::StringArray(v) => assert_eq!(v, &["a", "", "ccc"]),
            other => panic!("unexpected {other:?}"),
        }
        match decoded.lookup("lists").unwrap() {
            Value::ListArray(v) => {
                assert_eq!(v.len(), 3);
                assert_eq!(v[0].get_number("i").unwrap(), 0);
                assert!(v[1].is_empty());
                assert_eq!(v[2].get_number("i").unwrap(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_header_layout() {
        let list = ValueList::new().with("n", 7);
        let bytes = list.serialize().unwrap();

        // header + pair header + "n\0" + 8 byte number
        assert_eq!(bytes.len(), HEADER_SIZE + PAIR_HEADER_SIZE + 2 + 8);
        assert_eq!(bytes[0], HEADER_MAGIC);
        assert_eq!(bytes[1], HEADER_VERSION);
        let info = parse_header(bytes[..HEADER_SIZE].try_into().unwrap()).unwrap();
        assert_eq!(info.descriptors, 0);
        assert_eq!(info.size as usize, bytes.len() - HEADER_SIZE);
        assert_eq!(bytes[HEADER_SIZE], TYPE_NUMBER);
    }

    #[test]
    fn test_flags_survive() {
        let list = ValueList::with_flags(ListFlags::NO_UNIQUE)
            .with("k", 1)
            .with("k", 2);
        let decoded = roundtrip(&list);
        assert_eq!(decoded.flags(), ListFlags::NO_UNIQUE);
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_big_endian_input() {
        // {"n": 1} as a big-endian writer lays it out
        let mut bytes = vec![HEADER_MAGIC, HEADER_VERSION, FLAG_BIG_ENDIAN];
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&((PAIR_HEADER_SIZE + 2 + 8) as u64).to_be_bytes());
        bytes.push(TYPE_NUMBER);
        bytes.extend_from_slice(&2u16.to_be_bytes());
        bytes.extend_from_slice(&8u64.to_be_bytes());
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(b"n\0");
        bytes.extend_from_slice(&1u64.to_be_bytes());

        let decoded = ValueList::deserialize(&bytes);
        assert_eq!(decoded.get_number("n").unwrap(), 1);
    }

    #[test]
    fn test_truncated_input_is_errored() {
        let bytes = ValueList::new()
            .with("name", "alice")
            .with("uid", 1000)
            .serialize()
            .unwrap();
        for len in 0..bytes.len() {
            let decoded = ValueList::deserialize(&bytes[..len]);
            assert_eq!(decoded.error(), Some(ListError::Malformed), "prefix {len}");
        }
    }

    #[test]
    fn test_bad_magic_and_flags() {
        let mut bytes = ValueList::new().with("a", 1).serialize().unwrap();
        bytes[0] = 0x6d;
        assert!(ValueList::deserialize(&bytes).is_errored());

        let mut bytes = ValueList::new().with("a", 1).serialize().unwrap();
        bytes[2] |= 0x10;
        assert!(ValueList::deserialize(&bytes).is_errored());
    }

    #[test]
    fn test_bad_bool_byte() {
        let mut bytes = ValueList::new().with("b", true).serialize().unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 2;
        assert!(ValueList::deserialize(&bytes).is_errored());
    }

    #[test]
    fn test_stray_up_rejected() {
        let mut bytes = ValueList::new().serialize().unwrap();
        bytes.push(TYPE_NVLIST_UP);
        bytes.extend_from_slice(&1u16.to_ne_bytes());
        bytes.extend_from_slice(&0u64.to_ne_bytes());
        bytes.extend_from_slice(&0u64.to_ne_bytes());
        bytes.push(0);
        let size = (bytes.len() - HEADER_SIZE) as u64;
        bytes[11..19].copy_from_slice(&size.to_ne_bytes());
        assert!(ValueList::deserialize(&bytes).is_errored());
    }

    #[test]
    fn test_duplicate_keys_on_wire_rejected() {
        let bytes = ValueList::with_flags(ListFlags::NO_UNIQUE)
            .with("k", 1)
            .with("k", 2)
            .serialize()
            .unwrap();
        // Clear NO_UNIQUE so the reader enforces unique keys
        let mut bytes = bytes;
        bytes[2] &= !ListFlags::NO_UNIQUE.bits();
        assert_eq!(
            ValueList::deserialize(&bytes).error(),
            Some(ListError::DuplicateKey)
        );
    }

    #[test]
    fn test_descriptors_roundtrip() {
        let (a, _a_peer) = UnixStream::pair().unwrap();
        let (b, _b_peer) = UnixStream::pair().unwrap();
        let list = ValueList::new()
            .with("first", OwnedFd::from(a))
            .with("nested", ValueList::new().with("second", OwnedFd::from(b)));

        let packed = list.pack().unwrap();
        assert_eq!(packed.descriptors.len(), 2);
        let info = parse_header(packed.bytes[..HEADER_SIZE].try_into().unwrap()).unwrap();
        assert_eq!(info.descriptors, 2);

        let dups: Vec<OwnedFd> = packed
            .descriptors
            .iter()
            .map(|fd| fd.try_clone_to_owned().unwrap())
            .collect();
        let raw: Vec<i32> = dups.iter().map(|fd| fd.as_raw_fd()).collect();

        let decoded = ValueList::unpack(&packed.bytes, dups);
        assert!(!decoded.is_errored());
        assert_eq!(decoded.get_descriptor("first").unwrap().as_raw_fd(), raw[0]);
        let nested = decoded.get_list("nested").unwrap();
        assert_eq!(nested.get_descriptor("second").unwrap().as_raw_fd(), raw[1]);
    }

    #[test]
    fn test_missing_descriptors_rejected() {
        let (a, _peer) = UnixStream::pair().unwrap();
        let list = ValueList::new().with("sock", OwnedFd::from(a));
        let packed = list.pack().unwrap();
        let decoded = ValueList::unpack(&packed.bytes, Vec::new());
        assert_eq!(decoded.error(), Some(ListError::Malformed));
    }

    #[test]
    fn test_excessive_nesting_rejected() {
        let mut list = ValueList::new().with("leaf", 1);
        for _ in 0..=MAX_DEPTH {
            list = ValueList::new().with("child", list);
        }
        let bytes = list.serialize().unwrap();
        assert!(ValueList::deserialize(&bytes).is_errored());
    }
}
