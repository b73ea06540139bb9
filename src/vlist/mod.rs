//! Self-describing value lists
//!
//! A [`ValueList`] is the envelope for every exchange over a
//! [`Channel`](crate::Channel): an ordered sequence of `(key, value)` entries
//! carrying booleans, numbers, strings, binary blobs, nested lists, open
//! descriptors, and arrays of those.
//!
//! Lists carry a sticky error state. Once an insert, parse or receive fails
//! the list is marked errored and every later operation on it fails with
//! [`Error::Errored`] instead of working on partial data.
//!
//! Descriptor values own the underlying OS resource. Inserting one moves the
//! descriptor into the list, taking it moves it back out, and dropping the
//! list closes whatever it still holds.

pub(crate) mod wire;

use std::fmt;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use bitflags::bitflags;
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::{Error, ListError, Result};

pub use wire::Packed;

/// Longest key accepted, in bytes, including the terminating NUL on the wire.
pub const NAME_MAX: usize = 2048;

bitflags! {
    /// Public flags carried in every list header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ListFlags: u8 {
        /// Keys compare ASCII case-insensitively
        const IGNORE_CASE = 0x01;
        /// Duplicate keys are stored; lookups see the last one
        const NO_UNIQUE = 0x02;
    }
}

/// A single value stored in a [`ValueList`]
#[derive(Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Number(i64),
    String(String),
    List(ValueList),
    Descriptor(OwnedFd),
    Binary(Vec<u8>),
    BoolArray(Vec<bool>),
    NumberArray(Vec<i64>),
    StringArray(Vec<String>),
    ListArray(Vec<ValueList>),
    DescriptorArray(Vec<OwnedFd>),
}

impl Value {
    /// Name of the value's type, as used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Descriptor(_) => "descriptor",
            Value::Binary(_) => "binary",
            Value::BoolArray(_) => "bool array",
            Value::NumberArray(_) => "number array",
            Value::StringArray(_) => "string array",
            Value::ListArray(_) => "list array",
            Value::DescriptorArray(_) => "descriptor array",
        }
    }

    /// Number of descriptors held by this value, nested lists included
    pub fn descriptor_count(&self) -> usize {
        match self {
            Value::Descriptor(_) => 1,
            Value::DescriptorArray(fds) => fds.len(),
            Value::List(list) => list.descriptor_count(),
            Value::ListArray(lists) => lists.iter().map(ValueList::descriptor_count).sum(),
            _ => 0,
        }
    }

    fn validate(&self) -> std::result::Result<(), ListError> {
        let valid = match self {
            Value::String(s) => !s.contains('\0'),
            Value::Binary(b) => !b.is_empty(),
            Value::BoolArray(v) => !v.is_empty(),
            Value::NumberArray(v) => !v.is_empty(),
            Value::StringArray(v) => !v.is_empty() && v.iter().all(|s| !s.contains('\0')),
            Value::DescriptorArray(v) => !v.is_empty(),
            Value::List(list) => return list.check_nested(),
            Value::ListArray(lists) => {
                if lists.is_empty() {
                    false
                } else {
                    return lists.iter().try_for_each(ValueList::check_nested);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::Descriptor(_) => true,
        };
        if valid {
            Ok(())
        } else {
            Err(ListError::InvalidValue)
        }
    }

    /// Deep copy, duplicating any descriptors
    pub fn try_clone(&self) -> Result<Value> {
        Ok(match self {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            Value::Number(n) => Value::Number(*n),
            Value::String(s) => Value::String(s.clone()),
            Value::List(list) => Value::List(list.try_clone()?),
            Value::Descriptor(fd) => Value::Descriptor(dup(fd)?),
            Value::Binary(b) => Value::Binary(b.clone()),
            Value::BoolArray(v) => Value::BoolArray(v.clone()),
            Value::NumberArray(v) => Value::NumberArray(v.clone()),
            Value::StringArray(v) => Value::StringArray(v.clone()),
            Value::ListArray(v) => Value::ListArray(
                v.iter().map(ValueList::try_clone).collect::<Result<_>>()?,
            ),
            Value::DescriptorArray(v) => {
                Value::DescriptorArray(v.iter().map(dup).collect::<Result<_>>()?)
            }
        })
    }
}

fn dup(fd: &OwnedFd) -> Result<OwnedFd> {
    fd.try_clone()
        .map_err(|e| Error::Resource(format!("descriptor duplication failed: {e}")))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Number(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Binary(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<ValueList> for Value {
    fn from(v: ValueList) -> Self {
        Value::List(v)
    }
}

impl From<OwnedFd> for Value {
    fn from(v: OwnedFd) -> Self {
        Value::Descriptor(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::BoolArray(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::NumberArray(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::StringArray(v)
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::StringArray(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<ValueList>> for Value {
    fn from(v: Vec<ValueList>) -> Self {
        Value::ListArray(v)
    }
}

impl From<Vec<OwnedFd>> for Value {
    fn from(v: Vec<OwnedFd>) -> Self {
        Value::DescriptorArray(v)
    }
}

/// Ordered, self-describing key/value container with a sticky error state
#[derive(Debug, Default)]
pub struct ValueList {
    flags: ListFlags,
    entries: Vec<(String, Value)>,
    error: Option<ListError>,
}

impl ValueList {
    /// Create an empty list with unique, case-sensitive keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty list with the given flags
    pub fn with_flags(flags: ListFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }

    /// Create a list that is already in the error state
    pub fn errored(error: ListError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn flags(&self) -> ListFlags {
        self.flags
    }

    /// The sticky error, if any operation on this list has failed
    pub fn error(&self) -> Option<ListError> {
        self.error
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }

    /// Fail with [`Error::Errored`] if the list is errored
    pub fn check(&self) -> Result<()> {
        match self.error {
            Some(err) => Err(Error::Errored(err)),
            None => Ok(()),
        }
    }

    /// Convert an errored list into an error, passing healthy lists through
    pub fn into_result(self) -> Result<Self> {
        self.check()?;
        Ok(self)
    }

    fn check_nested(&self) -> std::result::Result<(), ListError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: ListError) -> ListError {
        if self.error.is_none() {
            self.error = Some(err);
        }
        err
    }

    fn key_eq(&self, a: &str, b: &str) -> bool {
        if self.flags.contains(ListFlags::IGNORE_CASE) {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().rposition(|(k, _)| self.key_eq(k, key))
    }

    /// Append an entry, marking the list errored on any failure
    pub(crate) fn push(
        &mut self,
        key: String,
        value: Value,
    ) -> std::result::Result<(), ListError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if key.is_empty() || key.len() >= NAME_MAX || key.contains('\0') {
            return Err(self.fail(ListError::InvalidKey));
        }
        if let Err(err) = value.validate() {
            return Err(self.fail(err));
        }
        if !self.flags.contains(ListFlags::NO_UNIQUE) && self.position(&key).is_some() {
            return Err(self.fail(ListError::DuplicateKey));
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// Insert `value` under `key`.
    ///
    /// Fails, and leaves the list errored, on an empty or over-long key, an
    /// invalid value, or a duplicate key in a unique list.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.push(key.into(), value.into()).map_err(Error::Errored)
    }

    /// Builder-style [`insert`](Self::insert); failures surface later as the
    /// list's error state.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.insert(key, value);
        self
    }

    /// Whether an entry exists under `key`. Errored lists contain nothing.
    pub fn contains(&self, key: &str) -> bool {
        self.error.is_none() && self.position(key).is_some()
    }

    /// Borrow the value stored under `key`
    pub fn lookup(&self, key: &str) -> Result<&Value> {
        self.check()?;
        self.position(key)
            .map(|idx| &self.entries[idx].1)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Remove and return the value stored under `key`
    pub fn take(&mut self, key: &str) -> Result<Value> {
        self.check()?;
        let idx = self
            .position(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        Ok(self.entries.remove(idx).1)
    }

    /// Remove the entry under `key`, dropping its value
    pub fn remove(&mut self, key: &str) -> Result<()> {
        self.take(key).map(drop)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.lookup(key)? {
            Value::Bool(v) => Ok(*v),
            other => Err(mismatch(key, "bool", other)),
        }
    }

    pub fn get_number(&self, key: &str) -> Result<i64> {
        match self.lookup(key)? {
            Value::Number(v) => Ok(*v),
            other => Err(mismatch(key, "number", other)),
        }
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.lookup(key)? {
            Value::String(v) => Ok(v),
            other => Err(mismatch(key, "string", other)),
        }
    }

    pub fn get_binary(&self, key: &str) -> Result<&[u8]> {
        match self.lookup(key)? {
            Value::Binary(v) => Ok(v),
            other => Err(mismatch(key, "binary", other)),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<&ValueList> {
        match self.lookup(key)? {
            Value::List(v) => Ok(v),
            other => Err(mismatch(key, "list", other)),
        }
    }

    /// Borrow a descriptor without moving it out of the list
    pub fn get_descriptor(&self, key: &str) -> Result<BorrowedFd<'_>> {
        match self.lookup(key)? {
            Value::Descriptor(fd) => Ok(fd.as_fd()),
            other => Err(mismatch(key, "descriptor", other)),
        }
    }

    /// Whether `key` holds a null value
    pub fn is_null(&self, key: &str) -> Result<bool> {
        Ok(matches!(self.lookup(key)?, Value::Null))
    }

    /// Move a descriptor out of the list; the caller now owns it
    pub fn take_descriptor(&mut self, key: &str) -> Result<OwnedFd> {
        self.take_typed(key, "descriptor", |value| match value {
            Value::Descriptor(fd) => Ok(fd),
            other => Err(other),
        })
    }

    pub fn take_list(&mut self, key: &str) -> Result<ValueList> {
        self.take_typed(key, "list", |value| match value {
            Value::List(list) => Ok(list),
            other => Err(other),
        })
    }

    pub fn take_string(&mut self, key: &str) -> Result<String> {
        self.take_typed(key, "string", |value| match value {
            Value::String(s) => Ok(s),
            other => Err(other),
        })
    }

    // The entry is only removed when it has the expected type.
    fn take_typed<T>(
        &mut self,
        key: &str,
        expected: &'static str,
        extract: impl FnOnce(Value) -> std::result::Result<T, Value>,
    ) -> Result<T> {
        let found = self.lookup(key)?.type_name();
        if found != expected {
            return Err(Error::TypeMismatch {
                key: key.to_string(),
                expected,
                found,
            });
        }
        let value = self.take(key)?;
        extract(value).map_err(|other| mismatch(key, expected, &other))
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of descriptors held, nested lists included
    pub fn descriptor_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.descriptor_count()).sum()
    }

    /// Deep copy, duplicating any descriptors
    pub fn try_clone(&self) -> Result<ValueList> {
        self.check()?;
        let mut entries = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            entries.push((key.clone(), value.try_clone()?));
        }
        Ok(ValueList {
            flags: self.flags,
            entries,
            error: None,
        })
    }

    /// Encode the list for transmission.
    ///
    /// Descriptor values are emitted as indexes into
    /// [`Packed::descriptors`], which the transport passes alongside.
    pub fn pack(&self) -> Result<Packed<'_>> {
        self.check()?;
        wire::pack(self).map_err(Error::Errored)
    }

    /// Encode a descriptor-free list to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.check()?;
        if self.descriptor_count() > 0 {
            return Err(Error::protocol(
                "lists holding descriptors can only be sent over a channel",
            ));
        }
        Ok(self.pack()?.bytes)
    }

    /// Decode a list from bytes plus the descriptors received with them.
    ///
    /// Malformed input yields an errored list rather than an error, so a
    /// receiver checks [`is_errored`](Self::is_errored) in one place.
    /// Descriptors not referenced by the encoding are closed.
    pub fn unpack(bytes: &[u8], descriptors: Vec<OwnedFd>) -> ValueList {
        match wire::unpack(bytes, descriptors) {
            Ok(list) => list,
            Err(err) => {
                tracing::debug!(error = %err, len = bytes.len(), "rejected malformed value list");
                ValueList::errored(err)
            }
        }
    }

    /// Decode a descriptor-free list from bytes
    pub fn deserialize(bytes: &[u8]) -> ValueList {
        Self::unpack(bytes, Vec::new())
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> Error {
    Error::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}

impl fmt::Display for ValueList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "<errored value list>"),
        }
    }
}

impl Serialize for ValueList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if let Some(err) = self.error {
            return Err(S::Error::custom(format!("value list is in error state: {err}")));
        }
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use std::os::fd::AsRawFd;

        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Number(v) => serializer.serialize_i64(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::List(v) => Serialize::serialize(v, serializer),
            Value::Descriptor(fd) => serializer.serialize_i32(fd.as_raw_fd()),
            Value::Binary(v) => serializer.serialize_bytes(v),
            Value::BoolArray(v) => v.serialize(serializer),
            Value::NumberArray(v) => v.serialize(serializer),
            Value::StringArray(v) => v.serialize(serializer),
            Value::ListArray(v) => v.serialize(serializer),
            Value::DescriptorArray(fds) => {
                let mut seq = serializer.serialize_seq(Some(fds.len()))?;
                for fd in fds {
                    seq.serialize_element(&fd.as_raw_fd())?;
                }
                seq.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut list = ValueList::new();
        list.insert("op", "lookup").unwrap();
        list.insert("uid", 1000).unwrap();
        list.insert("found", true).unwrap();

        assert_eq!(list.get_string("op").unwrap(), "lookup");
        assert_eq!(list.get_number("uid").unwrap(), 1000);
        assert!(list.get_bool("found").unwrap());
        assert_eq!(list.len(), 3);
        assert!(!list.is_errored());
    }

    #[test]
    fn test_missing_key_is_not_sticky() {
        let list = ValueList::new().with("a", 1);
        assert!(matches!(list.lookup("b"), Err(Error::KeyNotFound(_))));
        assert!(!list.is_errored());
        assert_eq!(list.get_number("a").unwrap(), 1);
    }

    #[test]
    fn test_duplicate_key_errors_list() {
        let mut list = ValueList::new();
        list.insert("key", 1).unwrap();
        let err = list.insert("key", 2).unwrap_err();
        assert!(matches!(err, Error::Errored(ListError::DuplicateKey)));
        assert_eq!(list.error(), Some(ListError::DuplicateKey));
    }

    #[test]
    fn test_errored_list_rejects_everything() {
        let mut list = ValueList::new().with("a", 1);
        assert!(list.insert("", 2).is_err());
        assert!(list.is_errored());

        let before = list.len();
        assert!(matches!(list.insert("b", 3), Err(Error::Errored(ListError::InvalidKey))));
        assert!(matches!(list.lookup("a"), Err(Error::Errored(_))));
        assert!(matches!(list.remove("a"), Err(Error::Errored(_))));
        assert!(matches!(list.serialize(), Err(Error::Errored(_))));
        assert!(!list.contains("a"));
        assert_eq!(list.len(), before);
        assert_eq!(list.error(), Some(ListError::InvalidKey));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut list = ValueList::new();
        assert!(list.insert("s", "nul\0inside").is_err());
        assert_eq!(list.error(), Some(ListError::InvalidValue));

        let mut list = ValueList::new();
        assert!(list.insert("b", Vec::<u8>::new()).is_err());

        let mut list = ValueList::new();
        assert!(list.insert("n", Vec::<i64>::new()).is_err());

        let mut list = ValueList::new();
        let nested = ValueList::errored(ListError::Malformed);
        assert!(list.insert("nested", nested).is_err());
        assert_eq!(list.error(), Some(ListError::Malformed));
    }

    #[test]
    fn test_no_unique_last_wins() {
        let mut list = ValueList::with_flags(ListFlags::NO_UNIQUE);
        list.insert("k", 1).unwrap();
        list.insert("k", 2).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get_number("k").unwrap(), 2);
    }

    #[test]
    fn test_ignore_case() {
        let mut list = ValueList::with_flags(ListFlags::IGNORE_CASE);
        list.insert("Name", "alice").unwrap();
        assert_eq!(list.get_string("NAME").unwrap(), "alice");
        assert!(list.insert("name", "bob").is_err());
    }

    #[test]
    fn test_type_mismatch_leaves_entry() {
        let mut list = ValueList::new().with("n", 5);
        assert!(matches!(list.take_string("n"), Err(Error::TypeMismatch { .. })));
        assert_eq!(list.get_number("n").unwrap(), 5);
        assert!(!list.is_errored());
    }

    #[test]
    fn test_descriptor_ownership_moves() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut list = ValueList::new();
        list.insert("sock", OwnedFd::from(a)).unwrap();
        assert_eq!(list.descriptor_count(), 1);

        let fd = list.take_descriptor("sock").unwrap();
        assert!(!list.contains("sock"));
        assert_eq!(list.descriptor_count(), 0);
        drop(fd);
    }

    #[test]
    fn test_serialize_refuses_descriptors() {
        let (a, _b) = UnixStream::pair().unwrap();
        let list = ValueList::new().with("sock", OwnedFd::from(a));
        assert!(matches!(list.serialize(), Err(Error::Protocol(_))));
        assert!(!list.is_errored());
        assert!(list.pack().is_ok());
    }

    #[test]
    fn test_try_clone_duplicates_descriptors() {
        let (a, _b) = UnixStream::pair().unwrap();
        let list = ValueList::new()
            .with("sock", OwnedFd::from(a))
            .with("name", "x");
        let copy = list.try_clone().unwrap();
        assert_eq!(copy.descriptor_count(), 1);
        assert_eq!(copy.get_string("name").unwrap(), "x");

        assert!(ValueList::errored(ListError::Malformed).try_clone().is_err());
    }

    #[test]
    fn test_json_view() {
        let list = ValueList::new()
            .with("found", true)
            .with("name", "alice")
            .with("uid", 1000)
            .with("groups", vec![10i64, 20]);
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"found": true, "name": "alice", "uid": 1000, "groups": [10, 20]})
        );
    }

    #[test]
    fn test_json_view_nested_list() {
        let list = ValueList::new()
            .with("user", ValueList::new().with("name", "bob").with("uid", 1001))
            .with("shells", vec![ValueList::new().with("path", "/bin/sh")]);
        assert_eq!(
            serde_json::to_value(&list).unwrap(),
            serde_json::json!({
                "user": {"name": "bob", "uid": 1001},
                "shells": [{"path": "/bin/sh"}]
            })
        );
        assert_eq!(list.to_string(), r#"{"user":{"name":"bob","uid":1001},"shells":[{"path":"/bin/sh"}]}"#);
    }
}
