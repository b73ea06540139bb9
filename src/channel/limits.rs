//! Limit descriptors
//!
//! Limits are a service-specific [`ValueList`] attached to a channel. The
//! peer interprets and enforces them; this side only carries them. Setting
//! limits replaces the previous set wholesale, and peers refuse attempts to
//! widen what is already allowed.

use super::Channel;
use crate::error::Result;
use crate::vlist::{Value, ValueList};

/// Outcome of [`Channel::limit_get`]
#[derive(Debug)]
pub enum Limits {
    /// No limits were ever set on the channel
    NoneAttached,
    /// The limits currently in force
    Attached(ValueList),
}

impl Limits {
    pub fn is_attached(&self) -> bool {
        matches!(self, Limits::Attached(_))
    }

    pub fn as_list(&self) -> Option<&ValueList> {
        match self {
            Limits::Attached(list) => Some(list),
            Limits::NoneAttached => None,
        }
    }

    pub fn into_list(self) -> Option<ValueList> {
        match self {
            Limits::Attached(list) => Some(list),
            Limits::NoneAttached => None,
        }
    }
}

impl From<Option<ValueList>> for Limits {
    fn from(list: Option<ValueList>) -> Self {
        match list {
            Some(list) => Limits::Attached(list),
            None => Limits::NoneAttached,
        }
    }
}

/// A limit list whose keys are the permitted names, each mapped to null
pub fn name_set<S: AsRef<str>>(names: &[S]) -> ValueList {
    let mut list = ValueList::new();
    for name in names {
        // A failed insert leaves the list errored; the peer never sees it.
        if list.insert(name.as_ref(), Value::Null).is_err() {
            break;
        }
    }
    list
}

/// Whether every key of `new` also appears in `old`
pub fn is_subset(new: &ValueList, old: &ValueList) -> bool {
    new.iter().all(|(key, _)| old.contains(key))
}

impl Channel {
    /// Fetch the limits currently attached to this channel
    pub fn limit_get(&self) -> Result<Limits> {
        let mut response = self.command(self.request("limit_get"))?;
        if response.is_null("limits")? {
            return Ok(Limits::NoneAttached);
        }
        Ok(Limits::Attached(response.take_list("limits")?))
    }

    /// Replace the limits on this channel.
    ///
    /// `limits` is consumed whether or not the peer accepts it.
    pub fn limit_set(&self, limits: ValueList) -> Result<()> {
        let request = self.request("limit_set").with("limits", limits);
        self.command(request)?;
        tracing::debug!(fd = ?self.sock(), "channel limits set");
        Ok(())
    }
}
