//! User directory proxy
//!
//! Client side of the `system.pwd` service. The reentrant `*_r` calls copy
//! a record's strings into a caller buffer and report
//! [`Attempt::TooSmall`] when they do not fit; the owned variants wrap them
//! in a [`BufferedLookup`](crate::lookup::BufferedLookup) that starts at one
//! page and doubles on demand.

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, Limits, name_set};
use crate::config::LookupConfig;
use crate::error::{Error, Result};
use crate::lookup::{Attempt, lookup_with_retry};
use crate::vlist::ValueList;

/// Name under which the broker publishes the user directory
pub const SERVICE_NAME: &str = "system.pwd";

/// Commands the user directory understands
pub const COMMANDS: [&str; 2] = ["getpwnam", "getpwuid"];

/// Record fields the user directory can return
pub const FIELDS: [&str; 6] = ["name", "uid", "gid", "gecos", "dir", "shell"];

/// A user record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub gecos: String,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub shell: String,
}

/// A user record whose strings live in a caller-supplied buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRef<'a> {
    pub name: &'a str,
    pub uid: u32,
    pub gid: u32,
    pub gecos: &'a str,
    pub dir: &'a str,
    pub shell: &'a str,
}

impl UserRef<'_> {
    pub fn to_user(&self) -> User {
        User {
            name: self.name.to_string(),
            uid: self.uid,
            gid: self.gid,
            gecos: self.gecos.to_string(),
            dir: self.dir.to_string(),
            shell: self.shell.to_string(),
        }
    }
}

/// Proxy for the user directory service
#[derive(Debug)]
pub struct UserDirectory {
    channel: Channel,
    lookup: LookupConfig,
}

impl UserDirectory {
    /// Open the user directory through a broker channel
    pub fn open(broker: &Channel) -> Result<Self> {
        Ok(Self::from_channel(broker.service_open(SERVICE_NAME)?))
    }

    /// Use a channel that is already connected to the user directory
    pub fn from_channel(channel: Channel) -> Self {
        Self {
            channel,
            lookup: LookupConfig::default(),
        }
    }

    pub fn with_lookup_config(mut self, lookup: LookupConfig) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn into_channel(self) -> Channel {
        self.channel
    }

    /// Look a user up by name, copying strings into `buf`
    pub fn getpwnam_r<'b>(&self, name: &str, buf: &'b mut [u8]) -> Result<Attempt<UserRef<'b>>> {
        let request = self
            .channel
            .new_list()
            .with("cmd", "getpwnam")
            .with("name", name);
        self.fetch(request, buf)
    }

    /// Look a user up by uid, copying strings into `buf`
    pub fn getpwuid_r<'b>(&self, uid: u32, buf: &'b mut [u8]) -> Result<Attempt<UserRef<'b>>> {
        let request = self
            .channel
            .new_list()
            .with("cmd", "getpwuid")
            .with("uid", uid);
        self.fetch(request, buf)
    }

    /// Look a user up by name
    pub fn getpwnam(&self, name: &str) -> Result<Option<User>> {
        lookup_with_retry(&self.lookup, |buf| {
            Ok(owned(self.getpwnam_r(name, buf)?))
        })
    }

    /// Look a user up by uid
    pub fn getpwuid(&self, uid: u32) -> Result<Option<User>> {
        lookup_with_retry(&self.lookup, |buf| {
            Ok(owned(self.getpwuid_r(uid, buf)?))
        })
    }

    fn fetch<'b>(&self, request: ValueList, buf: &'b mut [u8]) -> Result<Attempt<UserRef<'b>>> {
        let response = self.channel.command(request)?;
        if !response.get_bool("found")? {
            return Ok(Attempt::NotFound);
        }

        let strings = [
            optional_string(&response, "name")?,
            optional_string(&response, "gecos")?,
            optional_string(&response, "dir")?,
            optional_string(&response, "shell")?,
        ];
        // Each string is stored NUL-terminated, as the C interface would.
        let needed: usize = strings.iter().map(|s| s.len() + 1).sum();
        if needed > buf.len() {
            return Ok(Attempt::TooSmall);
        }

        let mut spans = [(0, 0); 4];
        let mut pos = 0;
        for (span, s) in spans.iter_mut().zip(strings) {
            buf[pos..pos + s.len()].copy_from_slice(s.as_bytes());
            buf[pos + s.len()] = 0;
            *span = (pos, pos + s.len());
            pos += s.len() + 1;
        }

        let buf: &'b [u8] = buf;
        let text = move |(start, end): (usize, usize)| {
            std::str::from_utf8(&buf[start..end])
                .map_err(|_| Error::protocol("record string is not UTF-8"))
        };

        Ok(Attempt::Found(UserRef {
            name: text(spans[0])?,
            uid: optional_id(&response, "uid")?,
            gid: optional_id(&response, "gid")?,
            gecos: text(spans[1])?,
            dir: text(spans[2])?,
            shell: text(spans[3])?,
        }))
    }

    /// Restrict the commands this channel may run
    pub fn limit_cmds(&self, cmds: &[&str]) -> Result<()> {
        self.limit_section("cmds", cmds)
    }

    /// Restrict the fields returned in records
    pub fn limit_fields(&self, fields: &[&str]) -> Result<()> {
        self.limit_section("fields", fields)
    }

    /// Restrict which users are visible
    pub fn limit_users(&self, users: &[&str]) -> Result<()> {
        self.limit_section("users", users)
    }

    // Replaces one section and keeps the others as the peer has them.
    fn limit_section(&self, section: &str, names: &[&str]) -> Result<()> {
        let mut limits = match self.channel.limit_get()? {
            Limits::Attached(list) => list,
            Limits::NoneAttached => ValueList::new(),
        };
        if limits.contains(section) {
            limits.remove(section)?;
        }
        limits.insert(section, name_set(names))?;
        self.channel.limit_set(limits)
    }
}

fn owned(attempt: Attempt<UserRef<'_>>) -> Attempt<User> {
    match attempt {
        Attempt::Found(user) => Attempt::Found(user.to_user()),
        Attempt::NotFound => Attempt::NotFound,
        Attempt::TooSmall => Attempt::TooSmall,
    }
}

// Fields withheld by limits come back empty.
fn optional_string<'a>(response: &'a ValueList, key: &str) -> Result<&'a str> {
    if response.contains(key) {
        response.get_string(key)
    } else {
        Ok("")
    }
}

fn optional_id(response: &ValueList, key: &str) -> Result<u32> {
    if !response.contains(key) {
        return Ok(0);
    }
    let id = response.get_number(key)?;
    u32::try_from(id).map_err(|_| Error::protocol(format!("{key} {id} out of range")))
}
