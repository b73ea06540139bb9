//! In-memory user directory service
//!
//! Serves `getpwnam` and `getpwuid` from a fixed user table. Limits have up
//! to three sections, each a name set: `cmds` (commands allowed), `fields`
//! (record fields returned) and `users` (user names visible). A section that
//! is absent allows everything; once present it can only shrink.

use nix::errno::Errno;

use super::{Service, ServiceResult, allowed};
use crate::directory::{COMMANDS, FIELDS, SERVICE_NAME, User};
use crate::error::NOT_CAPABLE;
use crate::vlist::{Value, ValueList};

const SECTIONS: [(&str, &[&str]); 2] = [("cmds", &COMMANDS), ("fields", &FIELDS)];

/// The `system.pwd` service
#[derive(Debug, Clone, Default)]
pub struct UserDbService {
    users: Vec<User>,
}

impl UserDbService {
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    fn respond(
        &self,
        user: Option<&User>,
        limits: Option<&ValueList>,
        response: &mut ValueList,
    ) -> ServiceResult {
        let user = user.filter(|user| allowed(limits, "users", &user.name));
        let Some(user) = user else {
            return put(response, "found", false);
        };

        put(response, "found", true)?;
        let fields: [(&str, Value); 6] = [
            ("name", user.name.as_str().into()),
            ("uid", user.uid.into()),
            ("gid", user.gid.into()),
            ("gecos", user.gecos.as_str().into()),
            ("dir", user.dir.as_str().into()),
            ("shell", user.shell.as_str().into()),
        ];
        for (field, value) in fields {
            if allowed(limits, "fields", field) {
                put(response, field, value)?;
            }
        }
        Ok(())
    }
}

impl Service for UserDbService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn limit(&self, old: Option<&ValueList>, new: &ValueList) -> ServiceResult {
        for (section, value) in new.iter() {
            let Value::List(names) = value else {
                return Err(Errno::EINVAL);
            };
            if section == "users" {
                if names.iter().any(|(_, v)| !matches!(v, Value::Null)) {
                    return Err(Errno::EINVAL);
                }
                continue;
            }
            let Some((_, known)) = SECTIONS.iter().find(|(name, _)| *name == section) else {
                return Err(Errno::EINVAL);
            };
            for (name, v) in names.iter() {
                if !matches!(v, Value::Null) || !known.contains(&name) {
                    return Err(Errno::EINVAL);
                }
            }
        }

        let Some(old) = old else {
            return Ok(());
        };
        for (section, value) in old.iter() {
            let Value::List(old_names) = value else {
                continue;
            };
            // Removing a section would lift its restriction.
            let Ok(new_names) = new.get_list(section) else {
                return Err(NOT_CAPABLE);
            };
            if new_names.iter().any(|(name, _)| !old_names.contains(name)) {
                return Err(NOT_CAPABLE);
            }
        }
        Ok(())
    }

    fn command(
        &self,
        cmd: &str,
        limits: Option<&ValueList>,
        request: &ValueList,
        response: &mut ValueList,
    ) -> ServiceResult {
        if !COMMANDS.contains(&cmd) {
            return Err(Errno::EINVAL);
        }
        if !allowed(limits, "cmds", cmd) {
            return Err(NOT_CAPABLE);
        }

        let user = match cmd {
            "getpwnam" => {
                let name = request.get_string("name").map_err(|_| Errno::EINVAL)?;
                self.users.iter().find(|user| user.name == name)
            }
            _ => {
                let uid = request.get_number("uid").map_err(|_| Errno::EINVAL)?;
                self.users.iter().find(|user| i64::from(user.uid) == uid)
            }
        };
        tracing::trace!(cmd, found = user.is_some(), "user lookup");
        self.respond(user, limits, response)
    }
}

fn put(response: &mut ValueList, key: &str, value: impl Into<Value>) -> ServiceResult {
    response.insert(key, value).map_err(|_| Errno::EINVAL)
}
