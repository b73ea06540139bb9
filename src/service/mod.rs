//! Peer side of the channel protocol
//!
//! A [`Broker`] accepts connections and runs one session per connection on
//! its own thread. Sessions answer the generic commands (`clone`,
//! `limit_get`, `limit_set`) themselves; the broker session also answers
//! `open`, and service sessions hand every other command to their
//! [`Service`].

mod registry;
mod server;
mod userdb;

use nix::errno::Errno;

use crate::channel::is_subset;
use crate::error::NOT_CAPABLE;
use crate::vlist::{Value, ValueList};

pub use registry::ServiceRegistry;
pub use server::{Broker, BrokerServer};
pub use userdb::UserDbService;

/// Outcome of a service command; the errno travels back as `error`
pub type ServiceResult = std::result::Result<(), Errno>;

/// A named service reachable through the broker
pub trait Service: Send + Sync {
    /// Name clients pass to `open`
    fn name(&self) -> &str;

    /// Validate `new` limits against the ones in force (`None` when the
    /// channel was never limited).
    ///
    /// The default only allows dropping keys.
    fn limit(&self, old: Option<&ValueList>, new: &ValueList) -> ServiceResult {
        match old {
            Some(old) if !is_subset(new, old) => Err(NOT_CAPABLE),
            _ => Ok(()),
        }
    }

    /// Run `cmd`, filling `response`. `limits` are the channel's current
    /// limits.
    fn command(
        &self,
        cmd: &str,
        limits: Option<&ValueList>,
        request: &ValueList,
        response: &mut ValueList,
    ) -> ServiceResult;
}

/// Check a name-set limit list: every value null, and no name outside `old`
pub fn check_name_set(old: Option<&ValueList>, new: &ValueList) -> ServiceResult {
    if new.iter().any(|(_, value)| !matches!(value, Value::Null)) {
        return Err(Errno::EINVAL);
    }
    match old {
        Some(old) if !is_subset(new, old) => Err(NOT_CAPABLE),
        _ => Ok(()),
    }
}

/// Whether `name` is allowed by the `section` name set of `limits`.
///
/// Missing limits or a missing section allow everything.
pub fn allowed(limits: Option<&ValueList>, section: &str, name: &str) -> bool {
    match limits.and_then(|limits| limits.get_list(section).ok()) {
        Some(names) => names.contains(name),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::name_set;

    struct Echo;

    impl Service for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn command(
            &self,
            _cmd: &str,
            _limits: Option<&ValueList>,
            _request: &ValueList,
            _response: &mut ValueList,
        ) -> ServiceResult {
            Ok(())
        }
    }

    #[test]
    fn test_default_limit_only_narrows() {
        let old = name_set(&["a", "b"]);
        assert!(Echo.limit(None, &name_set(&["anything"])).is_ok());
        assert!(Echo.limit(Some(&old), &name_set(&["a"])).is_ok());
        assert_eq!(Echo.limit(Some(&old), &name_set(&["c"])), Err(NOT_CAPABLE));
    }

    #[test]
    fn test_check_name_set() {
        let old = name_set(&["system.pwd", "system.grp"]);
        assert!(check_name_set(None, &name_set(&["system.pwd"])).is_ok());
        assert!(check_name_set(Some(&old), &name_set(&["system.grp"])).is_ok());
        assert_eq!(
            check_name_set(Some(&old), &name_set(&["system.dns"])),
            Err(NOT_CAPABLE)
        );
        let valued = ValueList::new().with("system.pwd", true);
        assert_eq!(check_name_set(None, &valued), Err(Errno::EINVAL));
    }

    #[test]
    fn test_allowed() {
        let limits = ValueList::new().with("users", name_set(&["alice"]));
        assert!(allowed(None, "users", "bob"));
        assert!(allowed(Some(&limits), "users", "alice"));
        assert!(!allowed(Some(&limits), "users", "bob"));
        assert!(allowed(Some(&limits), "fields", "shell"));
    }
}
