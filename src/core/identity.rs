//! Owner and group name resolution
//!
//! Headers carry both numeric ids and the names they resolved to when the
//! archive was written. Resolution goes through [`IdentityLookup`] so callers
//! can swap the system user database for a fixed table.

use std::collections::HashMap;
use std::ffi::CStr;

/// Maps numeric owner/group ids to display names
///
/// `None` means the id has no name; the header codec reports that as an
/// `IdentityLookup` error.
pub trait IdentityLookup: Send + Sync {
    fn user_name(&self, uid: u32) -> Option<String>;
    fn group_name(&self, gid: u32) -> Option<String>;
}

/// Lookup against the system user and group databases
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

const INITIAL_BUF: usize = 1024;
const MAX_BUF: usize = 1 << 20;

impl IdentityLookup for SystemIdentity {
    fn user_name(&self, uid: u32) -> Option<String> {
        let mut buf: Vec<libc::c_char> = vec![0; INITIAL_BUF];
        loop {
            // SAFETY: passwd is plain old data; getpwuid_r fills it and points
            // its string fields into `buf`, which outlives the CStr read below.
            let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::passwd = std::ptr::null_mut();
            let rc = unsafe {
                libc::getpwuid_r(
                    uid as libc::uid_t,
                    &mut pwd,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };

            if rc == libc::ERANGE && buf.len() < MAX_BUF {
                buf.resize(buf.len() * 2, 0);
                continue;
            }
            if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
                return None;
            }

            let name = unsafe { CStr::from_ptr(pwd.pw_name) };
            return Some(name.to_string_lossy().into_owned());
        }
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        let mut buf: Vec<libc::c_char> = vec![0; INITIAL_BUF];
        loop {
            // SAFETY: as above, for the group database.
            let mut grp: libc::group = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::group = std::ptr::null_mut();
            let rc = unsafe {
                libc::getgrgid_r(
                    gid as libc::gid_t,
                    &mut grp,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };

            if rc == libc::ERANGE && buf.len() < MAX_BUF {
                buf.resize(buf.len() * 2, 0);
                continue;
            }
            if rc != 0 || result.is_null() || grp.gr_name.is_null() {
                return None;
            }

            let name = unsafe { CStr::from_ptr(grp.gr_name) };
            return Some(name.to_string_lossy().into_owned());
        }
    }
}

/// Table-driven lookup
///
/// Useful for reproducible archives and for tests that must not depend on
/// the host's user database.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    users: HashMap<u32, String>,
    groups: HashMap<u32, String>,
    fallback_user: Option<String>,
    fallback_group: Option<String>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every id to the same pair of names
    pub fn fixed<U: Into<String>, G: Into<String>>(user: U, group: G) -> Self {
        StaticIdentity {
            fallback_user: Some(user.into()),
            fallback_group: Some(group.into()),
            ..Self::default()
        }
    }

    pub fn with_user<S: Into<String>>(mut self, uid: u32, name: S) -> Self {
        self.users.insert(uid, name.into());
        self
    }

    pub fn with_group<S: Into<String>>(mut self, gid: u32, name: S) -> Self {
        self.groups.insert(gid, name.into());
        self
    }
}

impl IdentityLookup for StaticIdentity {
    fn user_name(&self, uid: u32) -> Option<String> {
        self.users
            .get(&uid)
            .or(self.fallback_user.as_ref())
            .cloned()
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        self.groups
            .get(&gid)
            .or(self.fallback_group.as_ref())
            .cloned()
    }
}
