//! Domain types shared by the store, the transport and the bridge.

use crate::constants::{FLAG_ALLOWED, FLAG_DENIED, FLAG_HIDDEN};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// A caller identity as seen by the transport.
///
/// Ordinary identities are non-negative; the negative values [`Uid::DEFAULT`]
/// and [`Uid::GLOBAL`] are sentinels stored in the same table as real callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub i32);

impl Uid {
    /// Fallback entry for callers without an explicit entry.
    pub const DEFAULT: Uid = Uid(-1);
    /// Broker-wide toggle flags, not a real caller.
    pub const GLOBAL: Uid = Uid(-2);
    pub const ROOT: Uid = Uid(0);
    pub const SYSTEM: Uid = Uid(1000);

    /// Identities that are allowed without consulting the table.
    pub fn is_implicitly_allowed(self) -> bool {
        self == Uid::ROOT || self == Uid::SYSTEM
    }

    pub fn is_sentinel(self) -> bool {
        self == Uid::DEFAULT || self == Uid::GLOBAL
    }

    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Uid::DEFAULT => write!(f, "default"),
            Uid::GLOBAL => write!(f, "global"),
            Uid(raw) => write!(f, "{raw}"),
        }
    }
}

impl From<i32> for Uid {
    fn from(raw: i32) -> Self {
        Uid(raw)
    }
}

impl FromStr for Uid {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<i32>().map(Uid)
    }
}

/// One row of the authorization table. `flags` is never zero for a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub uid: Uid,
    pub flags: u32,
}

impl PermissionEntry {
    pub fn new(uid: Uid, flags: u32) -> Self {
        Self { uid, flags }
    }

    pub fn is_allowed(&self) -> bool {
        self.flags & FLAG_ALLOWED != 0 && self.flags & FLAG_DENIED == 0
    }

    pub fn is_denied(&self) -> bool {
        self.flags & FLAG_DENIED != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.flags & FLAG_HIDDEN != 0
    }
}

/// Application row returned by the get-applications operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub package_name: String,
    pub uid: Uid,
    pub user_id: i32,
    pub label: Option<String>,
    /// Explicit flags for `uid`, 0 when unconfigured.
    pub flags: u32,
    /// Permission bits of the default entry.
    pub default_flags: u32,
}

impl AppInfo {
    /// Whether the application has no explicit permission decision.
    pub fn is_unconfigured(&self) -> bool {
        self.flags & crate::constants::MASK_PERMISSION == 0
    }
}
