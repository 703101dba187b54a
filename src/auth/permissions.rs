//! Per-user permission sets
//!
//! Permissions are written with the pyftpdlib letter syntax, e.g. `"elradfmwMT"`.

use serde::Deserialize;
use std::fmt;

/// A single capability a user may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    List,
    Read,
    Write,
    Delete,
    Rename,
    MakeDir,
    ChangePermissions,
}

impl Permission {
    const ALL: [Permission; 7] = [
        Permission::List,
        Permission::Read,
        Permission::Write,
        Permission::Delete,
        Permission::Rename,
        Permission::MakeDir,
        Permission::ChangePermissions,
    ];

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::List => "list",
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
            Permission::Rename => "rename",
            Permission::MakeDir => "make-directory",
            Permission::ChangePermissions => "change-permissions",
        };
        f.write_str(name)
    }
}

/// Set of granted permissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Permissions(u8);

impl Permissions {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Permission::ALL
            .iter()
            .fold(Self::none(), |set, p| set.with(*p))
    }

    /// Browse and download only, the default for anonymous users.
    pub fn read_only() -> Self {
        Self::none().with(Permission::List).with(Permission::Read)
    }

    pub fn with(self, permission: Permission) -> Self {
        Self(self.0 | permission.bit())
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }

    /// Parses pyftpdlib permission letters.
    ///
    /// `e`/`l` list, `r` read, `a`/`w` write, `d` delete, `f` rename,
    /// `m` make directory, `M` change permissions. `T` is accepted and ignored.
    pub fn parse(flags: &str) -> Result<Self, String> {
        flags.chars().try_fold(Self::none(), |set, flag| {
            let permission = match flag {
                'e' | 'l' => Permission::List,
                'r' => Permission::Read,
                'a' | 'w' => Permission::Write,
                'd' => Permission::Delete,
                'f' => Permission::Rename,
                'm' => Permission::MakeDir,
                'M' => Permission::ChangePermissions,
                'T' => return Ok(set),
                other => return Err(format!("unknown permission flag '{other}'")),
            };
            Ok(set.with(permission))
        })
    }
}

impl TryFrom<String> for Permissions {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}
