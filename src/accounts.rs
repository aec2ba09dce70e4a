//! Local account lookups

use std::fs;
use std::path::PathBuf;

use log::debug;
use users::os::unix::UserExt;

use crate::error::Error;

const PASSWD_FILE: &str = "/etc/passwd";

/// What the relay needs to know about a local account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Login name
    pub name: String,
    /// Numeric user id
    pub uid: u32,
    /// Home directory, where `dead.letter` goes
    pub home: PathBuf,
    /// Descriptive name from the GECOS field, up to the first `,` or `;`
    pub full_name: Option<String>,
}

/// Source of account information
pub trait AccountDirectory {
    /// Account this process runs as
    fn current(&self) -> Result<Account, Error>;
    /// Looks an account up by login name
    fn by_name(&self, name: &str) -> Option<Account>;
}

/// Descriptive part of a GECOS field
pub fn gecos_name(field: &str) -> Option<String> {
    field
        .split(|c: char| c == ',' || c == ';')
        .find(|part| !part.is_empty())
        .map(str::to_string)
}

/// Accounts of the running system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAccounts;

impl SystemAccounts {
    fn account(user: &users::User) -> Account {
        let name = user.name().to_string_lossy().into_owned();
        Account {
            full_name: passwd_gecos(&name).as_deref().and_then(gecos_name),
            uid: user.uid(),
            home: user.home_dir().to_path_buf(),
            name,
        }
    }
}

/// Reads the GECOS field for `name` straight from the passwd file.
///
/// `users::User` exposes no GECOS accessor, so the file is parsed here. The
/// read is synchronous and happens once, before the session starts.
fn passwd_gecos(name: &str) -> Option<String> {
    let passwd = match fs::read_to_string(PASSWD_FILE) {
        Ok(passwd) => passwd,
        Err(e) => {
            debug!("{}: {}", PASSWD_FILE, e);
            return None;
        }
    };
    passwd.lines().find_map(|line| {
        let mut fields = line.split(':');
        if fields.next() != Some(name) {
            return None;
        }
        fields.nth(3).map(str::to_string)
    })
}

impl AccountDirectory for SystemAccounts {
    fn current(&self) -> Result<Account, Error> {
        let uid = users::get_current_uid();
        users::get_user_by_uid(uid)
            .map(|user| SystemAccounts::account(&user))
            .ok_or_else(|| Error::Config(format!("could not find password entry for UID {}", uid)))
    }

    fn by_name(&self, name: &str) -> Option<Account> {
        users::get_user_by_name(name).map(|user| SystemAccounts::account(&user))
    }
}

/// A fixed set of accounts, the first one being the caller
#[derive(Debug, Clone)]
pub struct FixedAccounts {
    current: Account,
    others: Vec<Account>,
}

impl FixedAccounts {
    /// Creates a directory where `current` runs the process
    pub fn new(current: Account) -> FixedAccounts {
        FixedAccounts {
            current,
            others: Vec::new(),
        }
    }

    /// Adds another known account
    pub fn with(mut self, account: Account) -> FixedAccounts {
        self.others.push(account);
        self
    }
}

impl AccountDirectory for FixedAccounts {
    fn current(&self) -> Result<Account, Error> {
        Ok(self.current.clone())
    }

    fn by_name(&self, name: &str) -> Option<Account> {
        std::iter::once(&self.current)
            .chain(self.others.iter())
            .find(|account| account.name == name)
            .cloned()
    }
}
