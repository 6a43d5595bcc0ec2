//! Connection authentication hook.

use std::collections::HashMap;

/// Pass/fail credential check applied to the CONNECT frame. The outcome is
/// binary; there are no per-destination permissions.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, login: Option<&str>, passcode: Option<&str>) -> bool;
}

/// Accepts every connection, credentials or not. The default when no users
/// are configured.
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _login: Option<&str>, _passcode: Option<&str>) -> bool {
        true
    }
}

/// Checks login/passcode against a fixed user table from configuration.
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new(users: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }
}

impl Authenticator for StaticCredentials {
    fn authenticate(&self, login: Option<&str>, passcode: Option<&str>) -> bool {
        match (login, passcode) {
            (Some(login), Some(passcode)) => {
                self.users.get(login).map(String::as_str) == Some(passcode)
            }
            _ => false,
        }
    }
}
