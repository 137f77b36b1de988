//! Client credential checks.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Verifies login credentials.
pub trait Authenticator: Send + Sync {
    /// Whether the password is valid for the client.
    fn authenticate(&self, client_id: &str, password: &str) -> bool;

    /// Replace the client's password. Returns `false` when refused.
    fn change_password(&self, client_id: &str, new_password: &str) -> bool;
}

/// In-memory account table.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    accounts: RwLock<HashMap<String, String>>,
}

impl StaticAuthenticator {
    /// Authenticator over `(client id, password)` pairs.
    pub fn new<I, K, V>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            accounts: RwLock::new(
                accounts
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, client_id: &str, password: &str) -> bool {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .is_some_and(|p| p == password)
    }

    fn change_password(&self, client_id: &str, new_password: &str) -> bool {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        match accounts.get_mut(client_id) {
            Some(password) => {
                *password = new_password.to_string();
                true
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_accounts() {
        let auth = StaticAuthenticator::new([("ClientX", "foo-BAR2")]);
        assert!(auth.authenticate("ClientX", "foo-BAR2"));
        assert!(!auth.authenticate("ClientX", "wrong"));
        assert!(!auth.authenticate("ClientY", "foo-BAR2"));

        assert!(auth.change_password("ClientX", "bar-FOO2"));
        assert!(auth.authenticate("ClientX", "bar-FOO2"));
        assert!(!auth.change_password("ClientY", "x"));
    }
}
