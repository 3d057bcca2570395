use anyhow::{Context, Result};
use keyring::Entry;

/// Keychain service under which remembered passwords are filed.
const SERVICE_NAME: &str = "taskpilot";

/// Remembered login passwords, kept in the OS keychain keyed by email.
///
/// Tokens never go here; only the password a user opted to remember with
/// `login --remember`.
pub struct CredentialStore;

impl CredentialStore {
    /// Store the password for `email` in the OS keychain
    pub fn store(email: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    /// Retrieve the remembered password for `email`
    pub fn get_password(email: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    /// Forget the remembered password for `email`. Forgetting a password
    /// that was never stored is not an error.
    pub fn forget(email: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }

    pub fn has_credentials(email: &str) -> bool {
        Entry::new(SERVICE_NAME, email)
            .and_then(|entry| entry.get_password())
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn use_mock_keychain() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
    }

    #[test]
    fn test_unknown_email_has_no_credentials() {
        use_mock_keychain();
        assert!(!CredentialStore::has_credentials("nobody@example.com"));
        assert!(CredentialStore::get_password("nobody@example.com").is_err());
    }

    #[test]
    fn test_forget_without_stored_password_is_ok() {
        use_mock_keychain();
        CredentialStore::forget("nobody@example.com").expect("forget");
    }

    #[test]
    fn test_store_reaches_the_backend() {
        use_mock_keychain();
        CredentialStore::store("a@b.com", "pw").expect("store");
    }
}
