use secrecy::{ExposeSecret, SecretString};

/// Hosting API token.
///
/// `Debug` prints `[REDACTED]` and the backing memory is zeroized on drop.
/// The only way to read the token is [`Credential::use_secret`], which keeps
/// the plaintext confined to the closure.
pub struct Credential {
    token: SecretString,
}

impl Credential {
    pub fn new(token: String) -> Self {
        Self {
            token: SecretString::new(token),
        }
    }

    /// Read the token from an environment variable. `None` if unset or blank.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
    }

    pub fn use_secret<F, R>(&self, action: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        action(self.token.expose_secret())
    }

    pub fn is_empty(&self) -> bool {
        self.token.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}
