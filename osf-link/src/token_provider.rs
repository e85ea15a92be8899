use std::sync::RwLock;

use osf_core::TokenSource;

/// Holds the credential of the signed-in account.
///
/// The client reads it on every request, so signing out takes effect on the
/// next call without rebuilding the client.
#[derive(Debug, Default)]
pub struct TokenProvider {
    token: RwLock<Option<String>>,
}

impl TokenProvider {
    pub fn new(token: Option<String>) -> Self {
        let provider = Self::default();
        if let Some(token) = token {
            provider.set(token);
        }
        provider
    }

    /// Blank tokens sign the account out.
    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        let token = token.trim();
        let mut slot = self.token.write().expect("token lock poisoned");
        *slot = (!token.is_empty()).then(|| token.to_string());
    }

    pub fn clear(&self) {
        *self.token.write().expect("token lock poisoned") = None;
    }

    pub fn is_signed_in(&self) -> bool {
        self.token.read().expect("token lock poisoned").is_some()
    }
}

impl TokenSource for TokenProvider {
    fn access_token(&self) -> Option<String> {
        self.token.read().expect("token lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_trims_and_clear_signs_out() {
        let provider = TokenProvider::new(Some("  abc \n".into()));
        assert_eq!(provider.access_token().as_deref(), Some("abc"));

        provider.clear();
        assert!(!provider.is_signed_in());
        assert_eq!(provider.access_token(), None);
    }

    #[test]
    fn blank_token_counts_as_signed_out() {
        let provider = TokenProvider::new(Some("abc".into()));
        provider.set("   ");
        assert!(!provider.is_signed_in());
    }
}
