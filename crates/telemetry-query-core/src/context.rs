//! Account context threaded into every query

use std::fmt;

use crate::error::{Error, Result};

/// The account a query runs against and the token that authorizes it
///
/// Passed explicitly to each operation; nothing in the crate holds an
/// ambient "current account".
#[derive(Clone, PartialEq, Eq)]
pub struct AccountContext {
    /// Account identifier used in endpoint paths
    pub account_id: String,
    /// Bearer token sent with every request
    pub api_token: String,
}

impl AccountContext {
    /// Bind an account id and token
    pub fn new(account_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            api_token: api_token.into(),
        }
    }

    /// Fail with [`Error::MissingContext`] when no account id is set
    pub fn ensure_active(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(Error::MissingContext);
        }
        Ok(())
    }
}

// Keep the token out of logs
impl fmt::Debug for AccountContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountContext")
            .field("account_id", &self.account_id)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_account_is_missing_context() {
        let ctx = AccountContext::new("  ", "token");
        assert!(matches!(ctx.ensure_active(), Err(Error::MissingContext)));
        assert!(AccountContext::new("abc123", "token").ensure_active().is_ok());
    }

    #[test]
    fn test_debug_redacts_token() {
        let ctx = AccountContext::new("abc123", "secret-token");
        let rendered = format!("{ctx:?}");
        assert!(rendered.contains("abc123"));
        assert!(!rendered.contains("secret-token"));
    }
}
