//! Known-user lookup.

use async_trait::async_trait;

use crate::error::ExchangeError;

/// Answers "is this sender already a user?".
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn is_known(&self, address: &str) -> Result<bool, ExchangeError>;
}

/// Directory backed by an allowlist.
///
/// - Empty list → nobody is known
/// - `*` → everybody is known
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact address match
#[derive(Debug, Clone, Default)]
pub struct AllowlistDirectory {
    entries: Vec<String>,
}

impl AllowlistDirectory {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl UserDirectory for AllowlistDirectory {
    async fn is_known(&self, address: &str) -> Result<bool, ExchangeError> {
        if address.trim().is_empty() {
            return Err(ExchangeError::InvalidInput("empty sender address".into()));
        }
        Ok(matches_allowlist(&self.entries, address))
    }
}

/// Whether `email` matches any allowlist entry, case-insensitively.
///
/// There is no separate empty-list branch: with no entries the `any` checks
/// below find nothing, so nobody matches. Bare domains are anchored on `@`
/// so `corp.io` does not match `user@notcorp.io`.
pub fn matches_allowlist(allowed: &[String], email: &str) -> bool {
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_list_knows_nobody() {
        assert!(!matches_allowlist(&[], "a@b.com"));
    }

    #[test]
    fn wildcard_knows_everybody() {
        assert!(matches_allowlist(&list(&["*"]), "anyone@anywhere.io"));
    }

    #[test]
    fn exact_and_domain_matches() {
        let allowed = list(&["ceo@partner.io", "@company.com", "trusted.org"]);
        assert!(matches_allowlist(&allowed, "CEO@partner.io"));
        assert!(matches_allowlist(&allowed, "admin@Company.com"));
        assert!(matches_allowlist(&allowed, "x@trusted.org"));
        assert!(!matches_allowlist(&allowed, "x@untrusted.org.evil"));
        assert!(!matches_allowlist(&allowed, "other@partner.io"));
    }

    #[test]
    fn bare_domain_does_not_match_suffix_lookalike() {
        assert!(!matches_allowlist(&list(&["trusted.org"]), "x@nottrusted.org"));
    }

    #[tokio::test]
    async fn directory_rejects_empty_sender() {
        let dir = AllowlistDirectory::new(list(&["*"]));
        assert!(dir.is_known("  ").await.is_err());
        assert!(dir.is_known("a@b.com").await.unwrap());
    }
}
