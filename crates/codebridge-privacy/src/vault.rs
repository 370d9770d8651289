//! Per-session bidirectional token table.

use std::collections::{BTreeMap, HashMap, HashSet};

/// `token ↔ original` for one session. Grows monotonically; never re-issues
/// a token for a different value.
///
/// Token-shaped text that arrived from outside (a capability result quoting
/// `[EMAIL_1]`, say) is reserved: it is never minted and never resolves.
#[derive(Debug, Default)]
pub struct PiiVault {
    by_token: HashMap<String, String>,
    by_value: HashMap<String, String>,
    counters: HashMap<String, u64>,
    reserved: HashSet<String>,
}

impl PiiVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing token for `value`, or a fresh `[CATEGORY_N]`.
    pub fn token_for(&mut self, category: &str, value: &str) -> String {
        if let Some(token) = self.by_value.get(value) {
            return token.clone();
        }
        let n = self.counters.entry(category.to_string()).or_insert(0);
        let token = loop {
            *n += 1;
            let candidate = format!("[{}_{}]", category, n);
            if !self.reserved.contains(&candidate) {
                break candidate;
            }
        };
        self.by_value.insert(value.to_string(), token.clone());
        self.by_token.insert(token.clone(), value.to_string());
        token
    }

    /// Keep a foreign `[CATEGORY_N]` literal out of the mint sequence. Tokens
    /// this vault issued are left alone.
    pub fn reserve(&mut self, token: &str) {
        if self.by_token.contains_key(token) || self.reserved.contains(token) {
            return;
        }
        let inner = token.trim_start_matches('[').trim_end_matches(']');
        if let Some((category, ordinal)) = inner.rsplit_once('_') {
            if let Ok(ordinal) = ordinal.parse::<u64>() {
                let n = self.counters.entry(category.to_string()).or_insert(0);
                *n = (*n).max(ordinal);
            }
        }
        self.reserved.insert(token.to_string());
    }

    pub fn is_reserved(&self, token: &str) -> bool {
        self.reserved.contains(token)
    }

    pub fn resolve(&self, token: &str) -> Option<&str> {
        self.by_token.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Sorted copy of the table, for debugging tools.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.by_token
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_value_same_token() {
        let mut v = PiiVault::new();
        let a = v.token_for("EMAIL", "a@b.co");
        let b = v.token_for("EMAIL", "c@d.co");
        assert_eq!(a, "[EMAIL_1]");
        assert_eq!(b, "[EMAIL_2]");
        assert_eq!(v.token_for("EMAIL", "a@b.co"), a);
        assert_eq!(v.token_for("PHONE", "555-123-4567"), "[PHONE_1]");
        assert_eq!(v.resolve("[EMAIL_2]"), Some("c@d.co"));
        assert_eq!(v.resolve("[EMAIL_9]"), None);
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn test_reserved_token_never_minted() {
        let mut v = PiiVault::new();
        v.reserve("[EMAIL_2]");
        assert!(v.is_reserved("[EMAIL_2]"));
        assert_eq!(v.token_for("EMAIL", "a@b.co"), "[EMAIL_3]");
        assert_eq!(v.resolve("[EMAIL_2]"), None);

        // Issued tokens are not demoted.
        v.reserve("[EMAIL_3]");
        assert_eq!(v.resolve("[EMAIL_3]"), Some("a@b.co"));
        assert!(!v.is_reserved("[EMAIL_3]"));
    }
}
