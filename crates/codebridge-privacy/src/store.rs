//! `TokenizationService`: one vault per open session.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;

use crate::rules::PiiRuleSet;
use crate::transform;
use crate::vault::PiiVault;
use crate::{PrivacyError, Result};

/// Reversible tokenization keyed by session id.
///
/// Mutation of one session's vault is serialised by that vault's mutex; the
/// outer map lock is only held to look a vault up, so sessions never contend
/// on each other's work.
pub struct TokenizationService {
    rules: PiiRuleSet,
    vaults: RwLock<HashMap<String, Arc<Mutex<PiiVault>>>>,
}

impl Default for TokenizationService {
    fn default() -> Self {
        Self::new(PiiRuleSet::default())
    }
}

impl TokenizationService {
    pub fn new(rules: PiiRuleSet) -> Self {
        Self {
            rules,
            vaults: RwLock::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &PiiRuleSet {
        &self.rules
    }

    /// Create the session's vault. Opening an already open session keeps the
    /// existing mapping.
    pub fn open(&self, session_id: &str) {
        let mut vaults = self.vaults.write().unwrap_or_else(PoisonError::into_inner);
        vaults
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PiiVault::new())));
    }

    /// Drop the vault; its tokens can never be decoded again.
    pub fn close(&self, session_id: &str) -> bool {
        let mut vaults = self.vaults.write().unwrap_or_else(PoisonError::into_inner);
        let removed = vaults.remove(session_id);
        if let Some(ref vault) = removed {
            let size = vault.lock().map(|v| v.len()).unwrap_or(0);
            tracing::debug!(session_id, tokens = size, "tokenization vault closed");
        }
        removed.is_some()
    }

    pub fn is_open(&self, session_id: &str) -> bool {
        let vaults = self.vaults.read().unwrap_or_else(PoisonError::into_inner);
        vaults.contains_key(session_id)
    }

    fn vault(&self, session_id: &str) -> Option<Arc<Mutex<PiiVault>>> {
        let vaults = self.vaults.read().unwrap_or_else(PoisonError::into_inner);
        vaults.get(session_id).cloned()
    }

    /// Replace every sensitive string leaf with its session token.
    pub fn tokenize(&self, session_id: &str, value: &Value) -> Result<Value> {
        let vault = self
            .vault(session_id)
            .ok_or_else(|| PrivacyError::VaultClosed(session_id.to_string()))?;
        let mut vault = vault.lock().unwrap_or_else(PoisonError::into_inner);
        for token in transform::tokens_in_value(value) {
            vault.reserve(&token);
        }
        Ok(transform::tokenize_value(
            &self.rules,
            value,
            &mut |category, original| vault.token_for(category, original),
        ))
    }

    pub fn tokenize_text(&self, session_id: &str, text: &str) -> Result<String> {
        let vault = self
            .vault(session_id)
            .ok_or_else(|| PrivacyError::VaultClosed(session_id.to_string()))?;
        let mut vault = vault.lock().unwrap_or_else(PoisonError::into_inner);
        for (start, end) in transform::token_spans(text) {
            vault.reserve(&text[start..end]);
        }
        Ok(transform::tokenize_str(
            &self.rules,
            text,
            &mut |category, original| vault.token_for(category, original),
        ))
    }

    /// Restore originals for known tokens. Without an open vault the value is
    /// returned as is.
    pub fn detokenize(&self, session_id: &str, value: &Value) -> Value {
        let Some(vault) = self.vault(session_id) else {
            return value.clone();
        };
        let vault = vault.lock().unwrap_or_else(PoisonError::into_inner);
        transform::detokenize_value(value, &|token| vault.resolve(token).map(str::to_string))
    }

    /// Stateless `[CATEGORY]` masking, for text that must not be tokenized
    /// into a vault (closed sessions, error paths).
    pub fn redact_text(&self, text: &str) -> String {
        transform::redact_str(&self.rules, text)
    }

    pub fn mapping_snapshot(&self, session_id: &str) -> Option<BTreeMap<String, String>> {
        let vault = self.vault(session_id)?;
        let vault = vault.lock().unwrap_or_else(PoisonError::into_inner);
        Some(vault.snapshot())
    }

    pub fn open_sessions(&self) -> usize {
        self.vaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alice_example() {
        let svc = TokenizationService::default();
        svc.open("s1");
        let out = svc
            .tokenize("s1", &json!("Contact alice@example.com"))
            .unwrap();
        assert_eq!(out, json!("Contact [EMAIL_1]"));
        assert_eq!(svc.detokenize("s1", &out), json!("Contact alice@example.com"));
    }

    #[test]
    fn test_round_trip_nested() {
        let svc = TokenizationService::default();
        svc.open("s1");
        let v = json!({
            "users": [
                {"email": "a@b.co", "ssn": "123-45-6789", "age": 40},
                {"email": "a@b.co", "note": "server 192.168.0.1 and card 4111-1111-1111-1111"}
            ],
            "ok": true
        });
        let t = svc.tokenize("s1", &v).unwrap();
        assert_eq!(t["users"][0]["email"], t["users"][1]["email"]);
        assert_eq!(t["users"][0]["age"], 40);
        assert!(!t.to_string().contains("a@b.co"));
        assert_eq!(svc.detokenize("s1", &t), v);
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let svc = TokenizationService::default();
        svc.open("s1");
        let v = json!(["x@y.org", "+1 555-222-3333", "plain"]);
        let once = svc.tokenize("s1", &v).unwrap();
        let twice = svc.tokenize("s1", &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_literal_token_text_is_not_reused() {
        let svc = TokenizationService::default();
        svc.open("s1");
        let t1 = svc
            .tokenize("s1", &json!("template placeholder [EMAIL_1] stays literal"))
            .unwrap();
        let t2 = svc.tokenize("s1", &json!("contact a@b.co")).unwrap();
        assert_eq!(t2, json!("contact [EMAIL_2]"));
        assert_eq!(
            svc.detokenize("s1", &t1),
            json!("template placeholder [EMAIL_1] stays literal")
        );
        assert_eq!(svc.detokenize("s1", &t2), json!("contact a@b.co"));

        // Literal and real value in the same payload.
        let mixed = json!({"real": "x@y.org", "quoted": "see [EMAIL_3]"});
        let t = svc.tokenize("s1", &mixed).unwrap();
        assert_eq!(t["real"], json!("[EMAIL_4]"));
        assert_eq!(svc.detokenize("s1", &t), mixed);

        let text = svc.tokenize_text("s1", "[PHONE_1] vs 555-123-4567").unwrap();
        assert_eq!(text, "[PHONE_1] vs [PHONE_2]");
        assert_eq!(
            svc.detokenize("s1", &json!(text)),
            json!("[PHONE_1] vs 555-123-4567")
        );
    }

    #[test]
    fn test_session_isolation() {
        let svc = TokenizationService::default();
        svc.open("a");
        svc.open("b");
        let ta = svc.tokenize("a", &json!("a@b.co")).unwrap();
        assert_eq!(svc.detokenize("b", &ta), ta);

        svc.close("a");
        assert_eq!(svc.detokenize("a", &ta), ta);
        assert!(matches!(
            svc.tokenize("a", &json!("x")),
            Err(PrivacyError::VaultClosed(_))
        ));
        // Re-opening starts from an empty mapping.
        svc.open("a");
        assert_eq!(svc.detokenize("a", &ta), ta);
    }

    #[test]
    fn test_non_sensitive_text_untouched() {
        let svc = TokenizationService::default();
        svc.open("s");
        let v = json!({"msg": "nothing to see", "n": 3.5});
        assert_eq!(svc.tokenize("s", &v).unwrap(), v);
        assert_eq!(svc.mapping_snapshot("s").unwrap().len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tokenize_same_session_is_consistent() {
        let svc = Arc::new(TokenizationService::default());
        svc.open("s");
        let mut handles = Vec::new();
        for i in 0..16 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                let email = format!("user{}@corp.io", i % 4);
                svc.tokenize("s", &json!(email)).unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let map = svc.mapping_snapshot("s").unwrap();
        assert_eq!(map.len(), 4);
        let mut tokens: Vec<&String> = map.keys().collect();
        tokens.sort();
        assert_eq!(
            tokens,
            ["[EMAIL_1]", "[EMAIL_2]", "[EMAIL_3]", "[EMAIL_4]"]
        );
    }
}
