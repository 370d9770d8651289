//! Stateless transform logic: span selection, token splicing, JSON walking.
//!
//! The functions here never own a vault; callers pass a `mint` closure for
//! tokenizing and a `resolve` closure for detokenizing.

use serde_json::Value;

use crate::rules::PiiRuleSet;

/// A matched region of a string, in byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub category: String,
}

impl Span {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Byte ranges of `[CATEGORY_N]` tokens already present in `text`.
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(len) = token_len(&bytes[i..]) {
                spans.push((i, i + len));
                i += len;
                continue;
            }
        }
        i += 1;
    }
    spans
}

/// Length of the token starting at `s[0] == b'['`, if there is one.
fn token_len(s: &[u8]) -> Option<usize> {
    let close = s.iter().position(|&b| b == b']')?;
    let inner = &s[1..close];
    let underscore = inner.iter().rposition(|&b| b == b'_')?;
    let (category, counter) = (&inner[..underscore], &inner[underscore + 1..]);
    let category_ok = matches!(category.first(), Some(c) if c.is_ascii_uppercase())
        && category
            .iter()
            .all(|&c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == b'_');
    let counter_ok = !counter.is_empty() && counter.iter().all(u8::is_ascii_digit);
    (category_ok && counter_ok).then_some(close + 1)
}

/// Single pass over every rule. Candidates are accepted in rule order unless
/// they overlap an accepted span or an existing token. Result is sorted by
/// position.
pub fn find_spans(rules: &PiiRuleSet, text: &str) -> Vec<Span> {
    let existing = token_spans(text);
    let mut accepted: Vec<Span> = Vec::new();
    for rule in rules.rules() {
        for m in rule.pattern().find_iter(text) {
            if m.start() == m.end() {
                continue;
            }
            let clashes_token = existing
                .iter()
                .any(|&(s, e)| s < m.end() && m.start() < e);
            let clashes_span = accepted.iter().any(|a| a.overlaps(m.start(), m.end()));
            if !clashes_token && !clashes_span {
                accepted.push(Span {
                    start: m.start(),
                    end: m.end(),
                    category: rule.category().to_string(),
                });
            }
        }
    }
    accepted.sort_by_key(|s| s.start);
    accepted
}

/// Replace every detected value; `mint(category, value)` returns its token.
pub fn tokenize_str<F>(rules: &PiiRuleSet, text: &str, mint: &mut F) -> String
where
    F: FnMut(&str, &str) -> String,
{
    let spans = find_spans(rules, text);
    if spans.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&text[cursor..span.start]);
        out.push_str(&mint(&span.category, &text[span.start..span.end]));
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Tokenize every string leaf. Keys, numbers, booleans and null pass through.
pub fn tokenize_value<F>(rules: &PiiRuleSet, value: &Value, mint: &mut F) -> Value
where
    F: FnMut(&str, &str) -> String,
{
    match value {
        Value::String(s) => Value::String(tokenize_str(rules, s, mint)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| tokenize_value(rules, v, mint))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), tokenize_value(rules, v, mint)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Every token-shaped literal in the string leaves of `value`.
pub fn tokens_in_value(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_tokens(value, &mut found);
    found
}

fn collect_tokens(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            found.extend(token_spans(s).into_iter().map(|(a, b)| s[a..b].to_string()))
        }
        Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_tokens(v, found)),
        _ => {}
    }
}

/// Replace known tokens; unknown ones stay as they are.
pub fn detokenize_str<F>(text: &str, resolve: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let spans = token_spans(text);
    if spans.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in spans {
        out.push_str(&text[cursor..start]);
        let token = &text[start..end];
        match resolve(token) {
            Some(original) => out.push_str(&original),
            None => out.push_str(token),
        }
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

pub fn detokenize_value<F>(value: &Value, resolve: &F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => Value::String(detokenize_str(s, resolve)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| detokenize_value(v, resolve)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), detokenize_value(v, resolve)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Irreversible fallback: detected values become `[CATEGORY]`.
pub fn redact_str(rules: &PiiRuleSet, text: &str) -> String {
    tokenize_str(rules, text, &mut |category, _| format!("[{}]", category))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn counter_mint() -> impl FnMut(&str, &str) -> String {
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut counts: HashMap<String, u64> = HashMap::new();
        move |cat: &str, value: &str| {
            seen.entry(value.to_string())
                .or_insert_with(|| {
                    let n = counts.entry(cat.to_string()).or_insert(0);
                    *n += 1;
                    format!("[{}_{}]", cat, n)
                })
                .clone()
        }
    }

    #[test]
    fn test_token_spans() {
        let t = "a [EMAIL_1] b [bad] [X_] [PHONE_12] [lower_1]";
        let spans: Vec<&str> = token_spans(t).iter().map(|&(s, e)| &t[s..e]).collect();
        assert_eq!(spans, ["[EMAIL_1]", "[PHONE_12]"]);
    }

    #[test]
    fn test_tokens_in_value() {
        let v = json!({"a": ["x [EMAIL_3] y", 4], "[KEY_1]": {"b": "[PHONE_1][IP_ADDRESS_2]"}});
        let mut found = tokens_in_value(&v);
        found.sort();
        assert_eq!(found, ["[EMAIL_3]", "[IP_ADDRESS_2]", "[PHONE_1]"]);
    }

    #[test]
    fn test_each_builtin_category_detected() {
        let rules = PiiRuleSet::default();
        let cases = [
            ("mail bob@corp.io now", "EMAIL"),
            ("card 4111 1111 1111 1111 ok", "CREDIT_CARD"),
            ("ssn 123-45-6789", "SSN"),
            ("call (555) 123-4567", "PHONE"),
            ("host 10.0.0.254 up", "IP_ADDRESS"),
        ];
        for (text, cat) in cases {
            let spans = find_spans(&rules, text);
            assert_eq!(spans.len(), 1, "{text}");
            assert_eq!(spans[0].category, cat, "{text}");
        }
    }

    #[test]
    fn test_earlier_rule_wins_on_overlap() {
        let rules = PiiRuleSet::builder()
            .rule("FIRST", r"abc\d")
            .rule("SECOND", r"\d+")
            .build()
            .unwrap();
        let spans = find_spans(&rules, "abc1 22");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].category, "FIRST");
        assert_eq!(spans[1].category, "SECOND");
    }

    #[test]
    fn test_tokenize_is_idempotent() {
        let rules = PiiRuleSet::default();
        let mut mint = counter_mint();
        let once = tokenize_str(&rules, "reach me at a@b.co or 555-123-4567", &mut mint);
        assert_eq!(once, "reach me at [EMAIL_1] or [PHONE_1]");
        let twice = tokenize_str(&rules, &once, &mut mint);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_value_structure_preserved() {
        let rules = PiiRuleSet::default();
        let mut mint = counter_mint();
        let input = json!({
            "alice@example.com": ["alice@example.com", 7, null, true],
            "nested": {"ip": "1.2.3.4"}
        });
        let out = tokenize_value(&rules, &input, &mut mint);
        assert_eq!(
            out,
            json!({
                "alice@example.com": ["[EMAIL_1]", 7, null, true],
                "nested": {"ip": "[IP_ADDRESS_1]"}
            })
        );
    }

    #[test]
    fn test_detokenize_leaves_unknown_tokens() {
        let resolve = |t: &str| (t == "[EMAIL_1]").then(|| "a@b.co".to_string());
        assert_eq!(
            detokenize_str("[EMAIL_1] and [EMAIL_2]", &resolve),
            "a@b.co and [EMAIL_2]"
        );
    }

    #[test]
    fn test_redact() {
        let rules = PiiRuleSet::default();
        assert_eq!(
            redact_str(&rules, "lookup failed for x@y.org"),
            "lookup failed for [EMAIL]"
        );
    }
}
