//! URL scrubbing for captured profiles.
//!
//! Profiles embed page and script URLs in arbitrary string fields (marker
//! payloads, function names, resource tables). [`Purger`] walks a
//! structured value and rewrites every `http(s)://` URL it finds in place:
//!
//! ```text
//! Visit http://example.org/download.js:15  ->  Visit //Vk3x_9qPa1Z/bq7M-2LsQe0:15
//! Visit https://mail.google.com/inbox      ->  Visit //mail.google.com/h0Yy2aN_kq4
//! ```
//!
//! Hosts on the [`Whitelist`] are kept verbatim; other hosts and all paths
//! are replaced by random tokens. Tokens are cached for the lifetime of the
//! `Purger`, so the same host always maps to the same token and repeated
//! visits can still be correlated without revealing the host.
//!
//! Only strings that contain a scheme are touched. Bare domains, numbers,
//! booleans and numeric strings pass through unchanged.

mod whitelist;

pub use whitelist::{Whitelist, DEFAULT_HOSTS};

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use rand::Rng;
use regex::{Captures, Regex};
use serde_json::Value;

/// Scheme, optional `www.`, host up to `/`, `?`, `#`, whitespace, `)` or a
/// quote, then a path up to whitespace, `)`, `:` or a quote. Query strings
/// and fragments directly after the host land in the path group.
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:www\.)?([^/?#\s)"']+)([^\s):"']*)"#)
        .expect("URL regex should compile")
});

/// URL-safe alphabet for generated tokens.
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Token length in characters (66 bits of randomness).
pub const TOKEN_LEN: usize = 11;

/// Replaces URLs in structured values with stable pseudonymous tokens.
#[derive(Debug)]
pub struct Purger {
    whitelist: Whitelist,
    /// raw slice -> token, append-only
    cache: HashMap<String, String>,
    /// every token handed out, to keep tokens distinct
    issued: HashSet<String>,
}

impl Purger {
    pub fn new(whitelist: Whitelist) -> Self {
        Self {
            whitelist,
            cache: HashMap::new(),
            issued: HashSet::new(),
        }
    }

    /// Purges every string inside `value`, preserving shape, order and keys.
    pub fn purge(&mut self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.purge_str(&s)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.purge(v)).collect()),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, v)| (key, self.purge(v)))
                    .collect(),
            ),
            other @ (Value::Null | Value::Bool(_) | Value::Number(_)) => other,
        }
    }

    /// Rewrites the URLs in one string; everything between matches is kept.
    pub fn purge_str(&mut self, text: &str) -> String {
        if !text.contains("://") {
            return text.to_string();
        }
        URL_PATTERN
            .replace_all(text, |caps: &Captures| self.replace_url(caps))
            .into_owned()
    }

    fn replace_url(&mut self, caps: &Captures) -> String {
        let host = &caps[1];
        let path = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        let mut cleaned = String::from("//");
        if self.whitelist.contains(host) {
            cleaned.push_str(host);
        } else {
            cleaned.push_str(&self.pseudonymize(host));
        }
        if !path.is_empty() && path != "/" {
            cleaned.push('/');
            cleaned.push_str(&self.pseudonymize(path));
        }
        cleaned
    }

    /// Returns the token for `slice`, generating and caching one on first use.
    pub fn pseudonymize(&mut self, slice: &str) -> String {
        if let Some(token) = self.cache.get(slice) {
            return token.clone();
        }
        let token = loop {
            let candidate = random_token();
            if self.issued.insert(candidate.clone()) {
                break candidate;
            }
        };
        self.cache.insert(slice.to_string(), token.clone());
        token
    }

    /// Number of distinct slices seen so far
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }
}

impl Default for Purger {
    fn default() -> Self {
        Self::new(Whitelist::default())
    }
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// `prefix` + `//` + token + optional (`/` + token) + `suffix`
    fn assert_tokenized(actual: &str, prefix: &str, host: Option<&str>, path: bool, suffix: &str) {
        let rest = actual
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix("//"))
            .and_then(|r| r.strip_suffix(suffix))
            .unwrap_or_else(|| panic!("unexpected shape: {actual:?}"));
        let mut parts = rest.splitn(2, '/');
        let head = parts.next().unwrap();
        match host {
            Some(h) => assert_eq!(head, h, "host in {actual:?}"),
            None => assert_token(head),
        }
        match (path, parts.next()) {
            (true, Some(p)) => assert_token(p),
            (false, None) => {}
            (want, got) => panic!("path expected={want} got={got:?} in {actual:?}"),
        }
    }

    fn assert_token(token: &str) {
        assert!(
            (7..=15).contains(&token.len()),
            "token length out of range: {token:?}"
        );
        assert!(
            token
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-'),
            "token not url-safe: {token:?}"
        );
    }

    fn purge(value: Value) -> Value {
        Purger::default().purge(value)
    }

    fn purge_one(text: &str) -> String {
        Purger::default().purge_str(text)
    }

    #[test]
    fn unknown_domain_simple_strings() {
        assert_tokenized(&purge_one("Visit http://example.org"), "Visit ", None, false, "");
        assert_tokenized(&purge_one("Visit http://example.org/"), "Visit ", None, false, "");
        assert_tokenized(&purge_one("Visit http://google.com.cool"), "Visit ", None, false, "");
        assert_tokenized(&purge_one("Visit http://google.co"), "Visit ", None, false, "");
        assert_tokenized(&purge_one("Visit https://www.example.org"), "Visit ", None, false, "");
    }

    #[test]
    fn unknown_domain_quoted() {
        assert_tokenized(&purge_one("Visit \"http://example.org/\""), "Visit \"", None, false, "\"");
        assert_tokenized(&purge_one("Visit 'http://example.org/'"), "Visit '", None, false, "'");
        assert_tokenized(&purge_one("at (http://example.org/a.js)"), "at (", None, true, ")");
    }

    #[test]
    fn unknown_domain_with_file_and_line() {
        assert_tokenized(&purge_one("Visit http://example.org/download.js"), "Visit ", None, true, "");
        assert_tokenized(
            &purge_one("Visit http://example.org/download.js:15"),
            "Visit ",
            None,
            true,
            ":15",
        );
    }

    #[test]
    fn query_without_slash_is_path() {
        let mut purger = Purger::default();
        let out = purger.purge_str("http://example.org?q=secret");
        assert_tokenized(&out, "", None, true, "");
        assert_eq!(purger.cache_len(), 2);
        assert!(!out.contains("secret"));

        let out = purger.purge_str("http://example.org/?q=secret#frag");
        assert!(!out.contains("secret"));
        assert!(!out.contains("frag"));
        assert_tokenized(&out, "", None, true, "");
    }

    #[test]
    fn trailing_punctuation_stays_in_path() {
        let mut purger = Purger::default();
        let out = purger.purge_str("See http://example.org/page. Then stop.");
        assert!(out.ends_with(" Then stop."), "{out:?}");
        assert_tokenized(out.strip_suffix(" Then stop.").unwrap(), "See ", None, true, "");

        let out = purger.purge_str("hosts: http://example.org/a, http://example.net/b");
        assert!(!out.contains("example"), "{out:?}");
        assert_eq!(out.matches(", ").count(), 1, "{out:?}");
    }

    #[test]
    fn bare_host_stops_at_quote_or_paren() {
        assert_tokenized(&purge_one("at (http://example.org)"), "at (", None, false, ")");
        assert_tokenized(&purge_one("Visit 'http://example.org'"), "Visit '", None, false, "'");
        assert_tokenized(
            &purge_one("Visit \"http://example.org\" now"),
            "Visit \"",
            None,
            false,
            "\" now",
        );
        assert_eq!(
            purge_one("Visit \"http://google.com\""),
            "Visit \"//google.com\""
        );
        assert_eq!(
            purge_one("{'src':'https://www.github.com'}"),
            "{'src':'//github.com'}"
        );
    }

    #[test]
    fn arrays_objects_and_nesting() {
        let clean = purge(json!([
            "Visit http://example.org/",
            {
                "a": "Visit http://example.org/",
                "b": ["Visit http://example.org/", "Visit https://example.com/"]
            }
        ]));
        assert_tokenized(clean[0].as_str().unwrap(), "Visit ", None, false, "");
        assert_tokenized(clean[1]["a"].as_str().unwrap(), "Visit ", None, false, "");
        assert_tokenized(clean[1]["b"][0].as_str().unwrap(), "Visit ", None, false, "");
        assert_tokenized(clean[1]["b"][1].as_str().unwrap(), "Visit ", None, false, "");
        assert_eq!(clean[1].as_object().unwrap().len(), 2);
    }

    #[test]
    fn same_slice_same_token() {
        let mut purger = Purger::default();
        let first = purger.purge_str("Visit http://example.org/a.js");
        let second = purger.purge_str("again http://example.org/a.js");
        assert_eq!(first.strip_prefix("Visit "), second.strip_prefix("again "));

        let other = purger.purge_str("Visit http://example.net/a.js");
        assert_ne!(first, other);
        assert_eq!(purger.pseudonymize("example.org"), purger.pseudonymize("example.org"));
        assert_ne!(purger.pseudonymize("example.org"), purger.pseudonymize("example.net"));
    }

    #[test]
    fn host_and_path_tokens_are_independent() {
        let mut purger = Purger::default();
        let out = purger.purge_str("http://example.org/example.org");
        let (host, path) = out.trim_start_matches("//").split_once('/').unwrap();
        assert_ne!(host, path);
    }

    #[test]
    fn untouched_values() {
        assert_eq!(purge(json!("")), json!(""));
        assert_eq!(purge(json!("foo bar")), json!("foo bar"));
        assert_eq!(purge(json!(false)), json!(false));
        assert_eq!(purge(json!(null)), json!(null));
        assert_eq!(purge(json!(5)), json!(5));
        assert_eq!(purge(json!("5")), json!("5"));
        assert_eq!(purge(json!(5.4321)), json!(5.4321));
        assert_eq!(purge(json!(u64::MAX)), json!(u64::MAX));
        assert_eq!(purge(json!("example.org/path")), json!("example.org/path"));
        assert_eq!(purge(json!("ftp://example.org/x")), json!("ftp://example.org/x"));
    }

    #[test]
    fn url_free_structures_are_identity() {
        let value = json!({
            "meta": { "interval": 2.0, "product": "Firefox", "startTime": 1_500_000_000_000u64 },
            "threads": [{
                "name": "GeckoMain",
                "samples": { "schema": { "stack": 0, "time": 1 }, "data": [[1, 2.5], [2, 3.5]] },
                "stringTable": ["js::RunScript", "(root)", "-1", "true"]
            }],
            "empty": {},
            "list": []
        });
        assert_eq!(purge(value.clone()), value);
    }

    #[test]
    fn whitelisted_domains() {
        assert_eq!(purge_one("Visit http://google.com"), "Visit //google.com");
        assert_eq!(purge_one("Visit http://google.com/"), "Visit //google.com");
        assert_eq!(purge_one("Visit http://mail.google.com"), "Visit //mail.google.com");
        assert_eq!(purge_one("Visit http://mail.google.com/"), "Visit //mail.google.com");
        assert_eq!(purge_one("Visit https://www.github.com/"), "Visit //github.com");

        assert_tokenized(
            &purge_one("Visit http://google.com/download.js"),
            "Visit ",
            Some("google.com"),
            true,
            "",
        );
        assert_tokenized(
            &purge_one("Visit http://mail.google.com/download.js:15"),
            "Visit ",
            Some("mail.google.com"),
            true,
            ":15",
        );
    }

    #[test]
    fn every_whitelisted_domain_is_kept() {
        let mut purger = Purger::default();
        for host in DEFAULT_HOSTS {
            let out = purger.purge_str(&format!("visit http://{host}/x"));
            let expected = format!("//{host}/");
            assert!(out.contains(&expected), "{out:?} lacks {expected:?}");
            assert_token(out.rsplit('/').next().unwrap());
        }
    }

    #[test]
    fn extra_whitelist_from_config() {
        let mut purger = Purger::new(Whitelist::with_extra(["intranet.example"]));
        assert_eq!(purger.purge_str("http://intranet.example/"), "//intranet.example");
    }

    #[test]
    fn multiple_urls_in_one_string() {
        let mut purger = Purger::default();
        let out = purger.purge_str("a http://one.example/x b https://two.example c");
        let words: Vec<&str> = out.split(' ').collect();
        assert_eq!(words.len(), 5);
        assert_eq!((words[0], words[2], words[4]), ("a", "b", "c"));
        assert_tokenized(words[1], "", None, true, "");
        assert_tokenized(words[3], "", None, false, "");
    }
}
