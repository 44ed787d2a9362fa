//! Hosts that are common enough to keep verbatim in uploaded profiles.

use std::collections::HashSet;

/// Built-in list of high-traffic sites.
pub const DEFAULT_HOSTS: &[&str] = &[
    "google.com",
    "google.de",
    "google.fr",
    "youtube.com",
    "facebook.com",
    "twitter.com",
    "web.whatsapp.com",
    "messenger.com",
    "wikipedia.org",
    "yahoo.com",
    "bing.com",
    "pinterest.com",
    "reddit.com",
    "imgur.com",
    "live.com",
    "msn.com",
    "tumblr.com",
    "ask.com",
    "wikia.com",
    "yelp.com",
    "espn.com",
    "nytimes.com",
    "washingtonpost.com",
    "cnn.com",
    "huffingtonpost.com",
    "buzzfeed.com",
    "foxnews.com",
    "techcrunch.com",
    "lifehacker.com",
    "theverge.com",
    "gizmodo.com",
    "businessinsider.com",
    "economist.com",
    "bbc.com",
    "dailymail.co.uk",
    "instagram.com",
    "linkedin.com",
    "ebay.com",
    "amazon.com",
    "amazon.de",
    "amazon.fr",
    "booking.com",
    "walmart.com",
    "web.de",
    "ebay-kleinanzeigen.de",
    "gmx.net",
    "bild.de",
    "lemonde.fr",
    "flipkart.com",
    "globo.com",
    "uol.com.br",
    "yandex.ru",
    "ok.ru",
    "netflix.com",
    "hulu.com",
    "office.com",
    "slack.com",
    "trello.com",
    "github.com",
    "dropbox.com",
    "salesforce.com",
    "stackoverflow.com",
    "medium.com",
];

/// Read-only set of benign hosts.
///
/// A host matches when it equals an entry or is a subdomain of one, so
/// `mail.google.com` is kept while `google.com.cool` is not.
#[derive(Debug, Clone)]
pub struct Whitelist {
    hosts: HashSet<String>,
}

impl Whitelist {
    /// Built-in hosts plus `extra`.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = DEFAULT_HOSTS
            .iter()
            .map(|h| normalize(h))
            .chain(extra.into_iter().map(|h| normalize(h.as_ref())))
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn contains(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if self.hosts.contains(&host) {
            return true;
        }
        // Walk parent domains: a.b.c -> b.c -> c
        let mut rest = host.as_str();
        while let Some((_, parent)) = rest.split_once('.') {
            if self.hosts.contains(parent) {
                return true;
            }
            rest = parent;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::with_extra(std::iter::empty::<&str>())
    }
}

/// URLs are matched with any leading `www.` already stripped.
fn normalize(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}
