//! Link shortening for broadcast drafts: URL extraction, short-code minting,
//! and body rewriting.

use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::db::{self, DbPool};
use crate::models::Link;

/// Length of a minted short code.
pub const SHORT_CODE_LENGTH: usize = 8;

/// Attempts before giving up on a colliding short code.
const MAX_CODE_ATTEMPTS: usize = 5;

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").expect("static pattern"))
}

/// A draft after link tokenization.
#[derive(Debug, Clone)]
pub struct TokenizedDraft {
    pub body: String,
    pub links: Vec<Link>,
}

/// Extract URLs from a draft, deduplicated preserving first appearance.
pub fn extract_urls(draft: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for found in url_regex().find_iter(draft) {
        let url = found.as_str();
        if !seen.iter().any(|s| s == url) {
            seen.push(url.to_string());
        }
    }
    seen
}

/// Mint an 8-character [A-Za-z0-9] code, uniformly at random.
pub fn mint_short_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHORT_CODE_LENGTH)
        .map(char::from)
        .collect()
}

/// The public redirect URL for a short code.
pub fn short_url(base_url: &str, short_code: &str) -> String {
    format!("{base_url}/sanctuary/{short_code}")
}

/// Shorten the approved URLs of a draft for one broadcast.
///
/// Every occurrence of an approved URL is rewritten to its short form;
/// multiple occurrences share one code. URLs outside the approved set stay
/// verbatim and untracked. Persistence failure downgrades the whole draft to
/// its original body with zero links recorded; tokenization never fails a
/// send.
pub async fn tokenize_links(
    pool: &DbPool,
    broadcast_id: &str,
    draft: &str,
    approved_urls: Option<&[String]>,
    base_url: &str,
) -> TokenizedDraft {
    let mut links: Vec<Link> = Vec::new();

    for url in extract_urls(draft) {
        if let Some(approved) = approved_urls {
            if !approved.iter().any(|a| a == &url) {
                continue;
            }
        }

        let mut minted = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = mint_short_code();
            match db::insert_link(pool, broadcast_id, &url, &code).await {
                Ok(Some(link)) => {
                    minted = Some(link);
                    break;
                }
                // Collision: mint again.
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        error = %e,
                        broadcast_id = %broadcast_id,
                        "Link persistence failed, sending original body untracked"
                    );
                    return TokenizedDraft {
                        body: draft.to_string(),
                        links: Vec::new(),
                    };
                }
            }
        }

        match minted {
            Some(link) => links.push(link),
            None => warn!(
                url = %url,
                broadcast_id = %broadcast_id,
                "Short-code collision retries exhausted, leaving URL untokenized"
            ),
        }
    }

    // Rewrite longest URL first so a URL that prefixes another cannot
    // corrupt the longer occurrence.
    let mut rewrites: Vec<&Link> = links.iter().collect();
    rewrites.sort_by_key(|l| std::cmp::Reverse(l.original_url.len()));

    let mut body = draft.to_string();
    for link in rewrites {
        body = body.replace(&link.original_url, &short_url(base_url, &link.short_code));
    }

    TokenizedDraft { body, links }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_http_and_https_urls_in_order() {
        let draft = "See https://example.com/a and http://example.org/b today";
        assert_eq!(
            extract_urls(draft),
            vec!["https://example.com/a", "http://example.org/b"]
        );
    }

    #[test]
    fn deduplicates_preserving_first_appearance() {
        let draft = "https://a.com https://b.com https://a.com";
        assert_eq!(extract_urls(draft), vec!["https://a.com", "https://b.com"]);
    }

    #[test]
    fn plain_text_has_no_urls() {
        assert!(extract_urls("no links here, just words").is_empty());
    }

    #[test]
    fn short_codes_are_eight_alphanumerics() {
        for _ in 0..50 {
            let code = mint_short_code();
            assert_eq!(code.len(), SHORT_CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn short_url_shape() {
        assert_eq!(
            short_url("https://sanctuary.example.org", "Ab12Cd34"),
            "https://sanctuary.example.org/sanctuary/Ab12Cd34"
        );
    }
}
