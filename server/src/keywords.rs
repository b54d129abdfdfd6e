//! Keyword protocol: classification of inbound message bodies.
//!
//! Classification is pure; the caller performs the single keyword lookup
//! (by the normalized body) and hands the result in. Opt-out tokens always
//! win, even over an admin-created keyword literally named `STOP`.

use crate::models::SignupKeyword;

/// Fixed opt-out tokens. Matching is on the normalized body.
pub const OPT_OUT_TOKENS: [&str; 2] = ["STOP", "UNSUBSCRIBE"];

/// Routed intent of an inbound message.
#[derive(Debug, Clone)]
pub enum Intent {
    /// Entire body matched an active signup keyword.
    OptIn(SignupKeyword),
    /// Entire body matched a fixed opt-out token.
    OptOut,
    /// Everything else; the raw body is preserved downstream.
    Conversational,
}

/// Normalize a body (or an admin-entered keyword) for matching: trim
/// surrounding whitespace, uppercase. Keywords are persisted in this form.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Classify an inbound body given the keyword found for its normalized form.
pub fn classify(body: &str, keyword: Option<SignupKeyword>) -> Intent {
    let normalized = normalize(body);

    if OPT_OUT_TOKENS.contains(&normalized.as_str()) {
        return Intent::OptOut;
    }

    match keyword {
        Some(k) if k.is_active => Intent::OptIn(k),
        _ => Intent::Conversational,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn keyword(text: &str, active: bool) -> SignupKeyword {
        SignupKeyword {
            id: "kw1".to_string(),
            keyword: text.to_string(),
            auto_response: "Welcome!".to_string(),
            is_active: active,
            list_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn opt_out_tokens_classify_as_opt_out() {
        assert!(matches!(classify("STOP", None), Intent::OptOut));
        assert!(matches!(classify("stop", None), Intent::OptOut));
        assert!(matches!(classify("  Unsubscribe  ", None), Intent::OptOut));
    }

    #[test]
    fn opt_out_wins_over_a_keyword_named_stop() {
        let k = keyword("STOP", true);
        assert!(matches!(classify("stop", Some(k)), Intent::OptOut));
    }

    #[test]
    fn active_keyword_is_opt_in_case_insensitively() {
        let k = keyword("TRIBE", true);
        match classify("tribe", Some(k)) {
            Intent::OptIn(k) => assert_eq!(k.keyword, "TRIBE"),
            other => panic!("expected OptIn, got {other:?}"),
        }
    }

    #[test]
    fn inactive_keyword_falls_through_to_conversational() {
        let k = keyword("TRIBE", false);
        assert!(matches!(classify("TRIBE", Some(k)), Intent::Conversational));
    }

    #[test]
    fn plain_text_is_conversational() {
        assert!(matches!(
            classify("hey, when is the next meeting?", None),
            Intent::Conversational
        ));
    }

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize("  tribe \n"), "TRIBE");
        assert_eq!(normalize("Tribe"), "TRIBE");
    }
}
