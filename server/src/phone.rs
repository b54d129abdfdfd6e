//! US phone number normalization and display formatting.
//!
//! Canonical storage form is E.164 US: `+1` followed by exactly ten digits.

/// Normalize a raw phone string to canonical `+1XXXXXXXXXX` form.
///
/// Accepts common operator input shapes: `(555) 123-4567`, `555-123-4567`,
/// `15551234567`, `+15551234567`. Returns `None` when the digits do not form
/// a ten-digit US number.
pub fn normalize(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        _ => None,
    }
}

/// Whether a string is already in canonical `+1XXXXXXXXXX` form.
pub fn is_canonical(phone: &str) -> bool {
    phone.len() == 12
        && phone.starts_with("+1")
        && phone[2..].chars().all(|c| c.is_ascii_digit())
}

/// Display form `(XXX) XXX-XXXX`, derived by stripping the `+1` prefix and
/// grouping 3-3-4. Non-canonical input is returned unchanged.
pub fn format_display(phone: &str) -> String {
    if !is_canonical(phone) {
        return phone.to_string();
    }

    let digits = &phone[2..];
    format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_shapes() {
        assert_eq!(normalize("5551234567").as_deref(), Some("+15551234567"));
        assert_eq!(normalize("15551234567").as_deref(), Some("+15551234567"));
        assert_eq!(normalize("+1 (555) 123-4567").as_deref(), Some("+15551234567"));
        assert_eq!(normalize("555.123.4567").as_deref(), Some("+15551234567"));
    }

    #[test]
    fn rejects_short_long_and_non_us() {
        assert_eq!(normalize("555123456"), None);
        assert_eq!(normalize("555123456789"), None);
        assert_eq!(normalize("+442071838750"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("not a phone"), None);
    }

    #[test]
    fn canonical_check() {
        assert!(is_canonical("+15551234567"));
        assert!(!is_canonical("+1555123456"));
        assert!(!is_canonical("15551234567"));
        assert!(!is_canonical("+1555123456a"));
    }

    #[test]
    fn display_groups_3_3_4() {
        assert_eq!(format_display("+15551234567"), "(555) 123-4567");
        // Unparseable input passes through untouched.
        assert_eq!(format_display("anonymous"), "anonymous");
    }
}
