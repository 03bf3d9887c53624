/// Default dialling code used when a number is written in national form.
pub const DEFAULT_COUNTRY_CODE: &str = "27";

/// Canonical form of a phone number: digits only, international form
/// without the `+` or `00` prefix.
///
/// National numbers (leading trunk `0`) get `country_code` prepended, so
/// `+27 82 123 4567`, `0821234567`, `27821234567` and `0027821234567` all
/// normalize to `27821234567`. Returns `None` when no digits remain.
pub fn normalize_phone(input: &str, country_code: &str) -> Option<String> {
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    if let Some(rest) = digits.strip_prefix("00") {
        return (!rest.is_empty()).then(|| rest.to_string());
    }
    if let Some(rest) = digits.strip_prefix('0') {
        return Some(format!("{}{}", country_code, rest));
    }
    Some(digits)
}

/// Digits of a partial input, used for prefix/substring matching while the
/// user is still typing. A leading trunk `0` is dropped so `082` matches
/// stored `2782...` keys.
pub fn partial_digits(input: &str) -> String {
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.strip_prefix("00") {
        Some(rest) => rest.to_string(),
        None => digits.strip_prefix('0').unwrap_or(&digits).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting_variants_reconcile() {
        let expected = Some("27821234567".to_string());
        assert_eq!(normalize_phone("+27 82 123 4567", "27"), expected);
        assert_eq!(normalize_phone("0821234567", "27"), expected);
        assert_eq!(normalize_phone("27821234567", "27"), expected);
        assert_eq!(normalize_phone("0027-82-123-4567", "27"), expected);
        assert_eq!(normalize_phone("(082) 123 4567", "27"), expected);
    }

    #[test]
    fn empty_input_has_no_canonical_form() {
        assert_eq!(normalize_phone("", "27"), None);
        assert_eq!(normalize_phone("+ - ()", "27"), None);
        assert_eq!(normalize_phone("00", "27"), None);
    }

    #[test]
    fn partial_digits_drop_trunk_prefix() {
        assert_eq!(partial_digits("082 1"), "821");
        assert_eq!(partial_digits("+2782"), "2782");
    }
}
