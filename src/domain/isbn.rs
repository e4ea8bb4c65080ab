//! ISBN normalization
//!
//! Turns messy recognizer or user text into a validated ISBN-13. Existing
//! EAN-13 windows (prefix 978/979) are preferred; ISBN-10 windows are the
//! fallback and get converted. Both scans are leftmost-first.

use crate::domain::error::InvalidIdentifier;
use crate::domain::types::CanonicalId;

/// Length of a canonical identifier
pub const ISBN13_LEN: usize = 13;

/// Length of a legacy ISBN-10 window
pub const ISBN10_LEN: usize = 10;

/// Bookland prefixes accepted for canonical identifiers
const BOOKLAND_PREFIXES: [&[u8]; 2] = [b"978", b"979"];

/// Extract a checksum-valid ISBN-13 from arbitrary text.
///
/// Returns `None` when no window in either path validates. This is the normal
/// "nothing found" outcome, not an error.
pub fn normalize(text: &str) -> Option<CanonicalId> {
    let digits_plus_x: Vec<u8> = text
        .bytes()
        .filter(|b| b.is_ascii_digit() || *b == b'X' || *b == b'x')
        .collect();
    let digits_only: Vec<u8> = digits_plus_x.iter().copied().filter(u8::is_ascii_digit).collect();

    if let Some(found) = digits_only
        .windows(ISBN13_LEN)
        .find(|window| has_bookland_prefix(window) && is_valid_ean13(window))
    {
        return Some(CanonicalId::from_validated(found));
    }

    digits_plus_x.windows(ISBN10_LEN).find_map(isbn10_to_13)
}

/// Independent validity check for an externally supplied identifier.
///
/// Unlike [`normalize`] this does not search: the whole input must already be
/// the 13-digit identifier.
pub fn is_valid_canonical(text: &str) -> bool {
    validate_canonical(text).is_ok()
}

/// Like [`is_valid_canonical`] but reports which rule failed
pub fn validate_canonical(text: &str) -> Result<CanonicalId, InvalidIdentifier> {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return Err(InvalidIdentifier::Empty);
    }
    if bytes.len() != ISBN13_LEN {
        return Err(InvalidIdentifier::Length(bytes.len()));
    }
    if !bytes.iter().all(u8::is_ascii_digit) {
        return Err(InvalidIdentifier::NonDigit);
    }
    if !has_bookland_prefix(bytes) {
        return Err(InvalidIdentifier::Prefix);
    }
    if !is_valid_ean13(bytes) {
        return Err(InvalidIdentifier::Checksum);
    }
    Ok(CanonicalId::from_validated(bytes))
}

/// Compute the EAN-13 check digit over 12 ASCII digits.
///
/// Weights alternate 1, 3, 1, 3... starting at index 0.
pub fn ean13_check_digit(first12: &[u8]) -> u8 {
    debug_assert_eq!(first12.len(), ISBN13_LEN - 1);
    let sum: u32 = first12
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let n = u32::from(b - b'0');
            if i % 2 == 0 { n } else { n * 3 }
        })
        .sum();
    ((10 - (sum % 10)) % 10) as u8
}

/// Compute the ISBN-10 check value (0..=10, 10 meaning `X`) over 9 ASCII digits
pub fn isbn10_check_value(first9: &[u8]) -> u8 {
    debug_assert_eq!(first9.len(), ISBN10_LEN - 1);
    let sum: u32 = first9
        .iter()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * (10 - i as u32))
        .sum();
    match 11 - (sum % 11) {
        11 => 0,
        r => r as u8,
    }
}

/// Convert a 10-character ISBN-10 window to its ISBN-13 form.
///
/// The first nine characters must be digits and the last one a digit or
/// `X`/`x`. Returns `None` if the window is malformed or its check fails.
pub fn isbn10_to_13(window: &[u8]) -> Option<CanonicalId> {
    if window.len() != ISBN10_LEN {
        return None;
    }
    let (core, check) = window.split_at(ISBN10_LEN - 1);
    if !core.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let check_value = match check[0] {
        b @ b'0'..=b'9' => b - b'0',
        b'X' | b'x' => 10,
        _ => return None,
    };
    if check_value != isbn10_check_value(core) {
        return None;
    }

    let mut isbn13 = [0u8; ISBN13_LEN];
    isbn13[..3].copy_from_slice(b"978");
    isbn13[3..12].copy_from_slice(core);
    isbn13[12] = b'0' + ean13_check_digit(&isbn13[..12]);
    Some(CanonicalId::from_validated(&isbn13))
}

fn has_bookland_prefix(digits: &[u8]) -> bool {
    BOOKLAND_PREFIXES.iter().any(|prefix| digits.starts_with(prefix))
}

fn is_valid_ean13(digits: &[u8]) -> bool {
    digits.len() == ISBN13_LEN
        && digits.iter().all(u8::is_ascii_digit)
        && ean13_check_digit(&digits[..12]) == digits[12] - b'0'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(text: &str) -> Option<String> {
        normalize(text).map(|id| id.to_string())
    }

    #[test]
    fn test_plain_isbn13() {
        assert_eq!(norm("9780143127741").as_deref(), Some("9780143127741"));
    }

    #[test]
    fn test_isbn13_with_noise() {
        assert_eq!(norm("ISBN 978-0-143-12774-1").as_deref(), Some("9780143127741"));
    }

    #[test]
    fn test_isbn10_conversion() {
        assert_eq!(norm("0143127748").as_deref(), Some("9780143127741"));
    }

    #[test]
    fn test_isbn10_with_x_check() {
        // 080442957X -> 9780804429573
        assert_eq!(norm("0-8044-2957-X").as_deref(), Some("9780804429573"));
        assert_eq!(norm("080442957x").as_deref(), Some("9780804429573"));
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(norm("1234567890"), None);
        assert_eq!(norm("hello world"), None);
        assert_eq!(norm(""), None);
        assert_eq!(norm("978014312774"), None); // 12 digits, no valid 10-window
    }

    #[test]
    fn test_979_prefix() {
        // 979-10-90636-07-1 is a valid ISBN-13 with the 979 prefix
        assert_eq!(norm("979-10-90636-07-1").as_deref(), Some("9791090636071"));
    }

    #[test]
    fn test_leftmost_window_wins() {
        let text = "9780143127741 9791090636071";
        assert_eq!(norm(text).as_deref(), Some("9780143127741"));
    }

    #[test]
    fn test_extra_leading_digits_skipped() {
        // OCR often glues a price or page number in front
        assert_eq!(norm("12 9780143127741").as_deref(), Some("9780143127741"));
    }

    #[test]
    fn test_non_bookland_ean_not_accepted_by_13_path() {
        // Valid EAN-13 but not a book prefix
        assert_eq!(norm("5901234123457"), None);
    }

    #[test]
    fn test_13_path_preferred_over_10_path() {
        // The ISBN-10 window comes first in the text, but a valid 13-window exists
        let text = "0143127748 9791090636071";
        assert_eq!(norm(text).as_deref(), Some("9791090636071"));
    }

    #[test]
    fn test_x_inside_core_rejected() {
        assert_eq!(isbn10_to_13(b"01431X7748"), None);
    }

    #[test]
    fn test_ean13_check_digit() {
        assert_eq!(ean13_check_digit(b"978014312774"), 1);
        assert_eq!(ean13_check_digit(b"979109063607"), 1);
    }

    #[test]
    fn test_isbn10_check_value_mapping() {
        assert_eq!(isbn10_check_value(b"014312774"), 8);
        assert_eq!(isbn10_check_value(b"080442957"), 10);
        // sum % 11 == 0 -> r == 11 -> 0
        assert_eq!(isbn10_check_value(b"000000000"), 0);
    }

    #[test]
    fn test_validate_canonical() {
        assert!(is_valid_canonical("9780143127741"));
        assert_eq!(validate_canonical(""), Err(InvalidIdentifier::Empty));
        assert_eq!(validate_canonical("978014312774"), Err(InvalidIdentifier::Length(12)));
        assert_eq!(validate_canonical("97801431277a1"), Err(InvalidIdentifier::NonDigit));
        assert_eq!(validate_canonical("5901234123457"), Err(InvalidIdentifier::Prefix));
        assert_eq!(validate_canonical("9780143127742"), Err(InvalidIdentifier::Checksum));
    }

    #[test]
    fn test_idempotence() {
        for text in ["0143127748", "ISBN 978-0-143-12774-1", "979-10-90636-07-1"] {
            let once = normalize(text).expect("should normalize");
            assert_eq!(normalize(once.as_str()), Some(once.clone()));
        }
    }
}
