//! Cell cleaning: raw CSV text to typed values.

use common::model::record::CellValue;

/// Trim, normalise non-breaking spaces, and type the token:
/// empty → null, `-?\d+(\.\d+)?` → number, `true|false` (any case) →
/// boolean, anything else stays text.
pub fn clean(raw: &str) -> CellValue {
    let normalized = raw.replace('\u{00A0}', " ");
    let token = normalized.trim();
    if token.is_empty() {
        return CellValue::Null;
    }
    if is_decimal(token) {
        if let Ok(n) = token.parse::<f64>() {
            return CellValue::Number(n);
        }
    }
    if token.eq_ignore_ascii_case("true") {
        return CellValue::Bool(true);
    }
    if token.eq_ignore_ascii_case("false") {
        return CellValue::Bool(false);
    }
    CellValue::Text(token.to_string())
}

fn is_decimal(token: &str) -> bool {
    let unsigned = token.strip_prefix('-').unwrap_or(token);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(int) && frac.map_or(true, all_digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_tokens() {
        assert_eq!(clean("  "), CellValue::Null);
        assert_eq!(clean(" 42 "), CellValue::Number(42.0));
        assert_eq!(clean("-3.25"), CellValue::Number(-3.25));
        assert_eq!(clean("TRUE"), CellValue::Bool(true));
        assert_eq!(clean("False"), CellValue::Bool(false));
        assert_eq!(clean(" Ana "), CellValue::Text("Ana".into()));
    }

    #[test]
    fn near_numbers_stay_text() {
        assert_eq!(clean("1."), CellValue::Text("1.".into()));
        assert_eq!(clean(".5"), CellValue::Text(".5".into()));
        assert_eq!(clean("1e3"), CellValue::Text("1e3".into()));
        assert_eq!(clean("+1"), CellValue::Text("+1".into()));
        assert_eq!(clean("1,000"), CellValue::Text("1,000".into()));
    }

    #[test]
    fn non_breaking_space_is_trimmed() {
        assert_eq!(clean("\u{00A0}Ana\u{00A0}"), CellValue::Text("Ana".into()));
    }
}
