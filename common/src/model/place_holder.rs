use serde::{Deserialize, Serialize};

/// Value type inferred for a data source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaceholderType {
    Text,
    Number,
    Currency,
    Email,
    Boolean,
}

impl PlaceholderType {
    /// Whether a cleaned cell value fits this column type.
    ///
    /// Blank cells fit every type; requiredness is a template concern.
    pub fn accepts(self, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return true;
        }
        match self {
            PlaceholderType::Text => true,
            PlaceholderType::Number => value.parse::<f64>().is_ok(),
            PlaceholderType::Currency => {
                let digits: String = value
                    .chars()
                    .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',')
                    .collect();
                digits.trim().parse::<f64>().is_ok()
            }
            PlaceholderType::Email => value.contains('@') && value.contains('.'),
            PlaceholderType::Boolean => {
                value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false")
            }
        }
    }

    /// Guess a column type from one sample value.
    pub fn infer(sample: &str) -> Self {
        let val = sample.trim();
        if val.contains('@') && val.contains('.') {
            PlaceholderType::Email
        } else if val.chars().any(|ch| CURRENCY_SYMBOLS.contains(&ch)) {
            PlaceholderType::Currency
        } else if val.eq_ignore_ascii_case("true") || val.eq_ignore_ascii_case("false") {
            PlaceholderType::Boolean
        } else if val.parse::<f64>().is_ok() {
            PlaceholderType::Number
        } else {
            PlaceholderType::Text
        }
    }
}

const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_from_sample() {
        assert_eq!(PlaceholderType::infer("a@x.io"), PlaceholderType::Email);
        assert_eq!(PlaceholderType::infer("$12"), PlaceholderType::Currency);
        assert_eq!(PlaceholderType::infer("12.5"), PlaceholderType::Number);
        assert_eq!(PlaceholderType::infer("TRUE"), PlaceholderType::Boolean);
        assert_eq!(PlaceholderType::infer("Ana"), PlaceholderType::Text);
    }

    #[test]
    fn currency_accepts_symbols_and_grouping() {
        assert!(PlaceholderType::Currency.accepts("€1,250.00"));
        assert!(!PlaceholderType::Currency.accepts("n/a"));
        assert!(PlaceholderType::Number.accepts(""));
    }
}
