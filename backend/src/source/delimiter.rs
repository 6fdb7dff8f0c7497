//! Field delimiter detection.

/// Candidate delimiters in tie-break order.
pub const CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

const SAMPLE_LINES: usize = 5;

/// Pick the delimiter whose per-line field count is most consistent across
/// the first five non-empty lines. Ties favour more fields on the header
/// line, then candidate order. Falls back to `,`.
pub fn detect(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| has_content(line))
        .take(SAMPLE_LINES)
        .collect();
    if lines.is_empty() {
        return b',';
    }

    CANDIDATES
        .iter()
        .rev()
        .filter_map(|&delimiter| {
            let counts: Vec<usize> = lines
                .iter()
                .map(|line| count_unquoted(line, delimiter))
                .collect();
            let header = counts[0];
            if header == 0 {
                return None;
            }
            let agreeing = counts.iter().filter(|&&c| c == header).count();
            Some((delimiter, agreeing, header))
        })
        .max_by_key(|&(_, agreeing, header)| (agreeing, header))
        .map(|(delimiter, _, _)| delimiter)
        .unwrap_or(b',')
}

/// False for blank lines and lines made only of delimiters and quotes.
fn has_content(line: &str) -> bool {
    line.bytes()
        .any(|b| !b.is_ascii_whitespace() && b != b'"' && !CANDIDATES.contains(&b))
}

/// Occurrences of `delimiter` outside double-quoted sections.
fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut quoted = false;
    let mut count = 0;
    for &b in line.as_bytes() {
        if b == b'"' {
            quoted = !quoted;
        } else if b == delimiter && !quoted {
            count += 1;
        }
    }
    count
}

pub fn display(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "\\t".to_string(),
        other => char::from(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_semicolon() {
        assert_eq!(detect("a;b;c\n1;2;3\n4;5;6\n"), b';');
    }

    #[test]
    fn detects_tab_and_pipe() {
        assert_eq!(detect("a\tb\n1\t2\n"), b'\t');
        assert_eq!(detect("a|b|c\n1|2|3\n"), b'|');
    }

    #[test]
    fn consistency_beats_raw_count() {
        // Commas appear inside the free-text column but not consistently.
        let text = "name;note\nA;x, y, z\nB;plain\nC;one, two\n";
        assert_eq!(detect(text), b';');
    }

    #[test]
    fn quoted_delimiters_are_ignored() {
        assert_eq!(detect("a;b\n\"1;2;3\";4\n"), b';');
    }

    #[test]
    fn delimiter_only_lines_are_not_sampled() {
        assert_eq!(detect(",,\nname;city\nA;Lima\n"), b';');
    }

    #[test]
    fn single_column_defaults_to_comma() {
        assert_eq!(detect("name\nA\nB\n"), b',');
        assert_eq!(detect(""), b',');
    }
}
