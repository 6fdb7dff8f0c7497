//! Placeholder discovery over raw template bytes.

use super::{DelimiterKind, SubstitutionSite};
use regex::bytes::Regex;
use std::sync::LazyLock;

/// One alternative per delimiter pair; the capture is the untrimmed name.
const PATTERN: &str = concat!(
    r"\{\{ *([A-Za-z0-9_][A-Za-z0-9_ ]*)\}\}",
    r"|\[ *([A-Za-z0-9_][A-Za-z0-9_ ]*)\]",
    r"|\$ *([A-Za-z0-9_][A-Za-z0-9_ ]*)\$",
    r"|% *([A-Za-z0-9_][A-Za-z0-9_ ]*)%",
);

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(PATTERN).unwrap());

const KINDS: [DelimiterKind; 4] = [
    DelimiterKind::DoubleBrace,
    DelimiterKind::Bracket,
    DelimiterKind::Dollar,
    DelimiterKind::Percent,
];

/// Every placeholder occurrence in `body`, in byte order.
pub fn sites(body: &[u8]) -> Vec<SubstitutionSite> {
    let mut sites = Vec::new();
    for caps in PLACEHOLDER.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        let Some((kind, name)) = KINDS
            .iter()
            .enumerate()
            .find_map(|(i, kind)| caps.get(i + 1).map(|m| (*kind, m.as_bytes())))
        else {
            continue;
        };
        // The pattern only admits ASCII inside a name.
        let name = String::from_utf8_lossy(name).trim().to_string();
        sites.push(SubstitutionSite {
            offset: whole.start(),
            len: whole.len(),
            delimiter: kind,
            name,
        });
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(body: &str) -> Vec<(String, DelimiterKind)> {
        sites(body.as_bytes())
            .into_iter()
            .map(|s| (s.name, s.delimiter))
            .collect()
    }

    #[test]
    fn recognises_all_delimiter_pairs() {
        let found = names("[a] {{b}} $c$ %d%");
        assert_eq!(
            found,
            vec![
                ("a".to_string(), DelimiterKind::Bracket),
                ("b".to_string(), DelimiterKind::DoubleBrace),
                ("c".to_string(), DelimiterKind::Dollar),
                ("d".to_string(), DelimiterKind::Percent),
            ]
        );
    }

    #[test]
    fn names_are_trimmed_and_may_contain_spaces() {
        let found = names("Dear [ first name ], {{ total_due }}");
        assert_eq!(found[0].0, "first name");
        assert_eq!(found[1].0, "total_due");
    }

    #[test]
    fn offsets_cover_the_whole_site() {
        let body = b"Hi {{ name }}!";
        let site = &sites(body)[0];
        assert_eq!(&body[site.offset..site.offset + site.len], b"{{ name }}");
    }

    #[test]
    fn rejects_names_with_other_characters() {
        assert!(names("[a-b] [] {{x.y}} [é]").is_empty());
    }
}
