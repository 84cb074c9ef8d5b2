use std::sync::LazyLock;

use regex::Regex;

use super::types::PAGE_BREAK;

/// A word broken across a line end: "judg-\nment".
static HYPHENATED_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\p{L})-\n(\p{Ll})").expect("valid regex"));

/// Map typographic variants onto their plain forms. `None` drops the char.
fn normalize_char(c: char) -> Option<char> {
    match c {
        PAGE_BREAK | '\r' => Some('\n'),
        '\t' => Some(' '),
        '\u{00A0}' | '\u{2007}' | '\u{202F}' | '\u{2009}' => Some(' '),
        '\u{2018}' | '\u{2019}' | '\u{201B}' | '\u{2032}' => Some('\''),
        '\u{201C}' | '\u{201D}' | '\u{201F}' | '\u{2033}' => Some('"'),
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2212}' => Some('-'),
        '\u{00AD}' | '\u{200B}' | '\u{FEFF}' | '\u{FFFD}' => None,
        '\n' => Some('\n'),
        c if c.is_control() => None,
        c => Some(c),
    }
}

/// Normalize extracted text before entity extraction.
/// Strips control characters, unifies quotes, dashes and spaces, rejoins
/// hyphenated line breaks, trims lines and drops blank ones.
pub fn normalize_text(raw: &str) -> String {
    let mapped: String = raw.chars().filter_map(normalize_char).collect();

    let joined = mapped
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    HYPHENATED_BREAK.replace_all(&joined, "$1$2").into_owned()
}
