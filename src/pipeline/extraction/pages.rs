use super::types::{PageText, PAGE_BREAK};

/// Split extracted text into pages.
///
/// Explicit page-break markers win. Otherwise, when the engine reported more
/// than one page, the text is divided evenly by character count with each
/// cut moved forward to the next whitespace so words are not split.
pub fn split_pages(text: &str, page_count_hint: Option<usize>) -> Vec<PageText> {
    let raw_pages: Vec<String> = if text.contains(PAGE_BREAK) {
        text.split(PAGE_BREAK).map(str::to_string).collect()
    } else {
        match page_count_hint {
            Some(n) if n > 1 => split_evenly(text, n),
            _ => vec![text.to_string()],
        }
    };

    raw_pages
        .into_iter()
        .enumerate()
        .map(|(i, page)| PageText {
            page_number: i + 1,
            text: page.trim().to_string(),
        })
        .collect()
}

fn split_evenly(text: &str, pages: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let target = chars.len().div_ceil(pages).max(1);

    let mut out = Vec::with_capacity(pages);
    let mut start = 0;
    while start < chars.len() && out.len() + 1 < pages {
        let mut end = (start + target).min(chars.len());
        while end < chars.len() && !chars[end].is_whitespace() {
            end += 1;
        }
        out.push(chars[start..end].iter().collect());
        start = end;
    }
    out.push(chars[start.min(chars.len())..].iter().collect());

    // Snapping may swallow trailing pages; keep the reported count.
    while out.len() < pages {
        out.push(String::new());
    }
    out
}

/// Page count implied by the text when the engine did not report one.
pub fn count_pages(text: &str, page_count_hint: Option<usize>) -> usize {
    match page_count_hint {
        Some(n) if n > 0 => n,
        _ => text.matches(PAGE_BREAK).count() + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_page_break_marker() {
        let pages = split_pages("first page\x0c second page \x0cthird", Some(7));
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].text, "first page");
        assert_eq!(pages[1].text, "second page");
        assert_eq!(pages[2].page_number, 3);
    }

    #[test]
    fn single_page_without_hint() {
        let pages = split_pages("just one page of text", None);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
    }

    #[test]
    fn even_division_snaps_to_whitespace() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let pages = split_pages(text, Some(2));
        assert_eq!(pages.len(), 2);
        for page in &pages {
            for word in page.text.split_whitespace() {
                assert!(text.split_whitespace().any(|w| w == word), "split word {word}");
            }
        }
        let rejoined = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn keeps_reported_page_count_for_short_text() {
        let pages = split_pages("tiny", Some(3));
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].text, "tiny");
        assert!(pages[2].text.is_empty());
    }

    #[test]
    fn counts_pages_from_markers() {
        assert_eq!(count_pages("a\x0cb\x0cc", None), 3);
        assert_eq!(count_pages("a", Some(4)), 4);
        assert_eq!(count_pages("", None), 1);
    }
}
