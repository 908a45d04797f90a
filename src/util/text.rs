use std::borrow::Cow;

use scraper::Html;

/// Reddit rejects link titles longer than this many characters.
pub const MAX_TITLE_CHARS: usize = 300;

/// Reduces an HTML fragment to its text content.
///
/// Alert feeds deliver titles as escaped HTML (`<b>Rust</b> &amp; friends`).
/// The fragment is parsed as HTML, markup and comments are dropped, and
/// character references are decoded, so `&amp;` becomes `&`.
///
/// Returns `Cow::Borrowed` when there is nothing to parse.
///
/// # Examples
///
/// ```
/// use alert_poster::util::strip_html;
///
/// assert_eq!(strip_html("<b>Rust</b> 1.80 released"), "Rust 1.80 released");
/// assert_eq!(strip_html("Q&amp;A"), "Q&A");
/// ```
pub fn strip_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['<', '&']) {
        return Cow::Borrowed(s);
    }

    let fragment = Html::parse_fragment(s);
    Cow::Owned(fragment.root_element().text().collect())
}

/// Produces a single-line title suitable for submission.
///
/// Strips markup, drops control characters, collapses whitespace runs into
/// one space, trims, and cuts the result to [`MAX_TITLE_CHARS`] characters.
pub fn clean_title(raw: &str) -> String {
    let stripped = strip_html(raw);
    let mut out = String::with_capacity(stripped.len());
    let mut pending_space = false;

    for c in stripped.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    match out.char_indices().nth(MAX_TITLE_CHARS) {
        Some((cut, _)) => {
            out.truncate(cut);
            out.truncate(out.trim_end().len());
            out
        }
        None => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strip_plain_text_returns_borrowed() {
        let result = strip_html("Nothing to see here");
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "Nothing to see here");
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(
            strip_html("<b>Google</b> announces <i>new</i> thing"),
            "Google announces new thing"
        );
        assert_eq!(strip_html("<a href=\"x\">link</a>"), "link");
        assert_eq!(strip_html("line<br/>break"), "linebreak");
    }

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_html("a<!-- hidden > still hidden -->b"), "ab");
    }

    #[test]
    fn test_references_are_decoded() {
        assert_eq!(strip_html("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(strip_html("it&#39;s"), "it's");
        assert_eq!(strip_html("quote&#x2019;d"), "quote\u{2019}d");
    }

    #[test]
    fn test_bare_ampersand_and_angle_kept() {
        assert_eq!(strip_html("AT&T rocks"), "AT&T rocks");
        assert_eq!(strip_html("a < b"), "a < b");
        assert_eq!(strip_html("trailing &"), "trailing &");
    }

    #[test]
    fn test_multibyte_text_survives() {
        assert_eq!(strip_html("<b>日本語</b>&amp;テスト"), "日本語&テスト");
    }

    #[test]
    fn test_clean_title_decodes_and_strips() {
        assert_eq!(
            clean_title("Why <b>Rust</b> &amp;   Go"),
            "Why Rust & Go"
        );
    }

    #[test]
    fn test_clean_title_collapses_whitespace() {
        assert_eq!(
            clean_title("  <b>Rust</b>\n\t is   great  "),
            "Rust is great"
        );
    }

    #[test]
    fn test_clean_title_drops_control_chars() {
        assert_eq!(clean_title("bell\x07 and \x1bescape"), "bell and escape");
    }

    #[test]
    fn test_clean_title_truncates_long_titles() {
        let long = "word ".repeat(100);
        let cleaned = clean_title(&long);
        assert!(cleaned.chars().count() <= MAX_TITLE_CHARS);
        assert!(!cleaned.ends_with(' '));
    }

    proptest! {
        #[test]
        fn prop_text_without_markup_is_untouched(s in "[^<&]*") {
            prop_assert_eq!(strip_html(&s), s.as_str());
        }

        #[test]
        fn prop_bold_markup_is_removed(s in "[a-zA-Z0-9 ]*") {
            let wrapped = format!("<b>{s}</b>");
            prop_assert_eq!(strip_html(&wrapped), s.as_str());
        }

        #[test]
        fn prop_clean_title_is_single_line(s in ".*") {
            let cleaned = clean_title(&s);
            prop_assert!(!cleaned.contains('\n'));
            prop_assert_eq!(cleaned.trim(), cleaned.as_str());
        }
    }
}
