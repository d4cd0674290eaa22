//! Rewrites model-generated markdown into the chat surface's native
//! emphasis syntax (Slack mrkdwn). Pure string transform, no side effects.
//!
//! Supported target syntax: `*bold*`, `_italic_`, `~strike~`, inline code,
//! blockquotes, and plain lists. Headers, double-emphasis markers, inline
//! links, and horizontal rules are rewritten or stripped.

use std::sync::OnceLock;

use regex::Regex;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*$").unwrap())
}

fn bold_star_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap())
}

fn bold_underscore_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"__([^_]+)__").unwrap())
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!?\[([^\]]*)\]\(([^)]+)\)").unwrap())
}

fn strike_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"~~([^~]+)~~").unwrap())
}

fn rule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*(?:-{3,}|\*{3,}|_{3,})[ \t]*\r?\n?").unwrap())
}

fn excess_newlines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

/// Sanitize generated text for the chat surface.
///
/// - `### Header` becomes `*Header*`
/// - `**bold**` / `__bold__` become `*bold*`
/// - `[text](url)` becomes `text (url)`
/// - `~~strike~~` becomes `~strike~`
/// - horizontal-rule lines are removed
pub fn format_for_chat(text: &str) -> String {
    // Links first, so emphasis inside link text is handled in one pass below.
    let text = link_re().replace_all(text, "$1 ($2)");
    let text = header_re().replace_all(&text, "*$1*");
    let text = bold_star_re().replace_all(&text, "*$1*");
    let text = bold_underscore_re().replace_all(&text, "*$1*");
    let text = strike_re().replace_all(&text, "~$1~");
    let text = rule_re().replace_all(&text, "");
    let text = excess_newlines_re().replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bold_rewrite() {
        assert_eq!(format_for_chat("**bold**"), "*bold*");
        assert_eq!(format_for_chat("__also bold__"), "*also bold*");
    }

    #[test]
    fn test_header_rewrite() {
        assert_eq!(format_for_chat("### Header"), "*Header*");
        assert_eq!(format_for_chat("# Top\nbody"), "*Top*\nbody");
    }

    #[test]
    fn test_link_rewrite() {
        assert_eq!(
            format_for_chat("[text](https://example.com)"),
            "text (https://example.com)"
        );
    }

    #[test]
    fn test_horizontal_rule_removed() {
        assert_eq!(format_for_chat("above\n---\nbelow"), "above\nbelow");
        assert_eq!(format_for_chat("above\n***\nbelow"), "above\nbelow");
        assert_eq!(format_for_chat("above\n____\nbelow"), "above\nbelow");
        assert_eq!(format_for_chat("above\n  -----  \nbelow"), "above\nbelow");
    }

    #[test]
    fn test_short_dash_runs_are_kept() {
        // Two dashes are not a rule, and list dashes stay untouched.
        assert_eq!(format_for_chat("a\n--\nb"), "a\n--\nb");
        assert_eq!(format_for_chat("- item one\n- item two"), "- item one\n- item two");
    }

    #[test]
    fn test_strike_rewrite() {
        assert_eq!(format_for_chat("~~gone~~"), "~gone~");
    }

    #[test]
    fn test_combined_document() {
        let input = "## Summary\n\nThe **checkout** flow needs a [manager key](https://docs.example.com/keys).\n\n---\n\nSee __Policies__ for details.";
        let expected = "*Summary*\n\nThe *checkout* flow needs a manager key (https://docs.example.com/keys).\n\nSee *Policies* for details.";
        assert_eq!(format_for_chat(input), expected);
    }

    #[test]
    fn test_no_unsupported_tokens_remain() {
        let input = "### H\n**b** [t](u)\n---\n";
        let output = format_for_chat(input);
        assert!(!output.contains("**"));
        assert!(!output.contains('#'));
        assert!(!output.contains("]("));
        assert!(!output.contains("---"));
    }

    #[test]
    fn test_plain_text_untouched() {
        let input = "Just a normal answer with _italic_ and `code`.";
        assert_eq!(format_for_chat(input), input);
    }

    #[test]
    fn test_image_treated_as_link() {
        assert_eq!(
            format_for_chat("![diagram](https://example.com/d.png)"),
            "diagram (https://example.com/d.png)"
        );
    }
}
