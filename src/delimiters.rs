//! Splitting markup into literal text and delimited formulas.
//!
//! This is the primary entry point shared by both engines (the equivalent
//! of KaTeX's auto-render): the earliest opener wins, earlier table entries
//! win ties, the closer is searched outside of `{}` groups and escaped
//! characters, and an opener without a closer leaves the rest literal.

use crate::{error::Result, opts::Delimiter};

/// A piece of split markup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Copied through unchanged.
    Text(&'a str),
    /// A delimited formula.
    Math {
        /// Formula without its delimiters.
        tex: &'a str,
        /// Block rather than inline.
        display: bool,
    },
}

/// Split `text` according to the ordered delimiter `table`.
pub fn split<'a>(text: &'a str, table: &[Delimiter]) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut pos = 0;

    while pos < text.len() {
        let rest = &text[pos..];
        // `\$` is a literal dollar, never an opener.
        if rest.starts_with("\\$") {
            pos += 2;
            continue;
        }
        let opened = table
            .iter()
            .find(|d| rest.starts_with(d.left.as_str()))
            .and_then(|d| {
                let body_start = pos + d.left.len();
                find_closer(text, body_start, &d.right).map(|end| (d, body_start, end))
            });
        match opened {
            Some((delimiter, body_start, end)) => {
                if literal_start < pos {
                    segments.push(Segment::Text(&text[literal_start..pos]));
                }
                let after = end + delimiter.right.len();
                segments.push(Segment::Math {
                    tex: &text[body_start..end],
                    display: delimiter.display,
                });
                pos = after;
                literal_start = after;
            }
            None => pos += rest.chars().next().map_or(1, char::len_utf8),
        }
    }
    if literal_start < text.len() {
        segments.push(Segment::Text(&text[literal_start..]));
    }
    segments
}

/// Byte offset of `right` at brace depth zero, starting at `from`.
fn find_closer(text: &str, from: usize, right: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut chars = text[from..].char_indices();
    while let Some((offset, c)) = chars.next() {
        let idx = from + offset;
        if depth == 0 && text[idx..].starts_with(right) {
            return Some(idx);
        }
        match c {
            '\\' => {
                chars.next();
            }
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

/// Render every formula through `render_formula` and stitch the result
/// back together. The first formula error aborts the whole text.
pub fn render_text<F>(text: &str, table: &[Delimiter], mut render_formula: F) -> Result<String>
where
    F: FnMut(&str, bool) -> Result<String>,
{
    let mut out = String::with_capacity(text.len());
    for segment in split(text, table) {
        match segment {
            Segment::Text(literal) => out.push_str(literal),
            Segment::Math { tex, display, .. } => out.push_str(&render_formula(tex, display)?),
        }
    }
    Ok(out)
}
