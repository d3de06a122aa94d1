//! Manual fallback used when an engine's primary entry point is missing:
//! a purely lexical scan for `$…$` and `$$…$$` spans that do not cross a
//! line break, each rendered on its own and substituted back in place.

use tracing::warn;

use crate::error::Result;

/// One formula found by the lexical scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManualMatch<'a> {
    /// Span including delimiters.
    pub raw: &'a str,
    /// Formula between the delimiters.
    pub tex: &'a str,
    /// `$$…$$` rather than `$…$`.
    pub display: bool,
    /// Byte offset of `raw` in the scanned text.
    pub start: usize,
}

/// Find every single-line `$$…$$` and `$…$` span, left to right.
pub fn extract(text: &str) -> Vec<ManualMatch<'_>> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('$') {
        let start = pos + offset;
        if text[start..].starts_with("$$") {
            let body = start + 2;
            match closing(text, body, "$$") {
                Some(end) => {
                    let after = end + 2;
                    found.push(ManualMatch {
                        raw: &text[start..after],
                        tex: &text[body..end],
                        display: true,
                        start,
                    });
                    pos = after;
                }
                None => pos = body,
            }
            continue;
        }
        let body = start + 1;
        match closing(text, body, "$") {
            Some(end) if end > body => {
                let after = end + 1;
                found.push(ManualMatch {
                    raw: &text[start..after],
                    tex: &text[body..end],
                    display: false,
                    start,
                });
                pos = after;
            }
            _ => pos = body,
        }
    }
    found
}

/// Offset of `marker` after `from`, provided no line break comes first.
fn closing(text: &str, from: usize, marker: &str) -> Option<usize> {
    let end = from + text[from..].find(marker)?;
    (!text[from..end].contains('\n')).then_some(end)
}

/// Replace every extracted span with its rendered form. A span whose render
/// fails is logged and left as written.
pub fn substitute<F>(text: &str, mut render_formula: F) -> String
where
    F: FnMut(&str, bool) -> Result<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for found in extract(text) {
        out.push_str(&text[cursor..found.start]);
        match render_formula(found.tex, found.display) {
            Ok(rendered) => out.push_str(&rendered),
            Err(err) => {
                warn!(formula = found.raw, error = %err, "manual render of formula failed");
                out.push_str(found.raw);
            }
        }
        cursor = found.start + found.raw.len();
    }
    out.push_str(&text[cursor..]);
    out
}
