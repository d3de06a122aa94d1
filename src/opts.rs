//! Options forwarded to the typesetting engines, and the delimiter table that
//! decides which spans of an element are treated as math.
//!
//! [`KatexOptions`] mirrors the subset of <https://katex.org/docs/options.html>
//! the renderer configures. Unset fields are not forwarded, so the library's
//! own defaults apply.
//!
//! ```
//! let opts = math_renderer::KatexOptions::builder()
//!     .throw_on_error(true)
//!     .trust(true)
//!     .add_macro(r"\RR".to_owned(), r"\mathbb{R}".to_owned())
//!     .build()
//!     .unwrap();
//! assert_eq!(opts.macros().len(), 1);
//! ```

use crate::{error::Result, js_engine::JsEngine};
use derive_builder::Builder;
use itertools::process_results;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// A pair of markers enclosing a formula.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiter {
    /// Opening marker, e.g. `$$`.
    pub left: String,
    /// Closing marker.
    pub right: String,
    /// Whether the enclosed formula is rendered as a block.
    pub display: bool,
}

impl Delimiter {
    /// Build a delimiter pair.
    pub fn new(left: &str, right: &str, display: bool) -> Self {
        Self {
            left: left.to_owned(),
            right: right.to_owned(),
            display,
        }
    }

    /// The table both engines use unless configured otherwise. Order matters:
    /// `$$` must be tried before `$`.
    pub fn defaults() -> Vec<Delimiter> {
        vec![
            Delimiter::new("$$", "$$", true),
            Delimiter::new("$", "$", false),
            Delimiter::new(r"\(", r"\)", false),
            Delimiter::new(r"\[", r"\]", true),
        ]
    }
}

/// Options passed to `katex.renderToString`.
#[non_exhaustive]
#[derive(Clone, Builder, Debug, Default, PartialEq)]
#[builder(default)]
#[builder(setter(into, strip_option))]
pub struct KatexOptions {
    /// Render in display (block) mode. Set per formula by the renderer.
    display_mode: Option<bool>,
    /// Which output format KaTeX should produce.
    output_type: Option<OutputType>,
    /// Raise an error for invalid LaTeX instead of inserting error nodes.
    /// The renderer relies on this to mark elements as failed.
    throw_on_error: Option<bool>,
    /// CSS color applied to invalid LaTeX when `throw_on_error` is `false`.
    error_color: Option<String>,
    /// Collection of custom macros.
    macros: HashMap<String, String>,
    /// Limit the number of macro expansions.
    max_expand: Option<i32>,
    /// Max size (in `em`) for user-specified sizes.
    max_size: Option<f64>,
    /// Allow commands such as `\href` and `\htmlClass`. Enabled for
    /// first-party content.
    trust: Option<bool>,
}

impl KatexOptions {
    /// Return [`KatexOptionsBuilder`].
    pub fn builder() -> KatexOptionsBuilder {
        KatexOptionsBuilder::default()
    }

    /// Set whether to render the math in display mode.
    pub fn set_display_mode(&mut self, flag: bool) {
        self.display_mode = Some(flag);
    }

    /// The macro table.
    pub fn macros(&self) -> &HashMap<String, String> {
        &self.macros
    }

    /// Whether invalid LaTeX raises an error.
    pub fn throws_on_error(&self) -> bool {
        self.throw_on_error.unwrap_or(true)
    }

    pub(crate) fn to_js_value<'a, E>(&self, engine: &'a E) -> Result<E::JsValue<'a>>
    where
        E: JsEngine,
    {
        let mut opt: Vec<(String, E::JsValue<'a>)> = Vec::new();
        if let Some(display_mode) = self.display_mode {
            opt.push((
                "displayMode".to_owned(),
                engine.create_bool_value(display_mode)?,
            ));
        }
        if let Some(output_type) = self.output_type {
            opt.push((
                "output".to_owned(),
                engine.create_string_value(output_type.to_string())?,
            ));
        }
        if let Some(throw_on_error) = self.throw_on_error {
            opt.push((
                "throwOnError".to_owned(),
                engine.create_bool_value(throw_on_error)?,
            ));
        }
        if let Some(error_color) = &self.error_color {
            opt.push((
                "errorColor".to_owned(),
                engine.create_string_value(error_color.clone())?,
            ));
        }
        if !self.macros.is_empty() {
            let macros = process_results(
                self.macros
                    .iter()
                    .map(|(k, v)| -> Result<(String, E::JsValue<'a>)> {
                        Ok((k.clone(), engine.create_string_value(v.clone())?))
                    }),
                |iter| -> Result<E::JsValue<'a>> { engine.create_object_value(iter) },
            )??;
            opt.push(("macros".to_owned(), macros));
        }
        if let Some(max_expand) = self.max_expand {
            opt.push(("maxExpand".to_owned(), engine.create_int_value(max_expand)?));
        }
        if let Some(max_size) = self.max_size {
            opt.push(("maxSize".to_owned(), engine.create_float_value(max_size)?));
        }
        if let Some(trust) = self.trust {
            opt.push(("trust".to_owned(), engine.create_bool_value(trust)?));
        }

        engine.create_object_value(opt.into_iter())
    }
}

impl KatexOptionsBuilder {
    /// Add (chain) a macro mapping into the accumulated macro table.
    /// Duplicate keys are overwritten by later calls.
    pub fn add_macro(&mut self, entry_name: String, entry_data: String) -> &mut Self {
        self.macros
            .get_or_insert_with(HashMap::new)
            .insert(entry_name, entry_data);
        self
    }
}

/// Output type from KaTeX.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputType {
    /// Outputs KaTeX in HTML only.
    Html,
    /// Outputs KaTeX in MathML only.
    Mathml,
    /// Outputs HTML for visual rendering and includes MathML for accessibility.
    HtmlAndMathml,
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputType::Html => "html",
            OutputType::Mathml => "mathml",
            OutputType::HtmlAndMathml => "htmlAndMathml",
        })
    }
}
