//! Abstraction over the embedded JavaScript runtimes that host the
//! third-party typesetting libraries.
//!
//! Library scripts fetched by the [loader](crate::loader) are evaluated into a
//! [`JsEngine`] owned by the active [typesetter](crate::engine::Typesetter).
//! Only the handful of operations the typesetters need are exposed: script
//! evaluation, calling a global function by dotted path, building argument
//! values, and probing whether a global has been defined.
//!
//! Backends are selected by Cargo features:
//! * `quick-js` (default)
//! * `duktape`

use crate::error::{Error, Result};
use cfg_if::cfg_if;

/// Minimal interface a JS backend must implement.
pub(crate) trait JsEngine: Sized {
    /// The type of the JS value.
    type JsValue<'a>
    where
        Self: 'a;

    /// Construct a new, empty engine instance.
    fn new() -> Result<Self>;

    /// Evaluate a script. `origin` names the script in error messages.
    fn eval<'a>(&'a self, code: &str, origin: &str) -> Result<Self::JsValue<'a>>;

    /// Call a function reachable from the global object through a dotted
    /// `path` (`"katex.renderToString"`). Arguments must already be JS values
    /// created by this engine.
    fn call_function<'a>(
        &'a self,
        path: &str,
        args: impl Iterator<Item = Self::JsValue<'a>>,
    ) -> Result<Self::JsValue<'a>>;

    /// Create a new JS boolean value.
    fn create_bool_value(&self, input: bool) -> Result<Self::JsValue<'_>>;

    /// Create a new JS integer value.
    fn create_int_value(&self, input: i32) -> Result<Self::JsValue<'_>>;

    /// Create a new JS floating point value.
    fn create_float_value(&self, input: f64) -> Result<Self::JsValue<'_>>;

    /// Create a new JS string value.
    fn create_string_value(&self, input: String) -> Result<Self::JsValue<'_>>;

    /// Create a plain JS object populated from `(key, value)` pairs.
    fn create_object_value<'a>(
        &'a self,
        input: impl Iterator<Item = (String, Self::JsValue<'a>)>,
    ) -> Result<Self::JsValue<'a>>;

    /// Run queued promise jobs until the queue is empty; returns how many
    /// ran. Libraries that finish their start-up asynchronously only define
    /// their entry points once this has been called.
    fn run_pending_jobs(&self) -> Result<usize>;

    /// Convert a JS value to a UTF‑8 Rust `String`.
    fn value_to_string(&self, value: Self::JsValue<'_>) -> Result<String>;

    /// Return the `typeof` of a dotted global path, `"undefined"` when any
    /// segment is missing.
    fn type_of(&self, path: &str) -> Result<String> {
        validate_path(path)?;
        let expr = format!(
            "(function () {{ try {{ return typeof ({path}); }} catch (e) {{ return 'undefined'; }} }})()"
        );
        let value = self.eval(&expr, "typeof-check")?;
        self.value_to_string(value)
    }

    /// Whether the dotted global path resolves to a function.
    fn has_function(&self, path: &str) -> bool {
        matches!(self.type_of(path).as_deref(), Ok("function"))
    }
}

/// Probe paths are spliced into source text, so only identifiers joined by
/// dots are accepted.
fn validate_path(path: &str) -> Result<()> {
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::JsValueError(format!("invalid global path `{path}`")))
    }
}

/// Split `path` into its owner segments and the final property name.
pub(crate) fn split_path(path: &str) -> Result<(Vec<&str>, &str)> {
    validate_path(path)?;
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments
        .pop()
        .ok_or_else(|| Error::JsValueError(format!("invalid global path `{path}`")))?;
    Ok((segments, last))
}

cfg_if! {
    if #[cfg(feature = "quick-js")] {
        mod quick_js;

        pub(crate) type Engine = self::quick_js::Engine;
    } else if #[cfg(feature = "duktape")] {
        cfg_if! {
            if #[cfg(any(unix, windows))] {
                mod duktape;

                pub(crate) type Engine = self::duktape::Engine;
            } else {
                compile_error!("duktape backend is not support in the current build target.");
            }
        }
    } else {
        compile_error!("Must enable one of the JS engines.");
    }
}
