//! Configuration layer: typed settings with layered precedence
//! (defaults → file → environment → CLI).

use std::{collections::HashMap, path::PathBuf, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::{
    engine::EngineKind,
    opts::{Delimiter, KatexOptions, OutputType},
};

const ENV_PREFIX: &str = "MATH_RENDERER";
const DEFAULT_ELEMENT_MARKER: &str = "description-content";
const DEFAULT_DEBOUNCE_MS: u64 = 150;
const DEFAULT_READINESS_CHECK_MS: u64 = 1000;
const DEFAULT_PREFERENCE_KEY: &str = "mathEngine";
const DEFAULT_LOADER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STATIC_ROOT: &str = ".";

const KATEX_CSS_CDN: &str = "https://cdn.jsdelivr.net/npm/katex@0.16.8/dist/katex.min.css";
const KATEX_CSS_LOCAL: &str = "static/css/lib/katex.min.css";
const KATEX_JS_CDN: &str = "https://cdn.jsdelivr.net/npm/katex@0.16.8/dist/katex.min.js";
const KATEX_JS_LOCAL: &str = "static/js/lib/katex.min.js";
const AUTO_RENDER_CDN: &str =
    "https://cdn.jsdelivr.net/npm/katex@0.16.8/dist/contrib/auto-render.min.js";
const AUTO_RENDER_LOCAL: &str = "static/js/lib/auto-render.min.js";
const MATHJAX_JS_CDN: &str = "https://cdn.jsdelivr.net/npm/mathjax@3/es5/tex-mml-chtml.js";
const MATHJAX_JS_LOCAL: &str = "static/js/lib/tex-mml-chtml.js";

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A source could not be read or deserialized.
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    /// A value was read but is out of range.
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid {
        /// Dotted key of the offending value.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// A primary location and the location retried when it fails.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetPair {
    /// Tried first, usually a CDN URL.
    pub primary: String,
    /// Tried once after the primary fails.
    pub fallback: String,
}

impl AssetPair {
    /// Pair `primary` with `fallback`.
    pub fn new(primary: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }
}

/// Validated settings for a session and the CLI.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Render passes and background tasks.
    pub render: RenderSettings,
    /// Where the engine preference lives.
    pub preferences: PreferenceSettings,
    /// Asset fetching.
    pub loader: LoaderSettings,
    /// Log output of the CLI.
    pub logging: LoggingSettings,
    /// KaTeX assets and options.
    pub katex: KatexSettings,
    /// MathJax assets and configuration.
    pub mathjax: MathJaxSettings,
}

/// `[render]`
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Class that marks an element as eligible for math rendering.
    pub element_marker: String,
    /// Quiet period the mutation watcher waits before a pass.
    pub debounce: Duration,
    /// Interval of the readiness re-check.
    pub readiness_check: Duration,
    /// Engine used when the store holds no valid preference.
    pub default_engine: EngineKind,
}

/// `[preferences]`
#[derive(Debug, Clone)]
pub struct PreferenceSettings {
    /// JSON file backing the preference store; in-memory when unset.
    pub path: Option<PathBuf>,
    /// Key the engine name is stored under.
    pub key: String,
}

/// `[loader]`
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Per-request timeout for remote assets.
    pub timeout: Duration,
    /// Directory that relative asset locations resolve against.
    pub static_root: PathBuf,
}

/// `[logging]`
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Base level; `RUST_LOG` directives still apply on top.
    pub level: LevelFilter,
    /// Line format.
    pub format: LogFormat,
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single lines.
    Compact,
    /// One JSON object per event.
    Json,
}

/// `[katex]`
#[derive(Debug, Clone)]
pub struct KatexSettings {
    /// `katex.min.css`; never waited on.
    pub stylesheet: AssetPair,
    /// `katex.min.js`, the core library.
    pub script: AssetPair,
    /// `auto-render.min.js`, loaded after the core.
    pub auto_render: AssetPair,
    /// Options passed with every formula.
    pub options: KatexOptions,
    /// Delimiters searched for by auto-render.
    pub delimiters: Vec<Delimiter>,
}

/// `[mathjax]`
#[derive(Debug, Clone)]
pub struct MathJaxSettings {
    /// `tex-mml-chtml.js`.
    pub script: AssetPair,
    /// Macro table; a leading backslash on names is optional.
    pub macros: HashMap<String, String>,
    /// Split into `inlineMath` and `displayMath` by their `display` flag.
    pub delimiters: Vec<Delimiter>,
    /// Let `\$` stand for a literal dollar.
    pub process_escapes: bool,
    /// Typeset `\begin{...}` environments outside delimiters.
    pub process_environments: bool,
}

impl Default for Settings {
    fn default() -> Self {
        // The raw defaults always validate.
        match Settings::from_raw(RawSettings::default()) {
            Ok(settings) => settings,
            Err(err) => unreachable!("built-in defaults are invalid: {err}"),
        }
    }
}

impl Settings {
    pub(crate) fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let render = RenderSettings {
            element_marker: non_empty(
                "render.element_marker",
                raw.render.element_marker,
                DEFAULT_ELEMENT_MARKER,
            )?,
            debounce: Duration::from_millis(raw.render.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
            readiness_check: Duration::from_millis(positive(
                "render.readiness_check_ms",
                raw.render.readiness_check_ms.unwrap_or(DEFAULT_READINESS_CHECK_MS),
            )?),
            default_engine: match raw.render.default_engine {
                Some(name) => EngineKind::from_str(&name)
                    .map_err(|err| LoadError::invalid("render.default_engine", err.to_string()))?,
                None => EngineKind::default(),
            },
        };

        let preferences = PreferenceSettings {
            path: raw.preferences.path,
            key: non_empty(
                "preferences.key",
                raw.preferences.key,
                DEFAULT_PREFERENCE_KEY,
            )?,
        };

        let loader = LoaderSettings {
            timeout: Duration::from_secs(positive(
                "loader.timeout_secs",
                raw.loader.timeout_secs.unwrap_or(DEFAULT_LOADER_TIMEOUT_SECS),
            )?),
            static_root: raw
                .loader
                .static_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_ROOT)),
        };

        let logging = LoggingSettings {
            level: match raw.logging.level {
                Some(level) => LevelFilter::from_str(&level)
                    .map_err(|err| LoadError::invalid("logging.level", err.to_string()))?,
                None => LevelFilter::INFO,
            },
            format: match raw.logging.format.as_deref() {
                None | Some("compact") => LogFormat::Compact,
                Some("json") => LogFormat::Json,
                Some(other) => {
                    return Err(LoadError::invalid(
                        "logging.format",
                        format!("expected `compact` or `json`, got `{other}`"),
                    ))
                }
            },
        };

        let katex_delimiters = delimiters("katex.delimiters", raw.katex.delimiters)?;
        let mut katex_options = KatexOptions::builder();
        katex_options
            .output_type(OutputType::Html)
            .throw_on_error(raw.katex.throw_on_error.unwrap_or(true))
            .trust(raw.katex.trust.unwrap_or(true))
            .macros(raw.katex.macros.unwrap_or_default());
        if let Some(color) = raw.katex.error_color {
            katex_options.error_color(color);
        }
        if let Some(max_expand) = raw.katex.max_expand {
            katex_options.max_expand(max_expand);
        }
        if let Some(max_size) = raw.katex.max_size {
            if !(max_size.is_finite() && max_size > 0.0) {
                return Err(LoadError::invalid(
                    "katex.max_size",
                    "must be a positive number of em",
                ));
            }
            katex_options.max_size(max_size);
        }
        let katex = KatexSettings {
            stylesheet: raw
                .katex
                .stylesheet
                .unwrap_or_else(|| AssetPair::new(KATEX_CSS_CDN, KATEX_CSS_LOCAL)),
            script: raw
                .katex
                .script
                .unwrap_or_else(|| AssetPair::new(KATEX_JS_CDN, KATEX_JS_LOCAL)),
            auto_render: raw
                .katex
                .auto_render
                .unwrap_or_else(|| AssetPair::new(AUTO_RENDER_CDN, AUTO_RENDER_LOCAL)),
            options: katex_options
                .build()
                .map_err(|err| LoadError::invalid("katex", err.to_string()))?,
            delimiters: katex_delimiters,
        };

        let mathjax = MathJaxSettings {
            script: raw
                .mathjax
                .script
                .unwrap_or_else(|| AssetPair::new(MATHJAX_JS_CDN, MATHJAX_JS_LOCAL)),
            macros: raw.mathjax.macros.unwrap_or_default(),
            delimiters: delimiters("mathjax.delimiters", raw.mathjax.delimiters)?,
            process_escapes: raw.mathjax.process_escapes.unwrap_or(true),
            process_environments: raw.mathjax.process_environments.unwrap_or(true),
        };

        Ok(Self {
            render,
            preferences,
            loader,
            logging,
            katex,
            mathjax,
        })
    }
}

fn non_empty(key: &'static str, value: Option<String>, default: &str) -> Result<String, LoadError> {
    match value {
        Some(value) if value.trim().is_empty() => Err(LoadError::invalid(key, "must not be empty")),
        Some(value) => Ok(value),
        None => Ok(default.to_owned()),
    }
}

fn positive(key: &'static str, value: u64) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn delimiters(
    key: &'static str,
    value: Option<Vec<Delimiter>>,
) -> Result<Vec<Delimiter>, LoadError> {
    let table = value.unwrap_or_else(Delimiter::defaults);
    if table.is_empty() {
        return Err(LoadError::invalid(key, "at least one delimiter is required"));
    }
    if let Some(bad) = table
        .iter()
        .find(|d| d.left.is_empty() || d.right.is_empty())
    {
        return Err(LoadError::invalid(
            key,
            format!("empty marker in {:?}/{:?}", bad.left, bad.right),
        ));
    }
    Ok(table)
}

/// Load settings: optional file, then `MATH_RENDERER__*` environment
/// variables (e.g. `MATH_RENDERER__RENDER__DEBOUNCE_MS=300`).
pub fn load(config_file: Option<&std::path::Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder();
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawSettings {
    pub(crate) render: RawRenderSettings,
    pub(crate) preferences: RawPreferenceSettings,
    pub(crate) loader: RawLoaderSettings,
    pub(crate) logging: RawLoggingSettings,
    pub(crate) katex: RawKatexSettings,
    pub(crate) mathjax: RawMathJaxSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawRenderSettings {
    pub(crate) element_marker: Option<String>,
    pub(crate) debounce_ms: Option<u64>,
    pub(crate) readiness_check_ms: Option<u64>,
    pub(crate) default_engine: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawPreferenceSettings {
    pub(crate) path: Option<PathBuf>,
    pub(crate) key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawLoaderSettings {
    pub(crate) timeout_secs: Option<u64>,
    pub(crate) static_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawLoggingSettings {
    pub(crate) level: Option<String>,
    pub(crate) format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawKatexSettings {
    pub(crate) stylesheet: Option<AssetPair>,
    pub(crate) script: Option<AssetPair>,
    pub(crate) auto_render: Option<AssetPair>,
    pub(crate) throw_on_error: Option<bool>,
    pub(crate) trust: Option<bool>,
    pub(crate) error_color: Option<String>,
    pub(crate) max_expand: Option<i32>,
    pub(crate) max_size: Option<f64>,
    pub(crate) macros: Option<HashMap<String, String>>,
    pub(crate) delimiters: Option<Vec<Delimiter>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawMathJaxSettings {
    pub(crate) script: Option<AssetPair>,
    pub(crate) macros: Option<HashMap<String, String>>,
    pub(crate) delimiters: Option<Vec<Delimiter>>,
    pub(crate) process_escapes: Option<bool>,
    pub(crate) process_environments: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_cdn_layout() {
        let settings = Settings::default();
        assert_eq!(settings.render.element_marker, "description-content");
        assert_eq!(settings.render.debounce, Duration::from_millis(150));
        assert_eq!(settings.render.default_engine, EngineKind::KaTeX);
        assert_eq!(settings.preferences.key, "mathEngine");
        assert_eq!(settings.katex.script.primary, KATEX_JS_CDN);
        assert_eq!(settings.katex.script.fallback, KATEX_JS_LOCAL);
        assert_eq!(settings.mathjax.script.fallback, MATHJAX_JS_LOCAL);
        assert!(settings.katex.options.throws_on_error());
        assert_eq!(settings.katex.delimiters, Delimiter::defaults());
    }

    #[test]
    fn empty_marker_is_rejected() {
        let mut raw = RawSettings::default();
        raw.render.element_marker = Some("  ".to_owned());
        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "render.element_marker",
                ..
            }
        ));
    }

    #[test]
    fn unknown_default_engine_is_rejected() {
        let mut raw = RawSettings::default();
        raw.render.default_engine = Some("Typst".to_owned());
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn zero_readiness_interval_is_rejected() {
        let mut raw = RawSettings::default();
        raw.render.readiness_check_ms = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn katex_limits_reach_the_options() {
        let mut raw = RawSettings::default();
        raw.katex.max_expand = Some(500);
        raw.katex.max_size = Some(10.0);
        let settings = Settings::from_raw(raw).unwrap();

        let expected = KatexOptions::builder()
            .output_type(OutputType::Html)
            .throw_on_error(true)
            .trust(true)
            .max_expand(500)
            .max_size(10.0)
            .build()
            .unwrap();
        assert_eq!(settings.katex.options, expected);
    }

    #[test]
    fn non_positive_max_size_is_rejected() {
        let mut raw = RawSettings::default();
        raw.katex.max_size = Some(0.0);
        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "katex.max_size", .. }));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[render]
element_marker = "answer"
debounce_ms = 40

[logging]
format = "json"

[katex.macros]
"\\half" = "\\frac{{1}}{{2}}"

[[mathjax.delimiters]]
left = "$"
right = "$"
display = false
"#
        )
        .unwrap();

        let settings = load(Some(file.path())).unwrap();
        assert_eq!(settings.render.element_marker, "answer");
        assert_eq!(settings.render.debounce, Duration::from_millis(40));
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.katex.options.macros()[r"\half"], r"\frac{1}{2}");
        assert_eq!(settings.mathjax.delimiters.len(), 1);
    }
}
