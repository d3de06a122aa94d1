//! Error handling for the `math-renderer` crate.
//!
//! The crate exposes a single [`Error`] enum grouping the failures that can
//! occur while loading typesetting libraries, driving the embedded JavaScript
//! engine, rendering formulas and persisting the engine preference.
//!
//! None of these errors crosses the [`MathSession`](crate::MathSession)
//! boundary: the session logs them and records the outcome on the affected
//! element instead.

/// Error type for this crate.
#[non_exhaustive]
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Failure while creating / initialising the embedded JavaScript engine.
    #[error("failed to initialize js environment (detail: {0})")]
    JsInitError(String),
    /// Failure reported while evaluating a library script or executing a
    /// render call, including formula parse errors thrown by the engine.
    #[error("failed to execute js (detail: {0})")]
    JsExecError(String),
    /// Failure converting between host (Rust) values and JS values.
    #[error("failed to convert js value (detail: {0})")]
    JsValueError(String),
    /// A script or stylesheet could not be fetched from `url`.
    #[error("failed to load asset {url} (detail: {detail})")]
    AssetLoad {
        /// Location that was attempted.
        url: String,
        /// Reason reported by the transport.
        detail: String,
    },
    /// A render was attempted before the engine's runtime finished loading.
    #[error("math engine {0} is not ready")]
    EngineNotReady(String),
    /// An engine name outside of the supported set.
    #[error("unsupported math engine: {0}")]
    InvalidEngine(String),
    /// The engine rejected a formula or a whole batch.
    #[error("failed to render math (detail: {0})")]
    Render(String),
    /// Reading or writing the persisted engine preference failed.
    #[error("failed to access preference store (detail: {0})")]
    Preference(String),
    /// Settings could not be built or validated.
    #[error("invalid configuration (detail: {0})")]
    Config(String),
    /// An input file could not be read.
    #[error("failed to read {path} (detail: {detail})")]
    Io {
        /// File that was attempted.
        path: String,
        /// Reason reported by the OS.
        detail: String,
    },
    /// A report could not be serialized.
    #[error("failed to serialize output (detail: {0})")]
    Serialize(String),
}

impl Error {
    pub(crate) fn asset_load(url: impl Into<String>, detail: impl ToString) -> Self {
        Self::AssetLoad {
            url: url.into(),
            detail: detail.to_string(),
        }
    }

    /// I/O failure on `path`.
    pub fn io(path: &std::path::Path, detail: impl ToString) -> Self {
        Self::Io {
            path: path.display().to_string(),
            detail: detail.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Preference(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Preference(e.to_string())
    }
}

/// Convenient alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
