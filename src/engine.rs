//! Math-typesetting engines.
//!
//! Two engines with divergent runtimes sit behind the [`Typesetter`] trait:
//! [`KatexTypesetter`] renders each element synchronously and independently,
//! [`MathJaxTypesetter`] renders a list of elements as one asynchronous batch
//! whose outcome applies to the whole batch. The [renderer](crate::renderer)
//! only ever talks to the trait.

use std::{
    cell::{Cell, RefCell},
    fmt,
    str::FromStr,
};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    js_engine::{Engine, JsEngine},
    loader::Asset,
    opts::Delimiter,
};

mod katex;
mod mathjax;

pub use self::katex::KatexTypesetter;
pub use self::mathjax::MathJaxTypesetter;

/// The supported engines. Names match the persisted preference values.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum EngineKind {
    /// Synchronous per-element rendering.
    #[default]
    #[serde(rename = "KaTeX")]
    KaTeX,
    /// Asynchronous batch rendering.
    MathJax,
}

impl EngineKind {
    /// Every engine, in status order.
    pub const ALL: [EngineKind; 2] = [EngineKind::KaTeX, EngineKind::MathJax];

    /// Persisted name.
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::KaTeX => "KaTeX",
            EngineKind::MathJax => "MathJax",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EngineKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidEngine(s.to_owned()))
    }
}

/// Diagnostic snapshot of one engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    /// Engine described.
    pub engine: EngineKind,
    /// Whether this engine is the one selected for the session.
    pub active: bool,
    /// Script locations evaluated into the runtime, in load order.
    pub loaded_scripts: Vec<String>,
    /// Renders run instead of queueing.
    pub ready: bool,
    /// The delimiter-aware or batch entry point exists.
    pub primary_entry: bool,
    /// Formulas rendered successfully so far.
    pub formulas_rendered: u64,
    /// Most recent load, start-up or render error.
    pub last_error: Option<String>,
}

impl EngineStatus {
    /// Status of an engine that was not selected and never loaded.
    pub fn inactive(engine: EngineKind) -> Self {
        Self {
            engine,
            active: false,
            loaded_scripts: Vec::new(),
            ready: false,
            primary_entry: false,
            formulas_rendered: 0,
            last_error: None,
        }
    }
}

/// Snapshot of both engines, as returned by
/// [`MathSession::math_libraries_status`](crate::MathSession::math_libraries_status).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LibrariesStatus {
    /// Engine running in the session.
    pub active: EngineKind,
    /// One entry per [`EngineKind::ALL`] member.
    pub engines: Vec<EngineStatus>,
}

/// Common contract of the typesetting engines.
#[async_trait(?Send)]
pub trait Typesetter {
    /// Which engine this is.
    fn kind(&self) -> EngineKind;

    /// Loading is complete as far as rendering is concerned: the core
    /// library is evaluated and either the primary entry point is available
    /// or the asset chain has finished without it. Renders attempted before
    /// this are queued.
    fn is_ready(&self) -> bool;

    /// Mark the asset chain as finished, successfully or not.
    fn finish_loading(&self);

    /// Whether [`finish_loading`](Typesetter::finish_loading) was called.
    fn loading_finished(&self) -> bool;

    /// The delimiter-aware (or batch) entry point is available. When it is
    /// not, the renderer falls back to the manual path.
    fn has_primary_entry(&self) -> bool;

    /// Ordered delimiter table used by the primary entry point.
    fn delimiters(&self) -> &[Delimiter];

    /// Evaluate a loaded library script into the runtime.
    fn install(&self, asset: &Asset) -> Result<()>;

    /// Render one formula to markup.
    fn render_formula(&self, tex: &str, display: bool) -> Result<String>;

    /// Run the primary entry point over element sources, one result per
    /// source in the same order.
    async fn typeset(&self, sources: Vec<String>) -> Vec<Result<String>>;

    /// Diagnostic snapshot for this engine.
    fn status(&self) -> EngineStatus;
}

/// JS runtime plus the bookkeeping both engines share.
pub(crate) struct ScriptRuntime {
    engine: Engine,
    loaded: RefCell<Vec<String>>,
    ready: Cell<bool>,
    loading_finished: Cell<bool>,
    rendered: Cell<u64>,
    last_error: RefCell<Option<String>>,
}

impl ScriptRuntime {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            engine: Engine::new()?,
            loaded: RefCell::new(Vec::new()),
            ready: Cell::new(false),
            loading_finished: Cell::new(false),
            rendered: Cell::new(0),
            last_error: RefCell::new(None),
        })
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn eval(&self, code: &str, origin: &str) -> Result<()> {
        self.engine
            .eval(code, origin)
            .map(drop)
            .inspect_err(|err| self.record_error(err))
    }

    pub(crate) fn install(&self, asset: &Asset) -> Result<()> {
        self.eval(&asset.body, &asset.url)?;
        self.loaded.borrow_mut().push(asset.url.clone());
        let jobs = self.run_jobs();
        debug!(url = %asset.url, jobs, "library script evaluated");
        Ok(())
    }

    /// Let asynchronous library start-up make progress.
    fn run_jobs(&self) -> usize {
        match self.engine.run_pending_jobs() {
            Ok(ran) => ran,
            Err(err) => {
                warn!(error = %err, "library start-up job failed");
                self.record_error(&err);
                0
            }
        }
    }

    /// Ready once `core` is a function and either `primary` is one too or
    /// loading has finished. Readiness never reverts, so a positive check is
    /// cached.
    pub(crate) fn check_ready(&self, core: &str, primary: &str) -> bool {
        if !self.ready.get() {
            self.run_jobs();
            if self.engine.has_function(core)
                && (self.loading_finished.get() || self.engine.has_function(primary))
            {
                self.ready.set(true);
            }
        }
        self.ready.get()
    }

    pub(crate) fn has_function(&self, path: &str) -> bool {
        self.run_jobs();
        self.engine.has_function(path)
    }

    pub(crate) fn finish_loading(&self) {
        self.loading_finished.set(true);
    }

    pub(crate) fn loading_finished(&self) -> bool {
        self.loading_finished.get()
    }

    pub(crate) fn track<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.rendered.set(self.rendered.get() + 1),
            Err(err) => self.record_error(err),
        }
        result
    }

    fn record_error(&self, err: &Error) {
        *self.last_error.borrow_mut() = Some(err.to_string());
    }

    pub(crate) fn status(&self, engine: EngineKind, ready: bool, primary: bool) -> EngineStatus {
        EngineStatus {
            engine,
            active: true,
            loaded_scripts: self.loaded.borrow().clone(),
            ready,
            primary_entry: primary,
            formulas_rendered: self.rendered.get(),
            last_error: self.last_error.borrow().clone(),
        }
    }
}
