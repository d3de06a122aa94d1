//! MathJax: asynchronous batch typesetting.
//!
//! The configuration object is evaluated before the library script, so the
//! library picks up delimiters and macros at start-up. A batch yields to the
//! event loop once and then succeeds or fails as a whole; a failure on one
//! element is indistinguishable from a failure of the batch.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::{
    config::MathJaxSettings,
    delimiters,
    engine::{EngineKind, EngineStatus, ScriptRuntime, Typesetter},
    error::{Error, Result},
    js_engine::JsEngine,
    loader::Asset,
    opts::Delimiter,
};

/// Single-formula entry point, available once the TeX input jax is loaded.
const RENDER_FN: &str = "MathJax.tex2mml";
/// Defined once start-up completed.
const BATCH_FN: &str = "MathJax.typesetPromise";

/// MathJax evaluated in its own JS runtime, configured before the library.
pub struct MathJaxTypesetter {
    runtime: ScriptRuntime,
    delimiters: Vec<Delimiter>,
}

impl MathJaxTypesetter {
    /// Create a runtime holding only the configuration object.
    pub fn new(settings: &MathJaxSettings) -> Result<Self> {
        let runtime = ScriptRuntime::new()?;
        runtime.eval(&config_script(settings)?, "mathjax-config")?;
        Ok(Self {
            runtime,
            delimiters: settings.delimiters.clone(),
        })
    }
}

/// `var MathJax = {...};` for the given settings.
fn config_script(settings: &MathJaxSettings) -> Result<String> {
    let pairs = |display: bool| -> Vec<[&str; 2]> {
        settings
            .delimiters
            .iter()
            .filter(|d| d.display == display)
            .map(|d| [d.left.as_str(), d.right.as_str()])
            .collect()
    };
    // MathJax names macros without the leading backslash.
    let macros: Map<String, Value> = settings
        .macros
        .iter()
        .map(|(name, body)| {
            (
                name.trim_start_matches('\\').to_owned(),
                Value::String(body.clone()),
            )
        })
        .collect();
    let config = json!({
        "tex": {
            "inlineMath": pairs(false),
            "displayMath": pairs(true),
            "macros": macros,
            "processEscapes": settings.process_escapes,
            "processEnvironments": settings.process_environments,
        },
        "options": {
            "skipHtmlTags": ["script", "noscript", "style", "textarea", "pre", "code"],
            "ignoreHtmlClass": "tex2jax_ignore",
            "processHtmlClass": "tex2jax_process",
        },
    });
    Ok(format!("var MathJax = {};", serde_json::to_string(&config)?))
}

fn render_inner<E>(engine: &E, input: &str, display: bool) -> Result<String>
where
    E: JsEngine,
{
    let input = engine.create_string_value(input.to_owned())?;
    let display = engine.create_bool_value(display)?;
    let opts = engine.create_object_value(std::iter::once(("display".to_owned(), display)))?;
    let result = engine.call_function(RENDER_FN, [input, opts].into_iter())?;
    engine.value_to_string(result)
}

#[async_trait(?Send)]
impl Typesetter for MathJaxTypesetter {
    fn kind(&self) -> EngineKind {
        EngineKind::MathJax
    }

    fn is_ready(&self) -> bool {
        self.runtime.check_ready(RENDER_FN, BATCH_FN)
    }

    fn finish_loading(&self) {
        self.runtime.finish_loading();
    }

    fn loading_finished(&self) -> bool {
        self.runtime.loading_finished()
    }

    fn has_primary_entry(&self) -> bool {
        self.runtime.has_function(BATCH_FN)
    }

    fn delimiters(&self) -> &[Delimiter] {
        &self.delimiters
    }

    fn install(&self, asset: &Asset) -> Result<()> {
        self.runtime.install(asset)
    }

    fn render_formula(&self, tex: &str, display: bool) -> Result<String> {
        if !self.is_ready() {
            return Err(Error::EngineNotReady(EngineKind::MathJax.to_string()));
        }
        self.runtime
            .track(render_inner(self.runtime.engine(), tex, display))
    }

    async fn typeset(&self, sources: Vec<String>) -> Vec<Result<String>> {
        // Completion is delivered on a later turn of the event loop.
        tokio::task::yield_now().await;

        let batch: Result<Vec<String>> = sources
            .iter()
            .map(|source| {
                delimiters::render_text(source, &self.delimiters, |tex, display| {
                    self.render_formula(tex, display)
                })
            })
            .collect();
        match batch {
            Ok(outputs) => outputs.into_iter().map(Ok).collect(),
            Err(err) => {
                let err = Error::Render(format!("batch of {} rejected: {err}", sources.len()));
                sources.iter().map(|_| Err(err.clone())).collect()
            }
        }
    }

    fn status(&self) -> EngineStatus {
        self.runtime
            .status(EngineKind::MathJax, self.is_ready(), self.has_primary_entry())
    }
}
