//! KaTeX: synchronous, per-element typesetting.

use core::iter;

use async_trait::async_trait;

use crate::{
    config::KatexSettings,
    delimiters,
    engine::{EngineKind, EngineStatus, ScriptRuntime, Typesetter},
    error::{Error, Result},
    js_engine::JsEngine,
    loader::Asset,
    opts::{Delimiter, KatexOptions},
};

/// Single-formula entry point of the core library.
const RENDER_FN: &str = "katex.renderToString";
/// Defined by the auto-render extension.
const AUTO_RENDER_FN: &str = "renderMathInElement";

/// KaTeX evaluated in its own JS runtime.
///
/// With the auto-render extension loaded, elements are split on the
/// configured delimiters; without it the renderer falls back to the manual
/// `$`/`$$` scan once loading has finished.
pub struct KatexTypesetter {
    runtime: ScriptRuntime,
    options: KatexOptions,
    delimiters: Vec<Delimiter>,
}

impl KatexTypesetter {
    /// Create an empty runtime; nothing is loaded until [`install`](Typesetter::install).
    pub fn new(settings: &KatexSettings) -> Result<Self> {
        Ok(Self {
            runtime: ScriptRuntime::new()?,
            options: settings.options.clone(),
            delimiters: settings.delimiters.clone(),
        })
    }
}

/// Render one formula with the given [options](`KatexOptions`).
fn render_inner<E>(engine: &E, input: &str, opts: &KatexOptions) -> Result<String>
where
    E: JsEngine,
{
    let input = engine.create_string_value(input.to_owned())?;
    let opts_js = opts.to_js_value(engine)?;
    let args = iter::once(input).chain(iter::once(opts_js));
    let result = engine.call_function(RENDER_FN, args)?;
    engine.value_to_string(result)
}

#[async_trait(?Send)]
impl Typesetter for KatexTypesetter {
    fn kind(&self) -> EngineKind {
        EngineKind::KaTeX
    }

    fn is_ready(&self) -> bool {
        self.runtime.check_ready(RENDER_FN, AUTO_RENDER_FN)
    }

    fn finish_loading(&self) {
        self.runtime.finish_loading();
    }

    fn loading_finished(&self) -> bool {
        self.runtime.loading_finished()
    }

    fn has_primary_entry(&self) -> bool {
        self.runtime.has_function(AUTO_RENDER_FN)
    }

    fn delimiters(&self) -> &[Delimiter] {
        &self.delimiters
    }

    fn install(&self, asset: &Asset) -> Result<()> {
        self.runtime.install(asset)
    }

    fn render_formula(&self, tex: &str, display: bool) -> Result<String> {
        if !self.is_ready() {
            return Err(Error::EngineNotReady(EngineKind::KaTeX.to_string()));
        }
        let mut opts = self.options.clone();
        opts.set_display_mode(display);
        self.runtime
            .track(render_inner(self.runtime.engine(), tex, &opts))
    }

    async fn typeset(&self, sources: Vec<String>) -> Vec<Result<String>> {
        sources
            .iter()
            .map(|source| {
                delimiters::render_text(source, &self.delimiters, |tex, display| {
                    self.render_formula(tex, display)
                })
            })
            .collect()
    }

    fn status(&self) -> EngineStatus {
        self.runtime
            .status(EngineKind::KaTeX, self.is_ready(), self.has_primary_entry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        testing::{script, FAKE_AUTO_RENDER, FAKE_KATEX},
    };
    use pretty_assertions::assert_eq;

    fn typesetter() -> KatexTypesetter {
        KatexTypesetter::new(&Settings::default().katex).unwrap()
    }

    #[test]
    fn not_ready_before_core_library() {
        let katex = typesetter();
        assert!(!katex.is_ready());
        assert_eq!(
            katex.render_formula("x", false).unwrap_err(),
            Error::EngineNotReady("KaTeX".to_owned())
        );
    }

    #[test]
    fn renders_single_formula_with_display_mode() {
        let katex = typesetter();
        katex.install(&script("katex.min.js", FAKE_KATEX)).unwrap();
        katex.finish_loading();
        assert!(katex.is_ready());
        assert!(!katex.has_primary_entry());
        assert_eq!(
            katex.render_formula("x^2", true).unwrap(),
            r#"<span class="katex display">x^2</span>"#
        );
    }

    #[test]
    fn core_alone_waits_for_the_extension() {
        let katex = typesetter();
        katex.install(&script("katex.min.js", FAKE_KATEX)).unwrap();
        assert!(!katex.is_ready());
        assert!(!katex.loading_finished());

        katex
            .install(&script("auto-render.min.js", FAKE_AUTO_RENDER))
            .unwrap();
        assert!(katex.is_ready());
        assert!(katex.has_primary_entry());
    }

    #[test]
    fn finished_chain_without_core_is_never_ready() {
        let katex = typesetter();
        katex.finish_loading();
        assert!(katex.loading_finished());
        assert!(!katex.is_ready());
    }

    #[test]
    fn macros_are_forwarded() {
        let mut settings = Settings::default().katex;
        settings.options = KatexOptions::builder()
            .add_macro(r"\RR".to_owned(), r"\mathbb{R}".to_owned())
            .build()
            .unwrap();
        let katex = KatexTypesetter::new(&settings).unwrap();
        katex.install(&script("katex.min.js", FAKE_KATEX)).unwrap();
        katex.finish_loading();
        assert_eq!(
            katex.render_formula(r"x \in \RR", false).unwrap(),
            r#"<span class="katex inline">x \in \mathbb{R}</span>"#
        );
    }

    #[tokio::test]
    async fn typeset_is_independent_per_element() {
        let katex = typesetter();
        katex.install(&script("katex.min.js", FAKE_KATEX)).unwrap();
        katex
            .install(&script("auto-render.min.js", FAKE_AUTO_RENDER))
            .unwrap();
        assert!(katex.has_primary_entry());

        let results = katex
            .typeset(vec![
                "a $x$".to_owned(),
                r"b $\bad$".to_owned(),
                "c $$y$$".to_owned(),
            ])
            .await;
        assert_eq!(
            results[0].as_ref().unwrap(),
            r#"a <span class="katex inline">x</span>"#
        );
        assert!(matches!(results[1], Err(Error::JsExecError(_))));
        assert_eq!(
            results[2].as_ref().unwrap(),
            r#"c <span class="katex display">y</span>"#
        );

        let status = katex.status();
        assert_eq!(
            status.loaded_scripts,
            vec!["katex.min.js".to_owned(), "auto-render.min.js".to_owned()]
        );
        assert_eq!(status.formulas_rendered, 2);
        assert!(status.last_error.is_some());
    }

    #[test]
    fn broken_script_is_reported() {
        let katex = typesetter();
        let err = katex
            .install(&script("katex.min.js", "var katex = {"))
            .unwrap_err();
        assert!(matches!(err, Error::JsExecError(_)));
        assert!(!katex.is_ready());
        assert!(katex.status().loaded_scripts.is_empty());
    }
}
