//! Renderer: runs render passes over the marked elements of the document
//! through the active [`Typesetter`].
//!
//! A pass selects every marked element that still needs rendering, takes a
//! [`RenderToken`] for each (elements already mid-render are skipped), hands
//! the sources to the engine and writes back outcome and output in one step
//! per element. Before the engine is ready, elements wait in the
//! [`RenderQueue`] until [`Renderer::notify_ready`] drains it.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    ops::AddAssign,
    rc::Rc,
};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::{
    document::{ElementId, SharedDocument},
    engine::Typesetter,
    error::Error,
    manual,
    state::{MathState, RenderToken},
};

/// Elements whose render was attempted before the engine was ready.
#[derive(Debug, Default)]
pub struct RenderQueue {
    pending: VecDeque<ElementId>,
}

impl RenderQueue {
    /// Append `id` unless it is already waiting.
    pub fn push(&mut self, id: ElementId) -> bool {
        if self.pending.contains(&id) {
            return false;
        }
        self.pending.push_back(id);
        true
    }

    /// Empty the queue, oldest first.
    pub fn take_all(&mut self) -> Vec<ElementId> {
        self.pending.drain(..).collect()
    }

    /// Number of waiting elements.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Waiting elements, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ElementId> {
        self.pending.iter()
    }
}

/// What a pass did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderSummary {
    /// Elements whose output replaced their content.
    pub rendered: usize,
    /// Elements the engine rejected; their source stays visible.
    pub failed: usize,
    /// Elements left alone because another attempt held them.
    pub skipped: usize,
    /// Elements parked until the engine is ready.
    pub queued: usize,
    /// Elements rendered through the manual fallback (also in `rendered`).
    pub manual: usize,
}

impl AddAssign for RenderSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.rendered += rhs.rendered;
        self.failed += rhs.failed;
        self.skipped += rhs.skipped;
        self.queued += rhs.queued;
        self.manual += rhs.manual;
    }
}

/// Render passes over the elements carrying one marker class.
pub struct Renderer {
    document: SharedDocument,
    typesetter: Rc<dyn Typesetter>,
    marker: String,
    queue: RefCell<RenderQueue>,
    ready_seen: Cell<bool>,
}

impl Renderer {
    /// Renderer for the elements of `document` marked with `marker`.
    pub fn new(
        document: SharedDocument,
        typesetter: Rc<dyn Typesetter>,
        marker: impl Into<String>,
    ) -> Self {
        Self {
            document,
            typesetter,
            marker: marker.into(),
            queue: RefCell::new(RenderQueue::default()),
            ready_seen: Cell::new(false),
        }
    }

    /// The engine passes go through.
    pub fn typesetter(&self) -> &Rc<dyn Typesetter> {
        &self.typesetter
    }

    /// The document being rendered.
    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    /// Elements waiting for the engine, oldest first.
    pub fn queued(&self) -> Vec<ElementId> {
        self.queue.borrow().iter().copied().collect()
    }

    /// Marked elements a pass with `force_all` would attempt.
    pub fn eligible(&self, force_all: bool) -> Vec<ElementId> {
        let doc = self.document.borrow();
        doc.select(&self.marker)
            .into_iter()
            .filter(|id| doc.state(*id).is_some_and(|s| s.needs_render(force_all)))
            .collect()
    }

    /// Flag every marked element for re-rendering; returns how many.
    pub fn request_rerender_all(&self) -> usize {
        let mut doc = self.document.borrow_mut();
        let ids = doc.select(&self.marker);
        for id in &ids {
            if let Some(state) = doc.state_mut(*id) {
                state.request_rerender();
            }
        }
        ids.len()
    }

    /// One pass over all eligible elements.
    pub async fn render_all(&self, force_all: bool) -> RenderSummary {
        let ids = self.eligible(force_all);
        self.render_elements(ids, force_all).await
    }

    /// Called whenever the engine may have become ready. The first call that
    /// observes readiness drains the queue together with a full pass; later
    /// calls do nothing.
    pub async fn notify_ready(&self) -> Option<RenderSummary> {
        if self.ready_seen.get() || !self.typesetter.is_ready() {
            return None;
        }
        self.ready_seen.set(true);

        let mut ids = if self.queue.borrow().is_empty() {
            debug!(engine = %self.typesetter.kind(), "math engine ready, nothing queued");
            Vec::new()
        } else {
            let ids = self.queue.borrow_mut().take_all();
            info!(
                engine = %self.typesetter.kind(),
                count = ids.len(),
                "math engine ready, draining render queue"
            );
            ids
        };
        for id in self.eligible(false) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Some(self.render_elements(ids, false).await)
    }

    async fn render_elements(&self, ids: Vec<ElementId>, force_all: bool) -> RenderSummary {
        let mut summary = RenderSummary::default();
        if ids.is_empty() {
            return summary;
        }

        if !self.typesetter.is_ready() {
            let mut doc = self.document.borrow_mut();
            let mut queue = self.queue.borrow_mut();
            for id in ids {
                if force_all {
                    if let Some(state) = doc.state_mut(id) {
                        state.request_rerender();
                    }
                }
                queue.push(id);
                summary.queued += 1;
            }
            debug!(
                engine = %self.typesetter.kind(),
                queued = queue.len(),
                "math engine not ready, render queued"
            );
            return summary;
        }

        let mut batch: Vec<(RenderToken, String)> = Vec::with_capacity(ids.len());
        {
            let mut doc = self.document.borrow_mut();
            for id in ids {
                let Some(element) = doc.element(id) else {
                    continue;
                };
                if !element.state().needs_render(force_all) {
                    continue;
                }
                let source = element.source().to_owned();
                match doc.begin_render(id) {
                    Some(token) => batch.push((token, source)),
                    None => {
                        trace!(element = %id, "render already in progress, skipping");
                        summary.skipped += 1;
                    }
                }
            }
        }
        if batch.is_empty() {
            return summary;
        }

        if self.typesetter.has_primary_entry() {
            self.render_primary(batch, &mut summary).await;
        } else {
            self.render_manually(batch, &mut summary);
        }
        summary
    }

    async fn render_primary(&self, batch: Vec<(RenderToken, String)>, summary: &mut RenderSummary) {
        let sources = batch.iter().map(|(_, source)| source.clone()).collect();
        let mut results = self.typesetter.typeset(sources).await.into_iter();

        let mut doc = self.document.borrow_mut();
        for (token, _) in batch {
            let id = token.element();
            let result = results
                .next()
                .unwrap_or_else(|| Err(Error::Render("engine returned no result".to_owned())));
            match result {
                Ok(output) => {
                    doc.finish_render(token, MathState::Rendered, Some(output));
                    summary.rendered += 1;
                }
                Err(err) => {
                    warn!(
                        engine = %self.typesetter.kind(),
                        element = %id,
                        error = %err,
                        "math render failed, leaving source visible"
                    );
                    doc.finish_render(token, MathState::Failed, None);
                    summary.failed += 1;
                }
            }
        }
    }

    fn render_manually(&self, batch: Vec<(RenderToken, String)>, summary: &mut RenderSummary) {
        warn!(
            engine = %self.typesetter.kind(),
            count = batch.len(),
            "primary entry point unavailable, rendering formulas manually"
        );
        for (token, source) in batch {
            let output = manual::substitute(&source, |tex, display| {
                self.typesetter.render_formula(tex, display)
            });
            self.document
                .borrow_mut()
                .finish_render(token, MathState::Rendered, Some(output));
            summary.rendered += 1;
            summary.manual += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        config::Settings,
        document::Document,
        engine::{EngineKind, EngineStatus, KatexTypesetter, MathJaxTypesetter},
        error::Result,
        loader::Asset,
        opts::Delimiter,
        testing::{script, FAKE_AUTO_RENDER, FAKE_KATEX, FAKE_MATHJAX},
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    pub(crate) const MARKER: &str = "description-content";

    /// In-process engine that counts every call.
    pub(crate) struct CountingTypesetter {
        pub(crate) ready: Cell<bool>,
        pub(crate) primary: Cell<bool>,
        pub(crate) batch: bool,
        pub(crate) typeset_sources: RefCell<Vec<String>>,
        pub(crate) batches: Cell<usize>,
        pub(crate) formula_calls: Cell<usize>,
        delimiters: Vec<Delimiter>,
    }

    impl CountingTypesetter {
        pub(crate) fn new(ready: bool, batch: bool) -> Self {
            Self {
                ready: Cell::new(ready),
                primary: Cell::new(true),
                batch,
                typeset_sources: RefCell::new(Vec::new()),
                batches: Cell::new(0),
                formula_calls: Cell::new(0),
                delimiters: Delimiter::defaults(),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.typeset_sources.borrow().len() + self.formula_calls.get()
        }
    }

    #[async_trait(?Send)]
    impl Typesetter for CountingTypesetter {
        fn kind(&self) -> EngineKind {
            EngineKind::KaTeX
        }

        fn is_ready(&self) -> bool {
            self.ready.get()
        }

        fn finish_loading(&self) {}

        fn loading_finished(&self) -> bool {
            self.ready.get()
        }

        fn has_primary_entry(&self) -> bool {
            self.primary.get()
        }

        fn delimiters(&self) -> &[Delimiter] {
            &self.delimiters
        }

        fn install(&self, _asset: &Asset) -> Result<()> {
            Ok(())
        }

        fn render_formula(&self, tex: &str, display: bool) -> Result<String> {
            self.formula_calls.set(self.formula_calls.get() + 1);
            if tex.contains(r"\bad") {
                return Err(Error::Render(tex.to_owned()));
            }
            Ok(format!("<f d={display}>{tex}</f>"))
        }

        async fn typeset(&self, sources: Vec<String>) -> Vec<Result<String>> {
            self.batches.set(self.batches.get() + 1);
            if self.batch {
                tokio::task::yield_now().await;
            }
            self.typeset_sources
                .borrow_mut()
                .extend(sources.iter().cloned());
            sources
                .iter()
                .map(|s| {
                    if s.contains(r"\bad") {
                        Err(Error::Render(s.clone()))
                    } else {
                        Ok(format!("<r>{s}</r>"))
                    }
                })
                .collect()
        }

        fn status(&self) -> EngineStatus {
            EngineStatus::inactive(EngineKind::KaTeX)
        }
    }

    fn setup(engine: CountingTypesetter, contents: &[&str]) -> (Renderer, Rc<CountingTypesetter>, Vec<ElementId>) {
        let mut doc = Document::new();
        let ids = contents
            .iter()
            .map(|c| doc.append_element([MARKER], *c))
            .collect();
        doc.append_element(["unrelated"], "$ignored$");
        let engine = Rc::new(engine);
        let renderer = Renderer::new(doc.shared(), engine.clone(), MARKER);
        (renderer, engine, ids)
    }

    fn content(renderer: &Renderer, id: ElementId) -> String {
        renderer.document().borrow().element(id).unwrap().content().to_owned()
    }

    fn math(renderer: &Renderer, id: ElementId) -> MathState {
        renderer.document().borrow().state(id).unwrap().math()
    }

    fn processing(renderer: &Renderer, id: ElementId) -> bool {
        renderer.document().borrow().state(id).unwrap().is_processing()
    }

    #[tokio::test]
    async fn pass_renders_marked_elements_only() {
        let (renderer, engine, ids) = setup(CountingTypesetter::new(true, false), &["$a$", "$b$"]);
        let summary = renderer.render_all(false).await;

        assert_eq!(summary.rendered, 2);
        assert_eq!(engine.typeset_sources.borrow().clone(), vec!["$a$", "$b$"]);
        for id in ids {
            assert_eq!(math(&renderer, id), MathState::Rendered);
            assert!(!processing(&renderer, id));
        }
    }

    #[tokio::test]
    async fn second_pass_does_not_touch_rendered_elements() {
        let (renderer, engine, _) = setup(CountingTypesetter::new(true, false), &["$a$", "$b$"]);
        renderer.render_all(false).await;
        let before = engine.calls();

        let summary = renderer.render_all(false).await;
        assert_eq!(summary, RenderSummary::default());
        assert_eq!(engine.calls(), before);
    }

    #[tokio::test]
    async fn forced_rerender_recomputes_from_source() {
        let (renderer, engine, ids) = setup(CountingTypesetter::new(true, false), &["$a$"]);
        renderer.render_all(false).await;
        assert_eq!(content(&renderer, ids[0]), "<r>$a$</r>");

        assert_eq!(renderer.request_rerender_all(), 1);
        assert!(renderer.document().borrow().state(ids[0]).unwrap().force_rerender());

        let summary = renderer.render_all(false).await;
        assert_eq!(summary.rendered, 1);
        assert_eq!(engine.typeset_sources.borrow().clone(), vec!["$a$", "$a$"]);
        assert_eq!(content(&renderer, ids[0]), "<r>$a$</r>");
        assert!(!renderer.document().borrow().state(ids[0]).unwrap().force_rerender());
    }

    #[tokio::test]
    async fn render_before_ready_queues_without_engine_calls() {
        let (renderer, engine, ids) = setup(CountingTypesetter::new(false, false), &["$a$", "$b$"]);

        let summary = renderer.render_all(false).await;
        assert_eq!(summary.queued, 2);
        assert_eq!(engine.calls(), 0);
        assert_eq!(renderer.queued(), ids);

        // Queued again by a second pass, but only held once.
        renderer.render_all(false).await;
        assert_eq!(renderer.queued(), ids);

        assert_eq!(renderer.notify_ready().await, None);
        engine.ready.set(true);
        let drained = renderer.notify_ready().await.unwrap();
        assert_eq!(drained.rendered, 2);
        assert_eq!(engine.typeset_sources.borrow().clone(), vec!["$a$", "$b$"]);
        assert!(renderer.queued().is_empty());

        // Readiness is only acted on once.
        assert_eq!(renderer.notify_ready().await, None);
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn element_mid_render_is_skipped() {
        let (renderer, engine, ids) = setup(CountingTypesetter::new(true, false), &["$a$", "$b$"]);
        let held = renderer.document().borrow_mut().begin_render(ids[0]).unwrap();

        let summary = renderer.render_all(false).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.rendered, 1);
        assert_eq!(engine.typeset_sources.borrow().clone(), vec!["$b$"]);

        renderer
            .document()
            .borrow_mut()
            .finish_render(held, MathState::Rendered, None);
        assert!(!processing(&renderer, ids[0]));
    }

    #[tokio::test]
    async fn overlapping_passes_render_each_element_once() {
        let (renderer, engine, ids) = setup(CountingTypesetter::new(true, true), &["$a$", "$b$", "$c$"]);

        let (first, second) = tokio::join!(renderer.render_all(false), renderer.render_all(false));
        assert_eq!(first.rendered + second.rendered, 3);
        assert_eq!(first.skipped + second.skipped, 3);
        assert_eq!(engine.typeset_sources.borrow().len(), 3);
        for id in ids {
            assert_eq!(math(&renderer, id), MathState::Rendered);
            assert!(!processing(&renderer, id));
        }
    }

    #[tokio::test]
    async fn engine_error_marks_failed_and_keeps_source() {
        let (renderer, _, ids) = setup(CountingTypesetter::new(true, false), &[r"$\bad$", "$ok$"]);
        let summary = renderer.render_all(false).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.rendered, 1);
        assert_eq!(math(&renderer, ids[0]), MathState::Failed);
        assert_eq!(content(&renderer, ids[0]), r"$\bad$");
        assert!(!processing(&renderer, ids[0]));

        // Failed elements stay eligible.
        assert_eq!(renderer.eligible(false), vec![ids[0]]);
    }

    #[tokio::test]
    async fn missing_primary_entry_uses_manual_fallback() {
        let engine = CountingTypesetter::new(true, false);
        engine.primary.set(false);
        let (renderer, engine, ids) = setup(engine, &[r"价格是 $x+1$ 元，总计 $$\sum_{i} x_i$$", "no math", r"$\bad$"]);

        let summary = renderer.render_all(false).await;
        assert_eq!(summary.manual, 3);
        assert_eq!(summary.rendered, 3);
        assert!(engine.typeset_sources.borrow().is_empty());
        assert_eq!(engine.formula_calls.get(), 3);

        assert_eq!(
            content(&renderer, ids[0]),
            r"价格是 <f d=false>x+1</f> 元，总计 <f d=true>\sum_{i} x_i</f>"
        );
        assert_eq!(content(&renderer, ids[1]), "no math");
        assert_eq!(content(&renderer, ids[2]), r"$\bad$");
        for id in ids {
            assert_eq!(math(&renderer, id), MathState::Rendered);
            assert!(!processing(&renderer, id));
        }
    }

    #[tokio::test]
    async fn forced_pass_before_ready_survives_the_queue() {
        let (renderer, engine, ids) = setup(CountingTypesetter::new(true, false), &["$a$"]);
        renderer.render_all(false).await;
        engine.ready.set(false);

        renderer.render_all(true).await;
        assert_eq!(renderer.queued(), ids);
        assert!(renderer.document().borrow().state(ids[0]).unwrap().force_rerender());
    }

    #[tokio::test]
    async fn mathjax_batch_failure_is_uniform() {
        let mut doc = Document::new();
        let ids: Vec<_> = ["$x$", r"$\bad$", "$y$"]
            .into_iter()
            .map(|c| doc.append_element([MARKER], c))
            .collect();
        let mathjax = MathJaxTypesetter::new(&Settings::default().mathjax).unwrap();
        mathjax
            .install(&script("tex-mml-chtml.js", FAKE_MATHJAX))
            .unwrap();
        let renderer = Renderer::new(doc.shared(), Rc::new(mathjax), MARKER);

        let summary = renderer.render_all(false).await;
        assert_eq!(summary.failed, 3);
        for id in &ids {
            assert_eq!(math(&renderer, *id), MathState::Failed);
        }
        assert_eq!(content(&renderer, ids[0]), "$x$");
    }

    #[tokio::test]
    async fn pass_while_extension_loads_waits_for_it() {
        let mut doc = Document::new();
        let id = doc.append_element([MARKER], r"inline \(x\) here");
        let katex = Rc::new(KatexTypesetter::new(&Settings::default().katex).unwrap());
        katex.install(&script("katex.min.js", FAKE_KATEX)).unwrap();
        let renderer = Renderer::new(doc.shared(), katex.clone(), MARKER);

        let summary = renderer.render_all(false).await;
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.manual, 0);
        assert_eq!(math(&renderer, id), MathState::NotRendered);
        assert_eq!(renderer.notify_ready().await, None);

        katex
            .install(&script("auto-render.min.js", FAKE_AUTO_RENDER))
            .unwrap();
        let drained = renderer.notify_ready().await.unwrap();
        assert_eq!(drained.rendered, 1);
        assert_eq!(drained.manual, 0);
        assert_eq!(
            content(&renderer, id),
            r#"inline <span class="katex inline">x</span> here"#
        );
    }
}
