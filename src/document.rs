//! In-process model of the page: the elements math may be rendered into,
//! the assets inserted into the head, and the mutation notifications the
//! [watcher](crate::watcher) listens to.
//!
//! Each element keeps the `source` it was created (or last externally set)
//! with and the `content` currently shown. Renders always start from the
//! source, so a forced re-render recomputes the output instead of re-reading
//! already rendered markup.

use std::{cell::RefCell, fmt, rc::Rc};

use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::state::{MathState, RenderState, RenderToken};

/// Shared handle to the page document. Only ever used from the session's
/// single thread.
pub type SharedDocument = Rc<RefCell<Document>>;

/// Opaque handle of an element.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementId(pub(crate) usize);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A block of markup that may contain formulas.
#[derive(Clone, Debug)]
pub struct Element {
    classes: Vec<String>,
    source: String,
    content: String,
    state: RenderState,
}

impl Element {
    /// Whether the element carries `class`.
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Markup as authored, before math rendering.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Markup currently shown.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Render flags.
    pub fn state(&self) -> &RenderState {
        &self.state
    }
}

/// Stylesheet or script element inserted by the loader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "href", rename_all = "lowercase")]
pub enum HeadNode {
    /// `<link rel="stylesheet">` with the location it was read from.
    Stylesheet(String),
    /// `<script>` with the location it was read from.
    Script(String),
}

/// A change observed on the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// A new element with its initial markup.
    ElementAdded {
        /// The new element.
        id: ElementId,
        /// Its markup.
        content: String,
    },
    /// Shown markup was replaced, by the renderer or from outside.
    ContentChanged {
        /// The changed element.
        id: ElementId,
        /// Markup now shown.
        content: String,
    },
    /// The loader added an asset.
    HeadInserted(HeadNode),
}

/// The page: elements in document order plus head nodes.
#[derive(Debug, Default)]
pub struct Document {
    elements: Vec<Element>,
    head: Vec<HeadNode>,
    observers: Vec<UnboundedSender<Mutation>>,
}

impl Document {
    /// An empty page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into the handle sessions share.
    pub fn shared(self) -> SharedDocument {
        Rc::new(RefCell::new(self))
    }

    /// Append an element and notify observers.
    pub fn append_element<I, S>(&mut self, classes: I, content: impl Into<String>) -> ElementId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = ElementId(self.elements.len());
        let content = content.into();
        self.elements.push(Element {
            classes: classes.into_iter().map(Into::into).collect(),
            source: content.clone(),
            content: content.clone(),
            state: RenderState::default(),
        });
        self.notify(Mutation::ElementAdded { id, content });
        id
    }

    /// Replace an element's markup from outside the renderer (e.g. after a
    /// Markdown pass). Render state is left alone: a rendered element only
    /// renders again once a re-render is requested.
    pub fn set_content(&mut self, id: ElementId, content: impl Into<String>) -> bool {
        let content = content.into();
        let Some(element) = self.elements.get_mut(id.0) else {
            return false;
        };
        element.source = content.clone();
        element.content = content.clone();
        self.notify(Mutation::ContentChanged { id, content });
        true
    }

    /// Look up an element.
    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(id.0)
    }

    /// Render flags of `id`.
    pub fn state(&self, id: ElementId) -> Option<&RenderState> {
        self.elements.get(id.0).map(|e| &e.state)
    }

    /// Mutable render flags of `id`.
    pub fn state_mut(&mut self, id: ElementId) -> Option<&mut RenderState> {
        self.elements.get_mut(id.0).map(|e| &mut e.state)
    }

    /// Elements carrying `class`, in document order.
    pub fn select(&self, class: &str) -> Vec<ElementId> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.has_class(class))
            .map(|(idx, _)| ElementId(idx))
            .collect()
    }

    /// Start a render attempt on `id`; `None` if the element is unknown or
    /// already being rendered.
    pub fn begin_render(&mut self, id: ElementId) -> Option<RenderToken> {
        self.elements.get_mut(id.0)?.state.begin(id)
    }

    /// Finish the attempt owning `token`. On success `output` replaces the
    /// shown content; the content write and the state transition happen in
    /// the same call so no pass can observe one without the other.
    pub fn finish_render(
        &mut self,
        token: RenderToken,
        outcome: MathState,
        output: Option<String>,
    ) -> bool {
        let id = token.element();
        let Some(element) = self.elements.get_mut(id.0) else {
            return false;
        };
        if !element.state.complete(token, outcome) {
            return false;
        }
        if let Some(output) = output {
            if output != element.content {
                element.content = output.clone();
                self.notify(Mutation::ContentChanged {
                    id,
                    content: output,
                });
            }
        }
        true
    }

    /// Reset every element to its source and forget render state.
    pub fn reset(&mut self) {
        for element in &mut self.elements {
            element.content = element.source.clone();
            element.state.reset();
        }
        self.head.clear();
    }

    /// Append to the head and notify observers.
    pub fn insert_head(&mut self, node: HeadNode) {
        self.head.push(node.clone());
        self.notify(Mutation::HeadInserted(node));
    }

    /// Head nodes in insertion order.
    pub fn head(&self) -> &[HeadNode] {
        &self.head
    }

    /// Subscribe to subsequent mutations.
    pub fn observe(&mut self) -> UnboundedReceiver<Mutation> {
        let (tx, rx) = unbounded_channel();
        self.observers.push(tx);
        rx
    }

    fn notify(&mut self, mutation: Mutation) {
        self.observers
            .retain(|observer| observer.send(mutation.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn select_follows_document_order() {
        let mut doc = Document::new();
        let a = doc.append_element(["description-content"], "a");
        doc.append_element(["other"], "b");
        let c = doc.append_element(["x", "description-content"], "c");
        assert_eq!(doc.select("description-content"), vec![a, c]);
        assert!(doc.select("missing").is_empty());
    }

    #[test]
    fn observers_see_additions_and_changes() {
        let mut doc = Document::new();
        let mut rx = doc.observe();
        let id = doc.append_element(["m"], "$x$");
        assert!(doc.set_content(id, "$y$"));
        doc.insert_head(HeadNode::Script("katex.js".to_owned()));

        assert_eq!(
            rx.try_recv().unwrap(),
            Mutation::ElementAdded {
                id,
                content: "$x$".to_owned()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Mutation::ContentChanged {
                id,
                content: "$y$".to_owned()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Mutation::HeadInserted(HeadNode::Script("katex.js".to_owned()))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let mut doc = Document::new();
        drop(doc.observe());
        doc.append_element(["m"], "x");
        assert!(doc.observers.is_empty());
    }

    #[test]
    fn finish_render_writes_output_and_state_together() {
        let mut doc = Document::new();
        let id = doc.append_element(["m"], "$x$");
        let token = doc.begin_render(id).unwrap();
        assert!(doc.begin_render(id).is_none());

        assert!(doc.finish_render(token, MathState::Rendered, Some("<x/>".to_owned())));
        let element = doc.element(id).unwrap();
        assert_eq!(element.content(), "<x/>");
        assert_eq!(element.source(), "$x$");
        assert_eq!(element.state().math(), MathState::Rendered);
        assert!(!element.state().is_processing());
    }

    #[test]
    fn failed_render_leaves_content_untouched() {
        let mut doc = Document::new();
        let id = doc.append_element(["m"], r"$\bad$");
        let token = doc.begin_render(id).unwrap();
        assert!(doc.finish_render(token, MathState::Failed, None));
        assert_eq!(doc.element(id).unwrap().content(), r"$\bad$");
    }

    #[test]
    fn reset_restores_sources() {
        let mut doc = Document::new();
        let id = doc.append_element(["m"], "$x$");
        let token = doc.begin_render(id).unwrap();
        doc.finish_render(token, MathState::Rendered, Some("<x/>".to_owned()));
        doc.insert_head(HeadNode::Stylesheet("katex.css".to_owned()));

        doc.reset();
        assert_eq!(doc.element(id).unwrap().content(), "$x$");
        assert_eq!(doc.state(id).unwrap().math(), MathState::NotRendered);
        assert!(doc.head().is_empty());
    }
}
