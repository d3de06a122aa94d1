//! Mutation Watcher: turns document changes that may carry new math into
//! debounced render passes.

use std::{rc::Rc, time::Duration};

use tokio::{
    sync::mpsc::UnboundedReceiver,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, trace};

use crate::{document::Mutation, renderer::Renderer};

/// Debounces qualifying mutations into render passes.
pub struct MutationWatcher {
    renderer: Rc<Renderer>,
    openers: Vec<String>,
    debounce: Duration,
}

impl MutationWatcher {
    /// Watch for the opening delimiters of the renderer's engine.
    pub fn new(renderer: Rc<Renderer>, debounce: Duration) -> Self {
        let mut openers: Vec<String> = renderer
            .typesetter()
            .delimiters()
            .iter()
            .map(|d| d.left.clone())
            .collect();
        openers.dedup();
        Self {
            renderer,
            openers,
            debounce,
        }
    }

    /// Whether `mutation` plausibly introduced unrendered math.
    pub fn qualifies(&self, mutation: &Mutation) -> bool {
        match mutation {
            Mutation::ElementAdded { content, .. } | Mutation::ContentChanged { content, .. } => {
                self.openers.iter().any(|opener| content.contains(opener.as_str()))
            }
            Mutation::HeadInserted(_) => false,
        }
    }

    /// Process mutations until the document stops publishing them. Each
    /// qualifying mutation (re)arms a single deadline; when it expires one
    /// `render_all(false)` pass runs.
    pub async fn run(self, mut mutations: UnboundedReceiver<Mutation>) {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                mutation = mutations.recv() => {
                    let Some(mutation) = mutation else { break };
                    if self.qualifies(&mutation) {
                        trace!(?mutation, "math-bearing mutation, rescheduling render pass");
                        deadline = Some(Instant::now() + self.debounce);
                    }
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    let summary = self.renderer.render_all(false).await;
                    debug!(
                        rendered = summary.rendered,
                        failed = summary.failed,
                        queued = summary.queued,
                        "debounced render pass finished"
                    );
                }
            }
        }
        debug!("document closed, mutation watcher stopped");
    }

    /// Run on the current `LocalSet`.
    pub fn spawn(self, mutations: UnboundedReceiver<Mutation>) -> JoinHandle<()> {
        tokio::task::spawn_local(self.run(mutations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::{Document, HeadNode},
        renderer::tests::{CountingTypesetter, MARKER},
    };
    use pretty_assertions::assert_eq;
    use tokio::{task::LocalSet, time::sleep};

    const DEBOUNCE: Duration = Duration::from_millis(40);

    fn watcher() -> (MutationWatcher, Rc<CountingTypesetter>) {
        let engine = Rc::new(CountingTypesetter::new(true, false));
        let renderer = Renderer::new(Document::new().shared(), engine.clone(), MARKER);
        (MutationWatcher::new(Rc::new(renderer), DEBOUNCE), engine)
    }

    #[test]
    fn classification_uses_delimiter_openers() {
        let (watcher, _) = watcher();
        let added = |content: &str| Mutation::ElementAdded {
            id: crate::document::ElementId(0),
            content: content.to_owned(),
        };
        assert!(watcher.qualifies(&added("cost $x$")));
        assert!(watcher.qualifies(&added(r"see \(a\)")));
        assert!(watcher.qualifies(&Mutation::ContentChanged {
            id: crate::document::ElementId(0),
            content: r"\[b\]".to_owned(),
        }));
        assert!(!watcher.qualifies(&added("plain text")));
        assert!(!watcher.qualifies(&Mutation::HeadInserted(HeadNode::Script(
            "$weird$.js".to_owned()
        ))));
        assert_eq!(watcher.openers, vec!["$$", "$", r"\(", r"\["]);
    }

    #[tokio::test]
    async fn burst_of_mutations_yields_one_pass() {
        LocalSet::new()
            .run_until(async {
                let (watcher, engine) = watcher();
                let document = watcher.renderer.document().clone();
                let rx = document.borrow_mut().observe();
                let task = watcher.spawn(rx);

                for i in 0..5 {
                    document
                        .borrow_mut()
                        .append_element([MARKER], format!("${i}$"));
                    sleep(DEBOUNCE / 4).await;
                }
                assert_eq!(engine.batches.get(), 0);

                sleep(DEBOUNCE * 4).await;
                assert_eq!(engine.batches.get(), 1);
                assert_eq!(engine.typeset_sources.borrow().len(), 5);

                // A later burst gets its own pass and only renders the new element.
                document.borrow_mut().append_element([MARKER], "$late$");
                sleep(DEBOUNCE * 4).await;
                assert_eq!(engine.batches.get(), 2);
                assert_eq!(
                    engine.typeset_sources.borrow().last().map(String::as_str),
                    Some("$late$")
                );
                task.abort();
            })
            .await;
    }

    #[tokio::test]
    async fn mutations_without_math_do_not_render() {
        LocalSet::new()
            .run_until(async {
                let (watcher, engine) = watcher();
                let document = watcher.renderer.document().clone();
                let rx = document.borrow_mut().observe();
                let task = watcher.spawn(rx);

                document.borrow_mut().append_element([MARKER], "no formulas here");
                document
                    .borrow_mut()
                    .insert_head(HeadNode::Stylesheet("katex.min.css".to_owned()));
                sleep(DEBOUNCE * 4).await;
                assert_eq!(engine.batches.get(), 0);
                task.abort();
            })
            .await;
    }
}
