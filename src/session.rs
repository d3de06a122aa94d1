//! The page context: one active engine, its assets, the renderer and the
//! background tasks that keep the document rendered.
//!
//! A [`MathSession`] must be started inside a [`LocalSet`](tokio::task::LocalSet);
//! everything it spawns runs on that set. Switching engines never swaps the
//! runtime in place. The preference is saved, the session is flagged for
//! reload and [`MathSession::reload`] builds a fresh context from scratch.

use std::{cell::Cell, rc::Rc, time::Duration};

use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, trace};

use crate::{
    config::Settings,
    document::SharedDocument,
    engine::{
        EngineKind, EngineStatus, KatexTypesetter, LibrariesStatus, MathJaxTypesetter, Typesetter,
    },
    error::Result,
    loader::{LoadAttempt, Loader},
    renderer::{RenderSummary, Renderer},
    selector::{EngineSelector, PreferenceStore},
    watcher::MutationWatcher,
};

/// Page-global handle over one rendering context.
///
/// Dropping the session stops its background tasks.
pub struct MathSession {
    settings: Settings,
    store: Rc<dyn PreferenceStore>,
    selector: EngineSelector,
    document: SharedDocument,
    renderer: Rc<Renderer>,
    ready: watch::Receiver<bool>,
    reload_requested: Cell<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MathSession {
    /// Pick the engine from the stored preference, start loading its assets
    /// and begin watching `document`.
    pub fn start(
        settings: Settings,
        store: Rc<dyn PreferenceStore>,
        document: SharedDocument,
    ) -> Result<Self> {
        let selector = EngineSelector::new(
            store.clone(),
            settings.preferences.key.clone(),
            settings.render.default_engine,
        );
        let engine = selector.active_engine();
        let typesetter = build_typesetter(engine, &settings)?;
        let renderer = Rc::new(Renderer::new(
            document.clone(),
            typesetter.clone(),
            settings.render.element_marker.clone(),
        ));
        let loader = Loader::new(document.clone(), &settings.loader)?;
        let mut tasks = Vec::new();

        if engine == EngineKind::KaTeX {
            // Styling only; rendering never waits for it.
            tasks.push(
                loader.load(LoadAttempt::stylesheet(&settings.katex.stylesheet), |asset| {
                    debug!(url = %asset.url, "math stylesheet applied");
                }),
            );
        }

        let kick = Rc::new(Notify::new());
        tasks.push(tokio::task::spawn_local(load_chain(
            loader,
            script_chain(engine, &settings),
            typesetter,
            kick.clone(),
        )));

        let (ready_tx, ready) = watch::channel(false);
        tasks.push(tokio::task::spawn_local(drive_readiness(
            renderer.clone(),
            settings.render.readiness_check,
            kick,
            ready_tx,
        )));

        let mutations = document.borrow_mut().observe();
        tasks.push(MutationWatcher::new(renderer.clone(), settings.render.debounce).spawn(mutations));

        info!(engine = %engine, "math session started");
        Ok(Self {
            settings,
            store,
            selector,
            document,
            renderer,
            ready,
            reload_requested: Cell::new(false),
            tasks,
        })
    }

    /// The document this session renders.
    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    /// Render every eligible element that is not rendered yet.
    pub async fn process_all_math_elements(&self) -> RenderSummary {
        self.renderer.render_all(false).await
    }

    /// Flag every marked element and run a pass.
    pub async fn force_rerender_math(&self) -> RenderSummary {
        let flagged = self.renderer.request_rerender_all();
        debug!(count = flagged, "forced re-render requested");
        self.renderer.render_all(false).await
    }

    /// Persist `name` as the engine for the next context. Returns `false`
    /// (and logs) when the name is not a known engine.
    ///
    /// This is the first of two steps. The running session keeps its engine
    /// and only raises [`reload_requested`](Self::reload_requested); the new
    /// engine takes over once the owner calls [`reload`](Self::reload). Use
    /// [`switch_and_reload`](Self::switch_and_reload) to do both at once.
    pub fn switch_math_engine(&self, name: &str) -> bool {
        match self.selector.set_active_engine(name) {
            Ok(engine) => {
                info!(from = %self.current_math_engine(), to = %engine, "math engine switched, reload required");
                self.reload_requested.set(true);
                true
            }
            Err(err) => {
                error!(engine = name, error = %err, "math engine switch rejected");
                false
            }
        }
    }

    /// Engine running in this context.
    pub fn current_math_engine(&self) -> EngineKind {
        self.renderer.typesetter().kind()
    }

    /// Status of every known engine; only the active one reports load state.
    pub fn math_libraries_status(&self) -> LibrariesStatus {
        let active = self.current_math_engine();
        let engines = EngineKind::ALL
            .iter()
            .map(|kind| {
                if *kind == active {
                    self.renderer.typesetter().status()
                } else {
                    EngineStatus::inactive(*kind)
                }
            })
            .collect();
        LibrariesStatus { active, engines }
    }

    /// Elements waiting for the engine.
    pub fn queued(&self) -> usize {
        self.renderer.queued().len()
    }

    /// Wait until the first drain after readiness has run; `false` when
    /// `timeout` elapses first.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.clone();
        let ready = matches!(
            tokio::time::timeout(timeout, ready.wait_for(|value| *value)).await,
            Ok(Ok(_))
        );
        ready
    }

    /// An engine switch is waiting for [`reload`](Self::reload).
    pub fn reload_requested(&self) -> bool {
        self.reload_requested.get()
    }

    /// Tear this context down and start a fresh one over the same document:
    /// background tasks stop, every element goes back to its source and the
    /// engine preference is read again.
    pub fn reload(self) -> Result<Self> {
        let settings = self.settings.clone();
        let store = self.store.clone();
        let document = self.document.clone();
        drop(self);

        document.borrow_mut().reset();
        info!("math context reloading");
        Self::start(settings, store, document)
    }

    /// Switch to `name` and reload straight away. A rejected name hands the
    /// running session back untouched; check
    /// [`current_math_engine`](Self::current_math_engine) to tell the cases
    /// apart.
    pub fn switch_and_reload(self, name: &str) -> Result<Self> {
        if self.switch_math_engine(name) {
            self.reload()
        } else {
            Ok(self)
        }
    }
}

impl Drop for MathSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn build_typesetter(engine: EngineKind, settings: &Settings) -> Result<Rc<dyn Typesetter>> {
    Ok(match engine {
        EngineKind::KaTeX => Rc::new(KatexTypesetter::new(&settings.katex)?),
        EngineKind::MathJax => Rc::new(MathJaxTypesetter::new(&settings.mathjax)?),
    })
}

/// Library scripts in load order; each one needs the previous.
fn script_chain(engine: EngineKind, settings: &Settings) -> Vec<LoadAttempt> {
    match engine {
        EngineKind::KaTeX => vec![
            LoadAttempt::script(&settings.katex.script),
            LoadAttempt::script(&settings.katex.auto_render),
        ],
        EngineKind::MathJax => vec![LoadAttempt::script(&settings.mathjax.script)],
    }
}

async fn load_chain(
    loader: Loader,
    chain: Vec<LoadAttempt>,
    typesetter: Rc<dyn Typesetter>,
    kick: Rc<Notify>,
) {
    for attempt in chain {
        let Ok(asset) = loader.load_with_fallback(&attempt).await else {
            break;
        };
        if let Err(err) = typesetter.install(&asset) {
            error!(engine = %typesetter.kind(), url = %asset.url, error = %err, "library script failed to evaluate");
            break;
        }
    }
    typesetter.finish_loading();
    kick.notify_one();
}

/// Re-check readiness on every tick and whenever the load chain settles.
async fn drive_readiness(
    renderer: Rc<Renderer>,
    period: Duration,
    kick: Rc<Notify>,
    ready_tx: watch::Sender<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reported = false;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = kick.notified() => {}
        }
        let typesetter = renderer.typesetter();
        if !typesetter.is_ready() {
            if typesetter.loading_finished() && !reported {
                error!(engine = %typesetter.kind(), "math engine unavailable after loading, elements stay queued");
                reported = true;
            }
            trace!(engine = %typesetter.kind(), "math engine not ready yet");
            continue;
        }
        if let Some(summary) = renderer.notify_ready().await {
            info!(
                engine = %typesetter.kind(),
                rendered = summary.rendered,
                failed = summary.failed,
                manual = summary.manual,
                "initial math render finished"
            );
        }
        ready_tx.send_replace(true);
        break;
    }
}
