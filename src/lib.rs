//! Math-formula rendering for documents with a choice of two typesetting
//! engines, [KaTeX](https://katex.org) and [MathJax](https://www.mathjax.org).
//!
//! The engine libraries are loaded from a primary location with a local
//! fallback and evaluated inside an embedded JavaScript runtime. Elements
//! carrying the configured marker class are rendered once, re-rendered only on
//! request, queued while the engine is still loading and picked up again when
//! the document changes.
//!
//! This crate offers the following features:
//!
//! * `quick-js`: Enable by default. Use [rquickjs](https://crates.io/crates/rquickjs)
//!    as the JS backend.
//! * `duktape`: Use [duktape](https://crates.io/crates/ducc) as the JS backend.
//!    You need to disable the default features to enable this backend.
//!
//! # Examples
//!
//! ```no_run
//! use std::{rc::Rc, time::Duration};
//! use math_renderer::{Document, MathSession, MemoryStore, Settings};
//!
//! # async fn run() -> math_renderer::Result<()> {
//! let mut document = Document::new();
//! let id = document.append_element(["description-content"], "Energy: $E = mc^2$");
//! let document = document.shared();
//!
//! let session = MathSession::start(Settings::default(), Rc::new(MemoryStore::new()), document.clone())?;
//! if session.wait_until_ready(Duration::from_secs(10)).await {
//!     println!("{}", document.borrow().element(id).unwrap().content());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod delimiters;
pub mod document;
pub mod engine;
pub mod error;
mod js_engine;
pub mod loader;
pub mod manual;
pub mod opts;
pub mod renderer;
pub mod selector;
pub mod session;
pub mod state;
pub mod watcher;

pub use config::{LoadError, Settings};
pub use document::{Document, ElementId, SharedDocument};
pub use engine::{EngineKind, EngineStatus, LibrariesStatus, Typesetter};
pub use error::{Error, Result};
pub use opts::{Delimiter, KatexOptions, KatexOptionsBuilder, OutputType};
pub use renderer::{RenderSummary, Renderer};
pub use selector::{EngineSelector, JsonFileStore, MemoryStore, PreferenceStore};
pub use session::MathSession;
pub use state::{MathState, RenderState};

#[cfg(test)]
mod testing;
