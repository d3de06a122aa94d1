//! Per-element render bookkeeping.
//!
//! Every element carries a [`RenderState`]. A render attempt starts with
//! [`RenderState::begin`], which hands out a [`RenderToken`] only when no
//! other attempt is in flight, and ends with [`RenderState::complete`], which
//! records the outcome and releases the element in the same step.

use serde::Serialize;

use crate::document::ElementId;

/// Outcome of the last render attempt.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MathState {
    /// Never attempted, or reset since.
    #[default]
    NotRendered,
    /// Output replaced the source.
    Rendered,
    /// The engine rejected the element; its source is still shown.
    Failed,
}

/// Proof that a render attempt owns an element. Not `Clone`: the only way to
/// release the element is to hand the token back to [`RenderState::complete`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an unreturned token leaves the element marked as processing"]
pub struct RenderToken {
    element: ElementId,
    attempt: u64,
}

impl RenderToken {
    /// Element this token was issued for.
    pub fn element(&self) -> ElementId {
        self.element
    }
}

/// Render flags of one element.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderState {
    math: MathState,
    force_rerender: bool,
    /// Attempt number currently holding the element, if any.
    processing: Option<u64>,
    attempts: u64,
}

impl RenderState {
    /// Outcome of the last completed attempt.
    pub fn math(&self) -> MathState {
        self.math
    }

    /// A re-render was requested and has not happened yet.
    pub fn force_rerender(&self) -> bool {
        self.force_rerender
    }

    /// An attempt currently holds the element.
    pub fn is_processing(&self) -> bool {
        self.processing.is_some()
    }

    /// Number of attempts started on this element.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Ask the next pass to render this element again even if it succeeded.
    pub fn request_rerender(&mut self) {
        self.force_rerender = true;
    }

    /// Whether a pass should attempt this element.
    pub fn needs_render(&self, force_all: bool) -> bool {
        force_all || self.force_rerender || self.math != MathState::Rendered
    }

    /// Start an attempt. Returns `None` while another attempt holds the
    /// element.
    pub fn begin(&mut self, element: ElementId) -> Option<RenderToken> {
        if self.processing.is_some() {
            return None;
        }
        self.attempts += 1;
        self.processing = Some(self.attempts);
        Some(RenderToken {
            element,
            attempt: self.attempts,
        })
    }

    /// Record the outcome of the attempt owning `token` and release the
    /// element. A stale token (from before a [`reset`](Self::reset)) is
    /// ignored and reported as `false`.
    pub fn complete(&mut self, token: RenderToken, outcome: MathState) -> bool {
        if self.processing != Some(token.attempt) {
            return false;
        }
        self.math = outcome;
        self.force_rerender = false;
        self.processing = None;
        true
    }

    /// Forget everything, as on a fresh page load.
    pub fn reset(&mut self) {
        self.math = MathState::NotRendered;
        self.force_rerender = false;
        self.processing = None;
    }
}
