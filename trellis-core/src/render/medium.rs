//! Output medium contract and render context.
//!
//! Reconcilers never look inside the structural output they manage. They
//! only synthesize content from a template, place it after a sibling, remove
//! it and ask whether it is still connected.

use std::sync::Arc;

use crate::error::{EvalError, Result, StructuralError};
use crate::reactive::{
    Cause, DestroyTrigger, ObserverId, ObserverOptions, Runtime, ScopeId, Value, WeakRuntime,
};

use super::eval::{binding, Evaluator, Frames};

/// A structural output medium: a document tree, a terminal buffer, a test
/// double.
pub trait OutputMedium: Send + Sync + 'static {
    /// What content is synthesized from.
    type Template: Send + Sync + 'static;

    /// An opaque handle to synthesized content. Content may span several
    /// underlying nodes. Anchors are handles too.
    type Handle: Clone + PartialEq + Send + Sync + 'static;

    /// Build detached content from a template. Observers created while
    /// building must go through `cx` so they are owned by the content.
    fn synthesize(&self, template: &Self::Template, cx: &RenderCx) -> Result<Self::Handle>;

    /// Place `content` right after the last node of `anchor`. Content that is
    /// already placed is moved.
    fn insert_after(
        &self,
        anchor: &Self::Handle,
        content: &Self::Handle,
    ) -> std::result::Result<(), StructuralError>;

    /// Take `content` out of the output for good. Reconcilers never reinsert
    /// removed content, so a medium may release it.
    fn remove(&self, content: &Self::Handle) -> std::result::Result<(), StructuralError>;

    fn is_connected(&self, content: &Self::Handle) -> bool;
}

/// Everything a template needs to create owned bindings: the runtime, the
/// owning scope, the destroy trigger of the content being built and the scope
/// frames expressions resolve against.
#[derive(Clone)]
pub struct RenderCx {
    runtime: Runtime,
    owner: Option<ScopeId>,
    trigger: DestroyTrigger,
    frames: Frames,
}

/// A [`RenderCx`] that does not keep the runtime alive. Stored by reconcilers
/// inside observers.
#[derive(Clone)]
pub struct WeakRenderCx {
    runtime: WeakRuntime,
    owner: Option<ScopeId>,
    trigger: DestroyTrigger,
    frames: Frames,
}

impl WeakRenderCx {
    pub fn upgrade(&self) -> Option<RenderCx> {
        Some(RenderCx {
            runtime: self.runtime.upgrade()?,
            owner: self.owner,
            trigger: self.trigger.clone(),
            frames: self.frames.clone(),
        })
    }
}

impl RenderCx {
    /// A root context resolving names against `root`.
    pub fn new(runtime: &Runtime, root: Value) -> Self {
        Self {
            runtime: runtime.clone(),
            owner: None,
            trigger: DestroyTrigger::new(),
            frames: Frames::new().push(root),
        }
    }

    pub fn owned_by(mut self, scope: ScopeId) -> Self {
        self.owner = Some(scope);
        self
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn owner(&self) -> Option<ScopeId> {
        self.owner
    }

    pub fn trigger(&self) -> &DestroyTrigger {
        &self.trigger
    }

    pub fn frames(&self) -> &Frames {
        &self.frames
    }

    /// Context for nested content torn down by `trigger`.
    pub fn child(&self, trigger: DestroyTrigger, frames: Frames) -> Self {
        Self {
            runtime: self.runtime.clone(),
            owner: self.owner,
            trigger,
            frames,
        }
    }

    pub fn downgrade(&self) -> WeakRenderCx {
        WeakRenderCx {
            runtime: self.runtime.downgrade(),
            owner: self.owner,
            trigger: self.trigger.clone(),
            frames: self.frames.clone(),
        }
    }

    pub(crate) fn options(&self, label: Option<String>) -> ObserverOptions {
        let mut options = ObserverOptions::new().destroyed_with(self.trigger.clone());
        options.owner = self.owner;
        options.label = label.map(Arc::from);
        options
    }

    /// Create an observer owned by this context.
    pub fn observe<T, A>(&self, label: Option<&str>, track: T, apply: A) -> Result<ObserverId>
    where
        T: FnMut() -> std::result::Result<Value, EvalError> + Send + 'static,
        A: FnMut(&Value, bool, &Cause) -> Result<()> + Send + 'static,
    {
        self.runtime
            .create_observer(self.options(label.map(str::to_owned)), track, apply)
    }

    /// Bind an expression evaluated against this context's frames.
    pub fn bind<E, A>(&self, evaluator: &Arc<E>, expr: E::Expr, apply: A) -> Result<ObserverId>
    where
        E: Evaluator,
        A: FnMut(&Value, bool, &Cause) -> Result<()> + Send + 'static,
    {
        let label = evaluator.label(&expr);
        let track = binding(Arc::clone(evaluator), expr, self.frames.clone());
        self.runtime.create_observer(self.options(label), track, apply)
    }
}
