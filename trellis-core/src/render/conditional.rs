//! Conditional reconciler.
//!
//! A two-state machine per guarded region: absent, or present with a content
//! handle. A guard observer tracks the condition; since its result is a
//! plain boolean, re-evaluating to the same value never reaches the apply
//! step, so repeated toggles that end where they started cause no structural
//! work.
//!
//! The anchor placeholder is never touched. Content is inserted right after
//! it and removed again, so the insertion point survives every rerender.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::eval::Frames;
use super::medium::{OutputMedium, RenderCx, WeakRenderCx};
use crate::error::{EvalError, Result, StructuralError};
use crate::reactive::{DestroyTrigger, ObserverId, Value};

enum Branch<H> {
    Absent,
    Present { content: H, trigger: DestroyTrigger },
}

struct ConditionalInner<M: OutputMedium> {
    medium: Arc<M>,
    anchor: M::Handle,
    template: M::Template,
    cx: WeakRenderCx,
    branch: Mutex<Branch<M::Handle>>,
}

impl<M: OutputMedium> ConditionalInner<M> {
    fn apply(&self, present: bool) -> Result<()> {
        let mut branch = self.branch.lock();
        let is_present = matches!(*branch, Branch::Present { .. });
        match (is_present, present) {
            (false, true) => {
                let cx = self.cx.upgrade().ok_or(StructuralError::Detached)?;
                let trigger = cx.trigger().child();
                let content_cx = cx.child(trigger.clone(), cx.frames().clone());
                let content = match self.synthesize_and_insert(&content_cx) {
                    Ok(content) => content,
                    Err(err) => {
                        cx.runtime().destroy_by_destroy_trigger(&trigger);
                        return Err(err);
                    }
                };
                *branch = Branch::Present { content, trigger };
                debug!("conditional content inserted");
            }
            (true, false) => {
                if let Branch::Present { content, trigger } =
                    std::mem::replace(&mut *branch, Branch::Absent)
                {
                    self.teardown(&content, &trigger)?;
                }
                debug!("conditional content removed");
            }
            _ => {}
        }
        Ok(())
    }

    fn synthesize_and_insert(&self, cx: &RenderCx) -> Result<M::Handle> {
        let content = self.medium.synthesize(&self.template, cx)?;
        self.medium.insert_after(&self.anchor, &content)?;
        Ok(content)
    }

    fn teardown(&self, content: &M::Handle, trigger: &DestroyTrigger) -> Result<()> {
        match self.cx.upgrade() {
            Some(cx) => {
                cx.runtime().destroy_by_destroy_trigger(trigger);
            }
            None => {
                trigger.fire();
            }
        }
        self.medium.remove(content)?;
        Ok(())
    }
}

/// A mounted conditional region.
pub struct Conditional<M: OutputMedium> {
    inner: Arc<ConditionalInner<M>>,
    guard: ObserverId,
}

impl<M: OutputMedium> Conditional<M> {
    /// Mount a conditional after `anchor`. `condition` is evaluated against the
    /// context's frames; content is present while it is truthy.
    pub fn mount<G>(
        cx: &RenderCx,
        medium: Arc<M>,
        anchor: M::Handle,
        template: M::Template,
        mut condition: G,
    ) -> Result<Self>
    where
        G: FnMut(&Frames) -> std::result::Result<Value, EvalError> + Send + 'static,
    {
        let inner = Arc::new(ConditionalInner {
            medium,
            anchor,
            template,
            cx: cx.downgrade(),
            branch: Mutex::new(Branch::Absent),
        });

        let frames = cx.frames().clone();
        let target = Arc::clone(&inner);
        let guard = cx.observe(
            Some("conditional guard"),
            move || condition(&frames).map(|value| Value::Bool(value.is_truthy())),
            move |value, _, _| target.apply(value.is_truthy()),
        )?;

        Ok(Self { inner, guard })
    }

    pub fn is_present(&self) -> bool {
        matches!(*self.inner.branch.lock(), Branch::Present { .. })
    }

    /// The current content handle, if present.
    pub fn content(&self) -> Option<M::Handle> {
        match &*self.inner.branch.lock() {
            Branch::Present { content, .. } => Some(content.clone()),
            Branch::Absent => None,
        }
    }

    pub fn guard(&self) -> ObserverId {
        self.guard
    }

    /// Stop tracking the guard and tear down any present content.
    pub fn unmount(self) -> Result<()> {
        if let Some(cx) = self.inner.cx.upgrade() {
            cx.runtime().destroy_observer(self.guard);
        }
        let previous = std::mem::replace(&mut *self.inner.branch.lock(), Branch::Absent);
        if let Branch::Present { content, trigger } = previous {
            self.inner.teardown(&content, &trigger)?;
        }
        Ok(())
    }
}
