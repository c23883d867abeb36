//! Effect Stack
//!
//! The effect stack records which observers are currently running so that
//! member reads can be attributed to them.
//!
//! # Implementation
//!
//! Each thread owns a stack of observer IDs. Running an observer pushes a
//! frame and the returned guard pops it on drop, so the stack stays balanced
//! even when a tracked computation panics. Nested observer runs push nested
//! frames; depending on the [`TrackingMode`] either every frame or only the
//! innermost one subscribes to a read.

use std::cell::RefCell;

use smallvec::SmallVec;

use super::ObserverId;
use crate::config::TrackingMode;

/// Frames captured for a single read. Almost always one or two deep.
pub(crate) type Frames = SmallVec<[ObserverId; 4]>;

thread_local! {
    static EFFECT_STACK: RefCell<Vec<ObserverId>> = const { RefCell::new(Vec::new()) };
}

/// Guard for a pushed frame. Pops the frame when dropped.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct EffectStack {
    observer: ObserverId,
}

impl EffectStack {
    /// Push `observer` as the innermost running computation.
    pub fn enter(observer: ObserverId) -> Self {
        EFFECT_STACK.with(|stack| stack.borrow_mut().push(observer));
        Self { observer }
    }

    /// Whether any observer is running on this thread.
    pub fn is_active() -> bool {
        EFFECT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The innermost running observer, if any.
    pub fn current() -> Option<ObserverId> {
        EFFECT_STACK.with(|stack| stack.borrow().last().copied())
    }

    pub fn depth() -> usize {
        EFFECT_STACK.with(|stack| stack.borrow().len())
    }

    /// Observers that should subscribe to a read right now.
    pub(crate) fn subscribers(mode: TrackingMode) -> Frames {
        EFFECT_STACK.with(|stack| {
            let stack = stack.borrow();
            match mode {
                TrackingMode::AllFrames => stack.iter().copied().collect(),
                TrackingMode::TopFrame => stack.last().copied().into_iter().collect(),
            }
        })
    }
}

impl Drop for EffectStack {
    fn drop(&mut self) {
        EFFECT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(
                popped,
                Some(self.observer),
                "effect stack mismatch: expected {:?}, got {:?}",
                self.observer,
                popped
            );
        });
    }
}

/// Run `f` with an empty effect stack so that nothing it reads is tracked.
///
/// The previous stack is restored afterwards, including on unwind.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(Vec<ObserverId>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let saved = std::mem::take(&mut self.0);
            EFFECT_STACK.with(|stack| {
                let mut stack = stack.borrow_mut();
                debug_assert!(stack.is_empty(), "untracked section leaked frames");
                *stack = saved;
            });
        }
    }

    let _restore = Restore(EFFECT_STACK.with(|stack| std::mem::take(&mut *stack.borrow_mut())));
    f()
}
