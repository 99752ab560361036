//! Active-Effect Context
//!
//! The runtime keeps a stack of effects that are currently executing. The
//! top of the stack is the tracking target: any property read while it is
//! on top registers that effect as a subscriber.
//!
//! # Implementation
//!
//! Entering a context pushes the effect onto its runtime's stack and returns
//! a guard. Dropping the guard pops the entry again. Because the pop lives in
//! `Drop`, the stack is restored even when the effect body panics, so a
//! failing effect never leaves a stale tracking target behind.
//!
//! Nested effects each push their own entry; when the inner one finishes the
//! outer effect is the tracking target again.

use super::runtime::Runtime;
use super::subscriber::EffectId;

/// Guard that pops the active-effect stack when dropped.
pub(crate) struct ActiveEffectGuard {
    runtime: Runtime,
    effect: EffectId,
}

impl ActiveEffectGuard {
    /// Make `effect` the current tracking target of `runtime`.
    ///
    /// The previous target becomes current again when the guard drops.
    pub(crate) fn enter(runtime: &Runtime, effect: EffectId) -> Self {
        runtime.push_active(effect);
        Self {
            runtime: runtime.clone(),
            effect,
        }
    }
}

impl Drop for ActiveEffectGuard {
    fn drop(&mut self) {
        let popped = self.runtime.pop_active();

        // Catch mismatched enter/exit pairs early.
        debug_assert_eq!(
            popped,
            Some(self.effect),
            "active effect mismatch: expected {:?}, got {:?}",
            self.effect,
            popped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_active_effect() {
        let runtime = Runtime::new();
        let id = EffectId::new();

        assert_eq!(runtime.stack_depth(), 0);
        assert!(runtime.active_effect().is_none());

        {
            let _ctx = ActiveEffectGuard::enter(&runtime, id);

            assert_eq!(runtime.stack_depth(), 1);
            assert_eq!(runtime.active_effect(), Some(id));
        }

        // Context should be cleaned up after drop
        assert_eq!(runtime.stack_depth(), 0);
        assert!(runtime.active_effect().is_none());
    }

    #[test]
    fn nested_contexts_restore_outer() {
        let runtime = Runtime::new();
        let id1 = EffectId::new();
        let id2 = EffectId::new();

        {
            let _ctx1 = ActiveEffectGuard::enter(&runtime, id1);
            assert_eq!(runtime.active_effect(), Some(id1));

            {
                let _ctx2 = ActiveEffectGuard::enter(&runtime, id2);
                assert_eq!(runtime.active_effect(), Some(id2));
                assert_eq!(runtime.stack_depth(), 2);
            }

            // After inner context drops, outer should be current
            assert_eq!(runtime.active_effect(), Some(id1));
        }

        assert!(runtime.active_effect().is_none());
    }

    #[test]
    fn context_is_popped_on_panic() {
        let runtime = Runtime::new();
        let id = EffectId::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ctx = ActiveEffectGuard::enter(&runtime, id);
            panic!("effect body failed");
        }));

        assert!(result.is_err());
        assert_eq!(runtime.stack_depth(), 0);
    }

    #[test]
    fn runtimes_have_independent_stacks() {
        let a = Runtime::new();
        let b = Runtime::new();
        let id = EffectId::new();

        let _ctx = ActiveEffectGuard::enter(&a, id);
        assert_eq!(a.active_effect(), Some(id));
        assert!(b.active_effect().is_none());
    }
}
