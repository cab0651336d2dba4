//! Ambient, request-scoped binding of the active span.
//!
//! A [`Context`] is an immutable snapshot; deriving a child context
//! (`with_span`) copies the parent and never mutates it. The current
//! context is a thread-local slot managed through [`Context::attach`],
//! whose guard restores the previous context on drop. Callers moving
//! work across threads propagate the context by cloning it and
//! re-attaching on the destination thread.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::trace::Span;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// An execution-scoped value carrier holding the active span.
#[derive(Clone, Debug, Default)]
pub struct Context {
    span: Option<Span>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns a snapshot of the current thread's context.
    pub fn current() -> Self {
        CURRENT_CONTEXT.with(|cx| cx.borrow().clone())
    }

    /// Returns a copy of this context with `span` as the active span.
    pub fn with_span(&self, span: Span) -> Self {
        Context { span: Some(span) }
    }

    /// Shorthand for `Context::current().with_span(span)`.
    pub fn current_with_span(span: Span) -> Self {
        Context::current().with_span(span)
    }

    /// The active span of this context, if any.
    ///
    /// Returns the nearest ancestor's span; `None` when no span has
    /// been installed in the current chain of scopes.
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    /// Installs this context as the current one for the calling thread.
    ///
    /// Dropping the returned [`ContextGuard`] restores the previously
    /// current context, so scopes nest naturally:
    ///
    /// Guards must be held on the stack; they are deliberately neither
    /// `Send` nor `Sync`.
    pub fn attach(self) -> ContextGuard {
        let previous = CURRENT_CONTEXT.with(|cx| cx.replace(self));
        ContextGuard {
            previous,
            _marker: PhantomData,
        }
    }
}

/// A guard that resets the current context to its prior value on drop.
#[derive(Debug)]
pub struct ContextGuard {
    previous: Context,
    // Ensures the guard stays on the thread it was created on.
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        CURRENT_CONTEXT.with(|cx| *cx.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_by_default() {
        assert!(Context::current().span().is_none());
    }

    #[test]
    fn attach_and_restore() {
        // Spans require a pipeline; nesting semantics are covered with
        // real spans in the span module tests. Here the empty context
        // exercises the guard stack itself.
        let outer = Context::new();
        let guard = outer.attach();
        assert!(Context::current().span().is_none());
        drop(guard);
        assert!(Context::current().span().is_none());
    }
}
