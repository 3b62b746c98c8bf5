//! Explicit unit-of-work context stack.
//!
//! Each execution context that opens units of work owns one
//! [`UnitOfWorkContext`]. Opening or resuming a unit of work pushes its
//! ID; pausing or closing pops it. The top of the stack is the current
//! unit of work.

use crate::types::UnitOfWorkId;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Stack of active unit-of-work IDs.
///
/// Cloning shares the stack.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWorkContext {
    stack: Arc<Mutex<Vec<UnitOfWorkId>>>,
}

impl UnitOfWorkContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The innermost active unit of work.
    #[must_use]
    pub fn current(&self) -> Option<UnitOfWorkId> {
        self.stack.lock().last().cloned()
    }

    /// Returns true if the unit of work is on the stack.
    #[must_use]
    pub fn is_active(&self, id: &UnitOfWorkId) -> bool {
        self.stack.lock().contains(id)
    }

    /// Number of active units of work.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    pub(crate) fn push(&self, id: UnitOfWorkId) {
        self.stack.lock().push(id);
    }

    pub(crate) fn pop(&self, id: &UnitOfWorkId) {
        let mut stack = self.stack.lock();
        match stack.iter().rposition(|entry| entry == id) {
            Some(pos) if pos + 1 == stack.len() => {
                stack.pop();
            }
            Some(pos) => {
                warn!(%id, depth = stack.len(), "unit of work popped out of order");
                stack.remove(pos);
            }
            None => warn!(%id, "unit of work is not on the context stack"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_track_current() {
        let ctx = UnitOfWorkContext::new();
        let (a, b) = (UnitOfWorkId::generate(), UnitOfWorkId::generate());
        assert!(ctx.current().is_none());
        ctx.push(a.clone());
        ctx.push(b.clone());
        assert_eq!(ctx.current(), Some(b.clone()));
        ctx.pop(&b);
        assert_eq!(ctx.current(), Some(a.clone()));
        ctx.pop(&a);
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn out_of_order_pop_removes_entry() {
        let ctx = UnitOfWorkContext::new();
        let (a, b) = (UnitOfWorkId::generate(), UnitOfWorkId::generate());
        ctx.push(a.clone());
        ctx.push(b.clone());
        ctx.pop(&a);
        assert!(!ctx.is_active(&a));
        assert_eq!(ctx.current(), Some(b));
    }

    #[test]
    fn clones_share_the_stack() {
        let ctx = UnitOfWorkContext::new();
        let other = ctx.clone();
        ctx.push(UnitOfWorkId::generate());
        assert_eq!(other.depth(), 1);
    }
}
