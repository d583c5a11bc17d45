//! The shared shape of every entity facade.

use cdlab_core::{Context, CoreResult, Stack};
use tracing::debug;

/// A facade bound to a [`Stack`].
///
/// A bean keeps no records of its own. Each operation opens a context,
/// stages its changes, commits and returns plain values.
pub trait Bean {
    /// Stack the bean works against.
    fn stack(&self) -> &Stack;

    /// Opens the context an operation runs in. Defaults to a background
    /// context.
    fn context(&self) -> CoreResult<Context> {
        self.stack().background_context()
    }

    /// Runs `op` in a fresh context and commits what it staged. When `op`
    /// fails the context is rolled back and the store is left untouched.
    ///
    /// # Errors
    ///
    /// Whatever `op` returns, or `Conflict` when the commit no longer
    /// applies to the latest store state.
    fn perform<T, F>(&self, op: F) -> CoreResult<T>
    where
        Self: Sized,
        F: FnOnce(&mut Context) -> CoreResult<T>,
    {
        let mut ctx = self.context()?;
        match op(&mut ctx) {
            Ok(value) => {
                let seq = ctx.commit()?;
                debug!(%seq, kind = %ctx.kind(), "bean operation committed");
                Ok(value)
            }
            Err(err) => {
                ctx.rollback()?;
                Err(err)
            }
        }
    }

    /// Runs a read-only `op` in a fresh context.
    fn read<T, F>(&self, op: F) -> CoreResult<T>
    where
        Self: Sized,
        F: FnOnce(&Context) -> CoreResult<T>,
    {
        let mut ctx = self.context()?;
        let value = op(&ctx);
        ctx.rollback()?;
        value
    }
}
