//! Scoped thread impersonation.
//!
//! Impersonation is thread-wide. While a guard is alive, every native access check on the
//! calling thread runs as the impersonated identity. Work started on another thread from
//! inside the scope does **not** inherit the identity, and nothing here suppresses or forwards it
//! for you: to run the new work as the same identity, clone the [`Identity`] into it and open a
//! fresh scope there. The guard is `!Send`, so it cannot leave the thread it was opened on.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use crate::adapter::ImpersonationHandle;
use crate::{Error, ErrorKind, Identity, Result};

thread_local! {
    static IMPERSONATING: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` when an impersonation scope is open on the calling thread.
pub fn is_impersonating() -> bool {
    IMPERSONATING.get()
}

/// Keeps the calling thread impersonating an [`Identity`].
///
/// The previous identity is restored exactly once: on drop, on an explicit
/// [`revert`](Self::revert), or while unwinding.
#[must_use = "impersonation ends as soon as the guard is dropped"]
pub struct ImpersonationGuard<'a> {
    identity: &'a Identity,
    handle: Option<ImpersonationHandle>,
    _not_send: PhantomData<*const ()>,
}

impl fmt::Debug for ImpersonationGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpersonationGuard")
            .field("identity", self.identity)
            .finish_non_exhaustive()
    }
}

impl<'a> ImpersonationGuard<'a> {
    pub(crate) fn acquire(identity: &'a Identity) -> Result<Self> {
        if is_impersonating() {
            return Err(Error::new(
                ErrorKind::ImpersonationActive,
                "an impersonation scope is already open on this thread",
            ));
        }

        let token = identity.token();
        let handle = token.adapter().impersonate_thread(token.handle())?;
        IMPERSONATING.set(true);
        debug!(fqn = %identity.fqn(), "Impersonation started");

        Ok(Self {
            identity,
            handle: Some(handle),
            _not_send: PhantomData,
        })
    }

    pub fn identity(&self) -> &Identity {
        self.identity
    }

    /// Restores the previous identity now instead of at the end of the scope.
    pub fn revert(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.identity.token().adapter().revert_thread(handle);
            IMPERSONATING.set(false);
            debug!(fqn = %self.identity.fqn(), "Impersonation reverted");
        }
    }
}

impl Drop for ImpersonationGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
