//! Commit gate: a durability token advances only after the dependent
//! downstream write is confirmed.
//!
//! Both loops are instances of the same pattern. The producer stages the max
//! `updated_at` it published and confirms it against the watermark file only
//! after the broker acknowledged every record the token covers. The consumer
//! stages a batch summary and confirms it against the broker offset commit
//! only after the warehouse load succeeded.

/// A staged-then-confirmed durability token.
///
/// `stage` records the candidate token. `confirm` runs the durable commit
/// action and releases the token only if that action succeeds; on failure the
/// token stays staged so the caller can decide to retry or `abandon`.
#[derive(Debug, Default)]
pub struct CommitGate<T> {
    pending: Option<T>,
}

impl<T> CommitGate<T> {
    pub fn new() -> Self {
        CommitGate { pending: None }
    }

    /// Stage a candidate token, replacing any previously staged one.
    pub fn stage(&mut self, token: T) {
        self.pending = Some(token);
    }

    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref()
    }

    /// Drop the staged token without committing (cycle abandoned).
    pub fn abandon(&mut self) -> Option<T> {
        self.pending.take()
    }

    /// Run `commit` against the staged token. On success the token is
    /// released and returned; on failure it remains staged. With nothing
    /// staged this is a no-op.
    pub fn confirm<E>(
        &mut self,
        commit: impl FnOnce(&T) -> Result<(), E>,
    ) -> Result<Option<T>, E> {
        match &self.pending {
            None => Ok(None),
            Some(token) => {
                commit(token)?;
                Ok(self.pending.take())
            }
        }
    }
}
