//! Batched writes.
//!
//! A [`Transaction`] writes values silently and flushes one notification per
//! touched signal when it commits. Observers see the value from before the
//! transaction as old and the final value as new; intermediate writes are
//! invisible. Dropping an uncommitted transaction commits it.

use crate::base::SignalId;
use crate::error::{Result, SignalError};
use crate::signal::Signal;
use std::fmt;
use std::rc::Rc;

/// A signal that can take part in a transaction.
pub(crate) trait Transactable {
    fn signal_id(&self) -> SignalId;

    /// Notify observers of the writes made since the last flush, if any changed
    /// the value.
    fn flush_notifications(&self);
}

/// A batch of silent writes, flushed as one notification per signal.
///
/// # Examples
///
/// ```rust,no_run
/// use signal_graph::prelude::*;
///
/// let width = Signal::new(1);
/// let height = Signal::new(1);
/// {
///     let mut tx = Transaction::new();
///     tx.set(&width, 4)?.set(&height, 3)?;
/// } // committed here
/// # Ok::<(), SignalError>(())
/// ```
#[derive(Default)]
pub struct Transaction {
    touched: Vec<Rc<dyn Transactable>>,
    committed: bool,
    disposed: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` into `signal` without notifying.
    ///
    /// The signal is recorded once, and only if this write changed its value.
    pub fn set<T: Clone + 'static>(&mut self, signal: &Signal<T>, value: T) -> Result<&mut Self> {
        if self.disposed {
            return Err(SignalError::TransactionDisposed);
        }
        if self.committed {
            return Err(SignalError::TransactionCommitted);
        }

        if signal.set_silently(value) && !self.touched.iter().any(|s| s.signal_id() == signal.id()) {
            self.touched.push(signal.transactable());
        }
        Ok(self)
    }

    /// Flush one notification per touched signal, in the order they were first
    /// touched. Committing twice is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        if self.disposed {
            return Err(SignalError::TransactionDisposed);
        }
        if self.committed {
            return Ok(());
        }
        self.committed = true;

        let touched = std::mem::take(&mut self.touched);
        tracing::trace!(signals = touched.len(), "committing transaction");
        for signal in &touched {
            signal.flush_notifications();
        }
        Ok(())
    }

    /// Commit if needed, then refuse any further use. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if !self.committed {
            // Not disposed yet, so commit cannot fail.
            let _ = self.commit();
        }
        self.disposed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Number of signals whose notification is waiting for commit.
    pub fn pending(&self) -> usize {
        self.touched.len()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("pending", &self.touched.len())
            .field("committed", &self.committed)
            .field("disposed", &self.disposed)
            .finish()
    }
}
