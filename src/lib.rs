//! # Signal Graph
//!
//! A single-threaded reactive value graph: leaf signals written by callers,
//! computed signals derived from them, and observers notified synchronously
//! when values change.
//!
//! ## Features
//!
//! - **Automatic tracking**: Computed signals subscribe to the signals their function reads
//! - **Glitch-free**: A computed signal is recomputed once per change, and a dirty one is evaluated live when read
//! - **Death propagation**: Disposing a signal disposes every computed signal built on it
//! - **Transactions**: Batch silent writes and flush one notification per signal
//! - **Streams**: Consume changes asynchronously through `futures::Stream`
//!
//! ## Example
//!
//! ```rust,no_run
//! use signal_graph::prelude::*;
//!
//! let a = Signal::new(1);
//! let b = Computed::new({
//!     let a = a.clone();
//!     move || a.get() + 1
//! })?;
//! let c = Computed::new({
//!     let a = a.clone();
//!     move || a.get() * 3
//! })?;
//! let d = Computed::new({
//!     let (b, c) = (b.clone(), c.clone());
//!     move || b.get() + c.get()
//! })?;
//! d.observe_value(|value| println!("d = {value}"));
//!
//! a.set(5); // prints "d = 21" once
//! # Ok::<(), SignalError>(())
//! ```

mod base;
mod computed;
mod context;
mod error;
mod list;
mod observer;
mod signal;
mod storage;
mod stream;
mod transaction;

pub use base::{AnySignal, Channel, Listener, ListenerId, SignalId};
pub use computed::{Computed, ComputedOptions, Tracking, MAX_DEPTH};
pub use context::{is_tracking, untracked};
pub use error::{Result, SignalError};
pub use list::ObservableList;
pub use observer::{Observer, ObserverId, SignalObserver};
pub use signal::{ReadOnlySignal, Signal};
pub use stream::{Change, Changes};
pub use transaction::Transaction;

// Re-export the prelude
pub mod prelude {
    pub use crate::{
        untracked, AnySignal, Computed, ComputedOptions, ObservableList, Observer, ReadOnlySignal,
        Signal, SignalError, Tracking, Transaction,
    };
}
