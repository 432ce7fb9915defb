//! Diamond-shaped graph with a transaction and a change stream.
//!
//! Run with `RUST_LOG=signal_graph=trace` to see propagation.

use futures::executor::block_on;
use futures::StreamExt;
use signal_graph::prelude::*;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<(), SignalError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let a = Signal::new(1);
    let b = Computed::new({
        let a = a.clone();
        move || a.get() + 1
    })?;
    let c = Computed::new({
        let a = a.clone();
        move || a.get() * 3
    })?;
    let d = Computed::new({
        let (b, c) = (b.clone(), c.clone());
        move || b.get() + c.get()
    })?;

    d.observe_change(|sender, old, new| info!(signal = %sender.id(), old, new, "d changed"));
    let changes = d.changes();

    a.set(5);

    {
        let mut tx = Transaction::new();
        tx.set(&a, 6)?.set(&a, 7)?;
        info!(d = d.get(), "inside transaction");
    }

    a.dispose();
    info!(dead = d.is_dead(), last = d.get(), "leaf disposed");

    let history: Vec<_> = block_on(changes.collect());
    for change in history {
        info!(old = change.old, new = change.new, "streamed");
    }
    Ok(())
}
