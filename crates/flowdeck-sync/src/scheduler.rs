use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// Drives the poll loop. Yields `None` once no further ticks will come.
pub trait TickSource: Send {
    fn next_tick(&mut self) -> BoxFuture<'_, Option<()>>;
}

/// Wall-clock ticks at a fixed period. The first tick fires immediately.
///
/// Must be created inside a Tokio runtime.
pub struct IntervalTicks {
    interval: Interval,
}

impl IntervalTicks {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        // A slow poll delays the next one instead of bursting to catch up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

impl TickSource for IntervalTicks {
    fn next_tick(&mut self) -> BoxFuture<'_, Option<()>> {
        Box::pin(async move {
            self.interval.tick().await;
            Some(())
        })
    }
}

/// Ticks fired by hand, for tests and one-shot commands.
pub struct ManualTicks {
    rx: mpsc::UnboundedReceiver<()>,
}

/// Handle that fires [`ManualTicks`]. Dropping every trigger ends the ticks.
#[derive(Clone)]
pub struct ManualTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicks {
    pub fn new() -> (Self, ManualTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ManualTrigger { tx })
    }
}

impl ManualTrigger {
    /// Returns false if the tick source is gone.
    pub fn fire(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

impl TickSource for ManualTicks {
    fn next_tick(&mut self) -> BoxFuture<'_, Option<()>> {
        Box::pin(async move { self.rx.recv().await })
    }
}
