// src/arbitrage/scheduler.rs
//! Bounded, reorderable buffers between pipeline stages.
//!
//! Upstream producers are push based and never wait, so every stage boundary
//! sheds load here: items are kept sorted by a comparator and the lowest
//! ranked one is dropped once the high-water mark is reached.

use log::{debug, trace};
use std::cmp::Ordering;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// `Ordering::Less` means `a` ranks above `b`.
pub type Comparator<T> = fn(&T, &T) -> Ordering;

pub struct PriorityScheduler<T> {
    buffer: VecDeque<T>,
    high_water_mark: usize,
    comparator: Comparator<T>,
    dropped: u64,
}

impl<T> PriorityScheduler<T> {
    pub fn new(high_water_mark: usize, comparator: Comparator<T>) -> Self {
        Self {
            buffer: VecDeque::with_capacity(high_water_mark.min(1024)),
            high_water_mark: high_water_mark.max(1),
            comparator,
            dropped: 0,
        }
    }

    /// Inserts `item` after every item that ranks at least as high. Returns
    /// the evicted item when the buffer overflows, which may be `item` itself.
    pub fn push(&mut self, item: T) -> Option<T> {
        let cmp = self.comparator;
        let position = self
            .buffer
            .partition_point(|queued| cmp(queued, &item) != Ordering::Greater);
        self.buffer.insert(position, item);

        if self.buffer.len() > self.high_water_mark {
            self.dropped += 1;
            return self.buffer.pop_back();
        }
        None
    }

    /// Highest ranked item.
    pub fn pop(&mut self) -> Option<T> {
        self.buffer.pop_front()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Comparator that keeps arrival order; on overflow the newest item is dropped.
pub fn fifo<T>(_: &T, _: &T) -> Ordering {
    Ordering::Equal
}

/// Puts a [`PriorityScheduler`] between `upstream` and the returned receiver.
///
/// The pump task accepts upstream items as fast as they come and hands the
/// best buffered item to the consumer whenever it is ready for one. When
/// upstream closes the remaining buffer is flushed and the output closes.
pub fn prioritize<T: Send + 'static>(
    mut upstream: mpsc::UnboundedReceiver<T>,
    comparator: Comparator<T>,
    high_water_mark: usize,
    label: &'static str,
) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut scheduler = PriorityScheduler::new(high_water_mark, comparator);
        let mut upstream_open = true;

        loop {
            if tx.is_closed() || (!upstream_open && scheduler.is_empty()) {
                break;
            }

            tokio::select! {
                item = upstream.recv(), if upstream_open => match item {
                    Some(item) => {
                        if scheduler.push(item).is_some() {
                            trace!("{}: buffer full, dropped lowest ranked item", label);
                        }
                    }
                    None => upstream_open = false,
                },
                permit = tx.reserve(), if !scheduler.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(item) = scheduler.pop() {
                            permit.send(item);
                        }
                    }
                    Err(_) => break,
                },
            }
        }

        debug!(
            "{} scheduler stopped, {} items dropped",
            label,
            scheduler.dropped()
        );
    });

    rx
}
