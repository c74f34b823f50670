//! Multi-threaded sample streaming
//!
//! Workers claim work units from a shared counter, load and map their samples
//! and send the mapped items over a bounded channel. The consumer runs on the
//! calling thread and sees items in completion order, not table order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use tracing::debug;

use super::{FilesDataset, SampleData};
use crate::DataError;

/// Items buffered per worker before senders block
const PREFETCH_FACTOR: usize = 4;

impl FilesDataset {
    /// Load every sample, map it on a worker and feed the result to `consume`.
    ///
    /// `map` receives the sample index and the load result. With
    /// `workers == 0` everything runs on the calling thread. An error from
    /// `consume` stops the workers and is returned.
    pub fn for_each<T, M, C>(&self, workers: usize, map: M, mut consume: C) -> Result<(), DataError>
    where
        T: Send,
        M: Fn(usize, Result<SampleData, DataError>) -> T + Sync,
        C: FnMut(T) -> Result<(), DataError>,
    {
        let units = self.work_units();
        debug!("Streaming {} samples in {} units over {} workers", self.len(), units.len(), workers);

        if workers == 0 {
            for unit in &units {
                for (idx, sample) in self.load_unit(unit) {
                    consume(map(idx, sample))?;
                }
            }
            return Ok(());
        }

        let next_unit = AtomicUsize::new(0);
        let workers = workers.min(units.len().max(1));

        thread::scope(|scope| {
            let (sender, receiver) = mpsc::sync_channel::<T>(workers * PREFETCH_FACTOR);

            for _ in 0..workers {
                let sender = sender.clone();
                let units = &units;
                let next_unit = &next_unit;
                let map = &map;
                scope.spawn(move || loop {
                    let claimed = next_unit.fetch_add(1, Ordering::Relaxed);
                    let Some(unit) = units.get(claimed) else {
                        break;
                    };
                    for (idx, sample) in self.load_unit(unit) {
                        if sender.send(map(idx, sample)).is_err() {
                            // Consumer stopped
                            return;
                        }
                    }
                });
            }
            drop(sender);

            let mut outcome = Ok(());
            for item in receiver.iter() {
                if let Err(err) = consume(item) {
                    outcome = Err(err);
                    break;
                }
            }
            // Unblock workers waiting on a full channel
            drop(receiver);
            outcome
        })
    }
}
