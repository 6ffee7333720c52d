//! Timed updates delivered by message passing
//!
//! A front end owns one channel for everything it reacts to; the ticker is
//! just another producer on it. `Ticker` sends on a real interval from a
//! single background thread. `ManualTicker` is driven by hand with virtual
//! time, so loops built on ticks can be tested without sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub seq: u64,
    /// Time since the ticker started
    pub elapsed: Duration,
}

pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Start sending a `Tick` every `interval` until stopped, dropped, or the
    /// receiving side hangs up
    pub fn spawn<T>(interval: Duration, tx: Sender<T>) -> Self
    where
        T: From<Tick> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let mut seq = 0;
            loop {
                std::thread::sleep(interval);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                seq += 1;
                let tick = Tick {
                    seq,
                    elapsed: start.elapsed(),
                };
                if tx.send(T::from(tick)).is_err() {
                    break;
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// A ticker advanced explicitly, for deterministic tests
pub struct ManualTicker<T> {
    tx: Sender<T>,
    seq: u64,
    elapsed: Duration,
}

impl<T: From<Tick>> ManualTicker<T> {
    pub fn new(tx: Sender<T>) -> Self {
        Self {
            tx,
            seq: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Advance virtual time and emit one tick. Returns false once the
    /// receiver is gone.
    pub fn advance(&mut self, by: Duration) -> bool {
        self.seq += 1;
        self.elapsed += by;
        let tick = Tick {
            seq: self.seq,
            elapsed: self.elapsed,
        };
        self.tx.send(T::from(tick)).is_ok()
    }
}
