//! Background frame acquisition.
//!
//! Loading images is I/O bound, so a worker thread reads ahead into a bounded
//! channel while the driver estimates motion for the current pair. Frames
//! still arrive strictly in order and the driver stays the only owner of the
//! window and the trajectories.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use tracing::debug;

use super::source::{FrameSource, StereoPair};
use crate::error::Result;

pub struct PrefetchSource<I> {
    receiver: Option<Receiver<Result<StereoPair<I>>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<I: Send + 'static> PrefetchSource<I> {
    /// Move `inner` onto a worker thread that keeps up to `capacity` pairs ready.
    pub fn spawn<S>(mut inner: S, capacity: usize) -> Self
    where
        S: FrameSource<Image = I> + Send + 'static,
    {
        let (sender, receiver) = bounded(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                match inner.next_pair() {
                    Ok(Some(pair)) => {
                        if sender.send(Ok(pair)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = sender.send(Err(e));
                        break;
                    }
                }
            }
            debug!("prefetch worker finished");
        });

        Self {
            receiver: Some(receiver),
            stop,
            handle: Some(handle),
        }
    }
}

impl<I> FrameSource for PrefetchSource<I> {
    type Image = I;

    fn next_pair(&mut self) -> Result<Option<StereoPair<I>>> {
        let Some(receiver) = self.receiver.as_ref() else {
            return Ok(None);
        };
        match receiver.recv() {
            Ok(item) => item.map(Some),
            // Worker hung up: source exhausted or stopped.
            Err(_) => Ok(None),
        }
    }
}

impl<I> Drop for PrefetchSource<I> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the receiver unblocks a worker waiting on a full channel.
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
