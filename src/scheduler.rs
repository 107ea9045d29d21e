//! Frame scheduling - the display-refresh callback the fade loop runs on
//!
//! Callbacks are one-shot: a loop that wants to keep running requests the next
//! frame from inside its callback. Callbacks run with no scheduler lock held.

use crossbeam_channel::{select, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One-shot frame callback, receives the frame timestamp in milliseconds
pub type FrameCallback = Box<dyn FnOnce(f64) + Send>;

/// Handle used to cancel a pending frame request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequestId(u64);

/// A source of display frames
pub trait FrameScheduler: Send + Sync {
    /// Run `callback` once on the next frame
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId;

    /// Drop a pending request. Unknown or already-run ids are ignored.
    fn cancel_frame(&self, id: FrameRequestId);
}

/// Pending callbacks shared by the scheduler implementations
#[derive(Default)]
struct FrameQueue {
    next_id: AtomicU64,
    pending: Mutex<Vec<(FrameRequestId, FrameCallback)>>,
}

impl FrameQueue {
    fn request(&self, callback: FrameCallback) -> FrameRequestId {
        let id = FrameRequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().push((id, callback));
        id
    }

    fn cancel(&self, id: FrameRequestId) {
        self.pending.lock().retain(|(pending, _)| *pending != id);
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run everything requested before this frame started
    fn run(&self, timestamp_ms: f64) -> usize {
        let due = std::mem::take(&mut *self.pending.lock());
        let count = due.len();
        for (_, callback) in due {
            callback(timestamp_ms);
        }
        count
    }
}

/// Frames are produced by the host calling [`run_frame`](Self::run_frame) from its
/// own render loop.
#[derive(Default)]
pub struct ManualFrameScheduler {
    queue: FrameQueue,
}

impl ManualFrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the callbacks due on this frame; returns how many ran
    pub fn run_frame(&self, timestamp_ms: f64) -> usize {
        self.queue.run(timestamp_ms)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl FrameScheduler for ManualFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId {
        self.queue.request(callback)
    }

    fn cancel_frame(&self, id: FrameRequestId) {
        self.queue.cancel(id);
    }
}

/// Fixed-rate frame thread (~60 Hz by default)
pub struct ThreadedFrameScheduler {
    queue: Arc<FrameQueue>,
    /// Dropping the sender stops the thread
    stop_sender: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ThreadedFrameScheduler {
    /// # Panics
    ///
    /// Panics if the OS fails to create a thread.
    pub fn spawn(interval: Duration) -> Self {
        let queue = Arc::new(FrameQueue::default());
        let (stop_sender, stop_receiver) = crossbeam_channel::bounded::<()>(0);
        let ticker = crossbeam_channel::tick(interval);
        let thread_queue = Arc::clone(&queue);

        let thread_handle = std::thread::Builder::new()
            .name("frame-scheduler".into())
            .spawn(move || {
                let started = Instant::now();
                loop {
                    select! {
                        recv(stop_receiver) -> _ => break,
                        recv(ticker) -> _ => {
                            let timestamp = started.elapsed().as_secs_f64() * 1000.0;
                            thread_queue.run(timestamp);
                        }
                    }
                }
            })
            .expect("failed to spawn frame scheduler thread");

        Self {
            queue,
            stop_sender: Some(stop_sender),
            thread_handle: Some(thread_handle),
        }
    }
}

impl FrameScheduler for ThreadedFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId {
        self.queue.request(callback)
    }

    fn cancel_frame(&self, id: FrameRequestId) {
        self.queue.cancel(id);
    }
}

impl Drop for ThreadedFrameScheduler {
    fn drop(&mut self) {
        // Disconnect the stop channel, then wait for the thread to notice
        drop(self.stop_sender.take());
        if let Some(thread) = self.thread_handle.take() {
            if thread.join().is_err() {
                log::warn!("[Scheduler] Frame thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_manual_frames_run_once() {
        let scheduler = ManualFrameScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        scheduler.request_frame(Box::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(scheduler.run_frame(16.0), 1);
        assert_eq!(scheduler.run_frame(32.0), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel() {
        let scheduler = ManualFrameScheduler::new();
        let id = scheduler.request_frame(Box::new(|_| panic!("cancelled callback ran")));
        scheduler.cancel_frame(id);
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.run_frame(0.0), 0);
    }

    #[test]
    fn test_request_from_inside_callback_lands_on_next_frame() {
        let scheduler = Arc::new(ManualFrameScheduler::new());
        let inner = Arc::clone(&scheduler);
        scheduler.request_frame(Box::new(move |_| {
            inner.request_frame(Box::new(|_| {}));
        }));

        assert_eq!(scheduler.run_frame(0.0), 1);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_threaded_scheduler_ticks() {
        let scheduler = ThreadedFrameScheduler::spawn(Duration::from_millis(2));
        let (tx, rx) = crossbeam_channel::bounded(1);
        scheduler.request_frame(Box::new(move |ts| {
            let _ = tx.send(ts);
        }));

        let ts = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(ts >= 0.0);
    }
}
