//! Debounced background commits.
//!
//! Every storage mutation calls [`CommitScheduler::notify_dirty`]; the
//! first notification arms a deadline one durability window away, and
//! notifications that arrive while a deadline is armed coalesce into it.
//! When the deadline expires the worker runs the commit closure once.
//! Failures cannot propagate out of the background thread, so the closure
//! is expected to log them; an explicit foreground `commit()` is the way
//! to observe errors.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::lock;

enum Message {
    Dirty,
    Flush,
    Stop,
}

/// Handle to the background commit worker. Stopping is idempotent and
/// also happens on drop.
#[derive(Debug)]
pub(crate) struct CommitScheduler {
    tx: mpsc::Sender<Message>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CommitScheduler {
    /// Spawns the worker. `commit` runs on the worker thread whenever an
    /// armed deadline expires or a flush is requested.
    pub fn spawn<F>(window: Duration, commit: F) -> CommitScheduler
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let mut deadline: Option<Instant> = None;
            loop {
                let message = match deadline {
                    Some(when) => {
                        let now = Instant::now();
                        if when <= now {
                            tracing::trace!("debounced commit firing");
                            commit();
                            deadline = None;
                            continue;
                        }
                        match rx.recv_timeout(when - now) {
                            Ok(message) => message,
                            Err(RecvTimeoutError::Timeout) => {
                                tracing::trace!("debounced commit firing");
                                commit();
                                deadline = None;
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    None => match rx.recv() {
                        Ok(message) => message,
                        Err(_) => break,
                    },
                };

                match message {
                    Message::Dirty => {
                        // Coalescing: a deadline already armed absorbs
                        // every further notification until it fires.
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + window);
                        }
                    }
                    Message::Flush => {
                        commit();
                        deadline = None;
                    }
                    Message::Stop => break,
                }
            }
        });

        CommitScheduler {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Arms the commit deadline if none is armed yet.
    pub fn notify_dirty(&self) {
        let _ = self.tx.send(Message::Dirty);
    }

    /// Runs the commit closure on the worker immediately and disarms any
    /// pending deadline.
    #[allow(dead_code)] // exercised by tests; kept for explicit flushes
    pub fn flush(&self) {
        let _ = self.tx.send(Message::Flush);
    }

    /// Stops the worker and waits for it to exit. Any armed deadline is
    /// abandoned without committing; callers commit explicitly first.
    pub fn stop(&self) {
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            let _ = self.tx.send(Message::Stop);
            let _ = handle.join();
        }
    }
}

impl Drop for CommitScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
