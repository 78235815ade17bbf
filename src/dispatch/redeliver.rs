//! Redelivery of messages onto another execution context.
//!
//! A subscriber runs on the session's I/O task. When the consumer lives
//! somewhere else (a UI main loop, a dedicated runtime), wrap it with
//! [`redeliver`] so each message is posted to that context instead of being
//! handled inline.
//!
//! ```
//! use std::sync::Arc;
//! use motorlink::dispatch::{redeliver, JobQueue, NotificationDispatcher};
//! use motorlink::protocol::Message;
//!
//! // A main loop drains this queue.
//! let (queue, mut jobs) = JobQueue::channel();
//!
//! let dispatcher = NotificationDispatcher::new();
//! dispatcher.subscribe(redeliver(queue, |msg: Message| println!("{}", msg.text)));
//! dispatcher.dispatch(&Message::new("ok", Arc::from("demo")));
//!
//! while let Ok(job) = jobs.try_recv() {
//!     job();
//! }
//! ```

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::protocol::Message;

/// Unit of work posted to a [`JobQueue`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that accepts work from other threads.
pub trait DeliveryTarget: Send + Sync + 'static {
    /// Run `job` on this context. Returns `false` if the context is gone.
    fn post(&self, job: Job) -> bool;
}

/// Runs each job as a task on a tokio runtime.
impl DeliveryTarget for Handle {
    fn post(&self, job: Job) -> bool {
        self.spawn(async move { job() });
        true
    }
}

/// Sending side of a job queue drained by a foreign main loop.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    /// Create a queue and the receiver the main loop drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DeliveryTarget for JobQueue {
    fn post(&self, job: Job) -> bool {
        self.tx.send(job).is_ok()
    }
}

/// Wrap `callback` so each message is re-posted onto `target`.
///
/// The returned closure clones the message and returns immediately; it never
/// waits for `callback` to run. Messages posted after the target is gone are
/// dropped with a debug log.
pub fn redeliver<T, F>(target: T, callback: F) -> impl Fn(&Message) + Send + Sync + 'static
where
    T: DeliveryTarget,
    F: Fn(Message) + Send + Sync + 'static,
{
    let callback = std::sync::Arc::new(callback);
    move |message: &Message| {
        let callback = callback.clone();
        let message = message.clone();
        if !target.post(Box::new(move || callback(message))) {
            tracing::debug!("delivery target closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NotificationDispatcher;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_job_queue_defers_delivery() {
        let (queue, mut jobs) = JobQueue::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = NotificationDispatcher::new();

        let s = seen.clone();
        dispatcher.subscribe(redeliver(queue, move |m: Message| {
            s.lock().unwrap().push(m.text)
        }));
        dispatcher.dispatch(&Message::new("one", Arc::from("p")));
        dispatcher.dispatch(&Message::new("two", Arc::from("p")));

        assert!(seen.lock().unwrap().is_empty());
        while let Ok(job) = jobs.try_recv() {
            job();
        }
        assert_eq!(*seen.lock().unwrap(), ["one", "two"]);
    }

    #[test]
    fn test_closed_queue_drops() {
        let (queue, jobs) = JobQueue::channel();
        drop(jobs);
        let forward = redeliver(queue, |_: Message| panic!("must not run"));
        forward(&Message::new("x", Arc::from("p")));
    }

    #[tokio::test]
    async fn test_runtime_handle_target() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let forward = redeliver(Handle::current(), move |m: Message| {
            let _ = tx.send(m.text);
        });

        forward(&Message::new("spawned", Arc::from("p")));
        assert_eq!(rx.recv().await.as_deref(), Some("spawned"));
    }
}
