use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use xorlist_contracts::Identifier;

use crate::error::SyncError;

/// Observer of whitelist updates. Both methods run on the notification
/// context, never on a network or client thread.
pub trait UpdateListener: Send + Sync {
    fn on_updated(&self, whitelist: &[Identifier]);
    fn on_update_failed(&self, error: &SyncError);
}

pub type Job = Box<dyn FnOnce() + Send + 'static>;

// Jobs posted from one thread must run in posting order.
pub trait Dispatcher: Send + Sync {
    fn post(&self, job: Job);
}

/// A single named OS thread that runs posted jobs in FIFO order. It stops
/// once every handle is dropped.
pub struct ThreadDispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

pub const NOTIFY_THREAD_NAME: &str = "xorlist-notify";

impl ThreadDispatcher {
    pub fn spawn() -> std::io::Result<Self> {
        Self::spawn_named(NOTIFY_THREAD_NAME)
    }

    pub fn spawn_named(name: &str) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(target: "xorlist::manager", "listener panicked during notification");
                    }
                }
                debug!(target: "xorlist::manager", "notification context stopped");
            })?;
        Ok(Self { tx })
    }
}

impl Dispatcher for ThreadDispatcher {
    fn post(&self, job: Job) {
        if self.tx.send(job).is_err() {
            warn!(target: "xorlist::manager", "notification context is gone, dropping notification");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhitelistEvent {
    Updated(Vec<Identifier>),
    UpdateFailed(SyncError),
}

pub struct ChannelListener {
    tx: mpsc::UnboundedSender<WhitelistEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<WhitelistEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl UpdateListener for ChannelListener {
    fn on_updated(&self, whitelist: &[Identifier]) {
        let _ = self.tx.send(WhitelistEvent::Updated(whitelist.to_vec()));
    }

    fn on_update_failed(&self, error: &SyncError) {
        let _ = self.tx.send(WhitelistEvent::UpdateFailed(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_order_on_the_named_thread() {
        let dispatcher = ThreadDispatcher::spawn_named("notify-test").unwrap();
        let (tx, rx) = std_mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            dispatcher.post(Box::new(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            }));
        }
        let seen: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        assert!(seen
            .iter()
            .all(|(_, name)| name.as_deref() == Some("notify-test")));
    }

    #[test]
    fn panicking_job_does_not_stop_the_context() {
        let dispatcher = ThreadDispatcher::spawn_named("notify-panic").unwrap();
        let (tx, rx) = std_mpsc::channel();
        dispatcher.post(Box::new(|| panic!("listener bug")));
        dispatcher.post(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn channel_listener_forwards_events() {
        let (listener, mut rx) = ChannelListener::new();
        listener.on_updated(&[1, 2]);
        listener.on_update_failed(&SyncError::HttpStatus { status: 500 });
        assert_eq!(rx.try_recv().unwrap(), WhitelistEvent::Updated(vec![1, 2]));
        assert_eq!(
            rx.try_recv().unwrap(),
            WhitelistEvent::UpdateFailed(SyncError::HttpStatus { status: 500 })
        );
    }
}
