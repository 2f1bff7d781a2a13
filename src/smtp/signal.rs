//! Shutdown and readiness notifications between a server and its owner

use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Create a connected shutdown trigger and signal.
///
/// Nothing is ever sent on the underlying channel: the signal fires when the
/// trigger is consumed or dropped and the channel disconnects. Any number of
/// clones of the signal observe the same trigger.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (sender, receiver) = channel::bounded(0);
    (
        ShutdownTrigger { _sender: sender },
        ShutdownSignal { receiver },
    )
}

/// Owner side of a shutdown channel. Dropping it also fires the signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    _sender: Sender<()>,
}

impl ShutdownTrigger {
    /// Ask every server observing the paired signal to stop
    pub fn trigger(self) {
        drop(self);
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep until the signal fires or `timeout` passes.
    ///
    /// Returns whether the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Receiver that becomes ready (disconnected) on shutdown, for use in
    /// `select!`.
    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

/// Publishes the address a server bound to.
///
/// Set once by the accept loop; every clone sees the same value.
#[derive(Debug, Clone, Default)]
pub struct ReadySignal {
    inner: Arc<(Mutex<Option<SocketAddr>>, Condvar)>,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `addr` and wake all waiters. Later calls are ignored.
    pub(crate) fn notify(&self, addr: SocketAddr) {
        let (lock, ready) = &*self.inner;
        let mut bound = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if bound.is_none() {
            *bound = Some(addr);
            ready.notify_all();
        }
    }

    /// Bound address, if the server is already listening
    pub fn get(&self) -> Option<SocketAddr> {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the server is listening
    pub fn wait(&self) -> SocketAddr {
        let (lock, ready) = &*self.inner;
        let mut bound = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(addr) = *bound {
                return addr;
            }
            bound = ready.wait(bound).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SocketAddr> {
        let (lock, ready) = &*self.inner;
        let bound = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (bound, _) = ready
            .wait_timeout_while(bound, timeout, |bound| bound.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *bound
    }
}
