//! Tracking of live sessions so a stopping server can cut them off

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

#[derive(Debug)]
struct LiveSession {
    peer: SocketAddr,
    stream: TcpStream,
}

#[derive(Debug, Default)]
struct Sessions {
    next_id: u64,
    live: HashMap<u64, LiveSession>,
}

/// Set of connections currently being served
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<Sessions>,
    drained: Condvar,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `stream` until the returned guard is dropped.
    ///
    /// The registry keeps its own handle to the socket so it can shut it
    /// down from another thread.
    pub fn register(
        self: &Arc<Self>,
        peer: SocketAddr,
        stream: &TcpStream,
    ) -> io::Result<SessionGuard> {
        let stream = stream.try_clone()?;
        let mut sessions = self.lock();
        sessions.next_id += 1;
        let id = sessions.next_id;
        sessions.live.insert(id, LiveSession { peer, stream });

        Ok(SessionGuard {
            id,
            registry: Arc::clone(self),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down the socket of every live session, unblocking their reads.
    ///
    /// Returns how many sessions were live.
    pub fn cancel_all(&self) -> usize {
        let sessions = self.lock();
        for (id, session) in &sessions.live {
            debug!(id, peer = %session.peer, "cancelling session");
            // The peer may already be gone.
            let _ = session.stream.shutdown(Shutdown::Both);
        }
        sessions.live.len()
    }

    /// Wait until no session is live. Returns false if `timeout` ran out first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let sessions = self.lock();
        let (sessions, _) = self
            .drained
            .wait_timeout_while(sessions, timeout, |sessions| !sessions.live.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        sessions.live.is_empty()
    }

    fn remove(&self, id: u64) {
        let mut sessions = self.lock();
        sessions.live.remove(&id);
        if sessions.live.is_empty() {
            self.drained.notify_all();
        }
    }
}

/// Keeps a session registered for as long as it lives
#[derive(Debug)]
pub struct SessionGuard {
    id: u64,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn connected_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (client, server, peer)
    }

    #[test]
    fn test_register_and_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let (_client, server, peer) = connected_pair();

        let first = registry.register(peer, &server).unwrap();
        let second = registry.register(peer, &server).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 2);

        drop(first);
        assert_eq!(registry.len(), 1);
        drop(second);
        assert!(registry.is_empty());
        assert!(registry.wait_idle(Duration::ZERO));
    }

    #[test]
    fn test_cancel_all_unblocks_reader() {
        let registry = Arc::new(SessionRegistry::new());
        let (_client, mut server, peer) = connected_pair();
        let guard = registry.register(peer, &server).unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 16];
            let read = server.read(&mut buf);
            drop(guard);
            read
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(registry.cancel_all(), 1);
        assert!(registry.wait_idle(Duration::from_secs(5)));

        // Either EOF or an error, but never a hang.
        let read = handle.join().unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[test]
    fn test_wait_idle_times_out() {
        let registry = Arc::new(SessionRegistry::new());
        let (_client, server, peer) = connected_pair();
        let _guard = registry.register(peer, &server).unwrap();

        assert!(!registry.wait_idle(Duration::from_millis(20)));
    }
}
