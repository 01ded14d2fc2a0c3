//! Thread-per-connection spawning.
//!
//! Live threads are tracked in a slab so finished ones can be joined as the
//! accept loop goes, and the rest waited for on shutdown.

use super::{serve, Connection, Dialogue};
use slab::Slab;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

pub(crate) struct ThreadSpawner<D> {
    dialogue: Arc<D>,
    threads: Slab<JoinHandle<()>>,
}

impl<D: Dialogue> ThreadSpawner<D> {
    pub fn new(dialogue: Arc<D>) -> Self {
        Self {
            dialogue,
            threads: Slab::new(),
        }
    }

    /// Start a thread that runs the dialogue on `conn`.
    ///
    /// If the thread cannot be created the connection is dropped (closed).
    pub fn spawn(&mut self, conn: Connection) -> io::Result<()> {
        self.reap_finished();

        let dialogue = Arc::clone(&self.dialogue);
        let handle = thread::Builder::new()
            .name(format!("conn-{}", conn.id()))
            .spawn(move || {
                serve(&*dialogue, conn);
            })?;

        self.threads.insert(handle);
        Ok(())
    }

    /// Join every thread that has already finished.
    pub fn reap_finished(&mut self) -> usize {
        let finished: Vec<usize> = self
            .threads
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(key, _)| key)
            .collect();

        for &key in &finished {
            join(self.threads.remove(key));
        }
        finished.len()
    }

    /// Number of threads not yet joined.
    pub fn live(&self) -> usize {
        self.threads.len()
    }

    /// Wait for every remaining thread.
    pub fn join_all(&mut self) {
        if self.live() > 0 {
            debug!(threads = self.live(), "Waiting for connection threads");
        }
        for handle in self.threads.drain() {
            join(handle);
        }
    }
}

fn join(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("Connection thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DialogueError;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    struct Greeter;

    impl Dialogue for Greeter {
        fn converse(&self, mut conn: Connection) -> Result<(), DialogueError> {
            conn.write_all(b"hi").map_err(DialogueError::Send)
        }
    }

    #[test]
    fn test_spawn_and_reap() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();

        let mut spawner = ThreadSpawner::new(Arc::new(Greeter));
        spawner.spawn(Connection::new(stream, Some(peer))).unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"hi");

        for _ in 0..200 {
            if spawner.reap_finished() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(spawner.live(), 0);
        spawner.join_all();
    }
}
