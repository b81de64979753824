//! Execution domains
//!
//! Every context is pinned to one domain and every context operation checks
//! that it runs there. Two kinds exist:
//!
//! - **Interactive**: bound to the thread that created it. Work posted from
//!   other threads queues until that thread calls [`Domain::drain`].
//! - **Worker**: a dedicated thread that runs posted work in order.
//!
//! The current thread's bound domains live in a thread-local set, so one
//! thread may serve several interactive domains (one per context graph).

use crate::types::DomainId;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static BOUND_DOMAINS: RefCell<Vec<DomainId>> = const { RefCell::new(Vec::new()) };
}

fn bind_current_thread(id: DomainId) {
    BOUND_DOMAINS.with(|bound| bound.borrow_mut().push(id));
}

fn unbind_current_thread(id: DomainId) {
    BOUND_DOMAINS.with(|bound| bound.borrow_mut().retain(|d| *d != id));
}

fn is_bound(id: DomainId) -> bool {
    BOUND_DOMAINS.with(|bound| bound.borrow().contains(&id))
}

/// Confinement requested for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confinement {
    /// The interactive (UI-affinity) domain of the context graph.
    Interactive,
    /// A worker domain; a dedicated one is created unless supplied.
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    Interactive,
    Worker,
}

struct DomainInner {
    id: DomainId,
    kind: DomainKind,
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    // Interactive domains keep their queue here; workers hand it to the thread.
    queue: Option<Mutex<Receiver<Job>>>,
    owner: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DomainInner {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.sender.lock().take();
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                // Last handle dropped by a job on this very worker.
                trace!(domain = %self.id, "Detaching worker from itself");
            } else if handle.join().is_err() {
                warn!(domain = %self.id, "Worker thread panicked");
            }
        }
        if self.kind == DomainKind::Interactive && thread::current().id() == self.owner {
            unbind_current_thread(self.id);
        }
        debug!(domain = %self.id, name = %self.name, "Domain shut down");
    }
}

/// Handle to an execution domain. Cloning shares the domain.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    /// Create an interactive domain bound to the calling thread.
    pub fn interactive() -> Self {
        let (sender, receiver) = mpsc::channel();
        let id = DomainId::next();
        bind_current_thread(id);
        debug!(domain = %id, "Bound interactive domain to current thread");
        Self {
            inner: Arc::new(DomainInner {
                id,
                kind: DomainKind::Interactive,
                name: "interactive".to_string(),
                sender: Mutex::new(Some(sender)),
                queue: Some(Mutex::new(receiver)),
                owner: thread::current().id(),
                thread: Mutex::new(None),
            }),
        }
    }

    /// Spawn a worker domain on its own thread.
    pub fn worker(name: impl Into<String>) -> Self {
        let name = name.into();
        let id = DomainId::next();
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(format!("{}-{}", name, id.as_u64()))
            .spawn(move || {
                bind_current_thread(id);
                for job in receiver {
                    job();
                }
            });
        let handle = match handle {
            Ok(h) => h,
            Err(e) => panic!("failed to spawn worker domain '{}': {}", name, e),
        };
        let owner = handle.thread().id();
        debug!(domain = %id, name = %name, "Spawned worker domain");

        Self {
            inner: Arc::new(DomainInner {
                id,
                kind: DomainKind::Worker,
                name,
                sender: Mutex::new(Some(sender)),
                queue: None,
                owner,
                thread: Mutex::new(Some(handle)),
            }),
        }
    }

    pub fn id(&self) -> DomainId {
        self.inner.id
    }

    pub fn kind(&self) -> DomainKind {
        self.inner.kind
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread runs this domain.
    pub fn is_current(&self) -> bool {
        is_bound(self.inner.id)
    }

    /// Panic unless the calling thread runs this domain.
    #[track_caller]
    pub fn assert_current(&self, operation: &str) {
        if !self.is_current() {
            panic!(
                "confinement violation: {} must run on {} ({}), called from thread {:?}",
                operation,
                self.inner.id,
                self.inner.name,
                thread::current().name().unwrap_or("<unnamed>")
            );
        }
    }

    /// Post work to this domain without waiting.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.inner.sender.lock();
        match sender.as_ref() {
            Some(s) => {
                if s.send(Box::new(job)).is_err() {
                    warn!(domain = %self.inner.id, "Dropped job for stopped domain");
                }
            }
            None => warn!(domain = %self.inner.id, "Dropped job for stopped domain"),
        }
    }

    /// Run `f` on this domain and return its result.
    ///
    /// Runs inline when already on the domain. Otherwise blocks the caller;
    /// for an interactive domain that means until its thread drains.
    pub fn execute_and_wait<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return f();
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.execute(move || {
            let _ = tx.send(f());
        });
        match rx.recv() {
            Ok(value) => value,
            Err(_) => panic!(
                "domain {} ({}) stopped before completing a job",
                self.inner.id, self.inner.name
            ),
        }
    }

    /// Run every job queued on an interactive domain. Returns how many ran.
    #[track_caller]
    pub fn drain(&self) -> usize {
        self.assert_current("Domain::drain");
        let Some(queue) = self.inner.queue.as_ref() else {
            return 0;
        };
        let mut ran = 0;
        loop {
            // Release the queue lock before running, jobs may post more work.
            let next = queue.lock().try_recv();
            match next {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        ran
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("name", &self.inner.name)
            .finish()
    }
}
