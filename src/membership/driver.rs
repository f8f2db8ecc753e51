//! Background save/load/handle loop.
//!
//! The driver owns the [`Membership`] behind a mutex. Every `run_interval`
//! the worker thread saves the local view, reloads (merging siblings) and
//! runs `handle`; the bookkeeping from one pass is persisted by the next
//! pass's save. Foreground calls ([`join`](MembershipDriver::join),
//! [`part`](MembershipDriver::part), [`with`](MembershipDriver::with)) take
//! the same lock, so they never interleave with a pass. Shutdown is a
//! message on a bounded channel whose `recv_timeout` also paces the loop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::error::Error;

use super::protocol::{JoinOutcome, Membership};
use super::state::{HandleReport, MembershipState};

/// A [`Membership`] with a running handle loop.
#[derive(Debug)]
pub struct MembershipDriver {
    shared: Arc<Mutex<Membership>>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl MembershipDriver {
    /// Start the loop without joining.
    #[must_use]
    pub fn spawn(membership: Membership) -> Self {
        let interval = membership.timing().run_interval;
        let shared = Arc::new(Mutex::new(membership));
        let (tx, rx) = channel::bounded::<()>(1);
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::spawn(move || {
            loop {
                if let Err(err) = pass(&worker_shared) {
                    tracing::warn!(error = %err, "membership pass failed");
                    if matches!(err, Error::LockPoisoned) {
                        break;
                    }
                }
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::debug!("membership loop stopped");
        });
        Self {
            shared,
            shutdown: Some(tx),
            worker: Some(worker),
        }
    }

    /// Start the loop, then join the group.
    ///
    /// # Errors
    /// As [`join`](Self::join). The loop keeps running on error; drop or
    /// [`stop`](Self::stop) the driver to end it.
    pub fn start(membership: Membership) -> Result<(Self, JoinOutcome), Error> {
        let driver = Self::spawn(membership);
        let outcome = driver.join()?;
        Ok((driver, outcome))
    }

    /// Request to join, wait one join interval with the lock released, then
    /// complete or withdraw.
    ///
    /// # Errors
    /// Returns [`Error::LockPoisoned`] or the errors of
    /// [`Membership::join_begin`] / [`Membership::join_finish`].
    pub fn join(&self) -> Result<JoinOutcome, Error> {
        let (clock, wait) = {
            let mut m = self.lock()?;
            m.join_begin()?;
            (Arc::clone(m.clock()), m.timing().join_interval)
        };
        clock.sleep(wait);
        self.lock()?.join_finish()
    }

    /// Request to leave the group. The loop keeps running.
    ///
    /// # Errors
    /// Returns [`Error::LockPoisoned`] or the errors of [`Membership::part`].
    pub fn part(&self) -> Result<(), Error> {
        self.lock()?.part()
    }

    /// Run `f` with exclusive access to the membership.
    ///
    /// # Errors
    /// Returns [`Error::LockPoisoned`].
    pub fn with<R>(&self, f: impl FnOnce(&mut Membership) -> R) -> Result<R, Error> {
        let mut m = self.lock()?;
        Ok(f(&mut m))
    }

    /// Copy of the current local view.
    ///
    /// # Errors
    /// Returns [`Error::LockPoisoned`].
    pub fn snapshot(&self) -> Result<MembershipState, Error> {
        self.with(|m| m.state().clone())
    }

    /// Run one save/load/handle pass now.
    ///
    /// # Errors
    /// Returns [`Error::LockPoisoned`] or store errors.
    pub fn tick(&self) -> Result<HandleReport, Error> {
        pass(&self.shared)
    }

    /// Stop the loop and hand back the membership.
    ///
    /// # Errors
    /// Returns [`Error::LockPoisoned`] if a pass panicked.
    pub fn stop(mut self) -> Result<Membership, Error> {
        self.halt();
        let shared = Arc::clone(&self.shared);
        drop(self);
        match Arc::try_unwrap(shared) {
            Ok(mutex) => mutex.into_inner().map_err(|_| Error::LockPoisoned),
            Err(shared) => shared
                .lock()
                .map(|m| m.clone())
                .map_err(|_| Error::LockPoisoned),
        }
    }

    /// Request to leave, then stop the loop.
    ///
    /// # Errors
    /// As [`part`](Self::part) and [`stop`](Self::stop).
    pub fn leave(self) -> Result<Membership, Error> {
        self.part()?;
        self.stop()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Membership>, Error> {
        self.shared.lock().map_err(|_| Error::LockPoisoned)
    }

    fn halt(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            // The worker may already be gone; a closed channel also stops it.
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("membership loop panicked");
        }
    }
}

impl Drop for MembershipDriver {
    fn drop(&mut self) {
        self.halt();
    }
}

fn pass(shared: &Mutex<Membership>) -> Result<HandleReport, Error> {
    let mut m = shared.lock().map_err(|_| Error::LockPoisoned)?;
    m.save()?;
    m.reload()?;
    Ok(m.handle())
}
