//! Minimal actor runtime
//!
//! Every actor owns its state on a dedicated named thread and processes the
//! closures posted to its mailbox one at a time, in arrival order. A
//! [`Driver`] is the only handle other threads hold on an actor.

use crate::error::ReactiveError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

impl ActorId {
    pub(crate) fn next() -> Self {
        ActorId(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

type Message<A> = Box<dyn FnOnce(&mut A) + Send + 'static>;

enum Envelope<A> {
    Run(Message<A>),
    Stop,
}

/// Cloneable mailbox handle on an actor of type `A`
pub struct Driver<A> {
    id: ActorId,
    name: Arc<str>,
    mailbox: Sender<Envelope<A>>,
}

impl<A> Clone for Driver<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            mailbox: self.mailbox.clone(),
        }
    }
}

impl<A> fmt::Debug for Driver<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl<A> PartialEq for Driver<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<A> Eq for Driver<A> {}

impl<A: 'static> Driver<A> {
    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post `action` to the actor's mailbox.
    ///
    /// Returns `false` when the actor has already stopped; the action is
    /// dropped in that case.
    pub fn execute(&self, action: impl FnOnce(&mut A) + Send + 'static) -> bool {
        let delivered = self.mailbox.send(Envelope::Run(Box::new(action))).is_ok();
        if !delivered {
            tracing::trace!(actor = %self.name, "dropping message for stopped actor");
        }
        delivered
    }

    /// Ask the actor to stop after the messages already queued.
    pub fn stop(&self) {
        let _ = self.mailbox.send(Envelope::Stop);
    }
}

/// Join handle of a spawned actor thread
#[derive(Debug)]
pub struct ActorHandle {
    id: ActorId,
    name: Arc<str>,
    thread: Option<JoinHandle<()>>,
}

impl ActorHandle {
    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the actor thread to exit. The actor must have been stopped.
    pub fn join(mut self) -> Result<(), ReactiveError> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<(), ReactiveError> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| ReactiveError::ActorStopped(format!("{} panicked", self.name))),
            None => Ok(()),
        }
    }
}

/// Spawn an actor on its own thread.
///
/// `factory` runs on the calling thread with the new actor's driver, before
/// the thread starts; a factory error aborts the spawn.
pub fn spawn<A, F>(name: impl Into<String>, factory: F) -> Result<(Driver<A>, ActorHandle), ReactiveError>
where
    A: Send + 'static,
    F: FnOnce(Driver<A>) -> Result<A, ReactiveError>,
{
    let name: Arc<str> = Arc::from(name.into());
    let (sender, receiver) = unbounded();
    let driver = Driver {
        id: ActorId::next(),
        name: name.clone(),
        mailbox: sender,
    };
    let actor = factory(driver.clone())?;

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn({
            let name = name.clone();
            move || run(name, actor, receiver)
        })?;

    tracing::debug!(actor = %name, id = %driver.id, "actor spawned");
    Ok((
        driver.clone(),
        ActorHandle {
            id: driver.id,
            name,
            thread: Some(thread),
        },
    ))
}

fn run<A>(name: Arc<str>, mut actor: A, mailbox: Receiver<Envelope<A>>) {
    let mut handled = 0u64;
    while let Ok(envelope) = mailbox.recv() {
        match envelope {
            Envelope::Run(action) => {
                action(&mut actor);
                handled += 1;
            }
            Envelope::Stop => break,
        }
    }
    tracing::debug!(actor = %name, handled, "actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[derive(Default)]
    struct Counter {
        total: u64,
        seen: Vec<u64>,
    }

    #[test]
    fn processes_messages_in_order() {
        let (driver, handle) = spawn("counter", |_| Ok(Counter::default())).unwrap();
        for i in 1..=10 {
            assert!(driver.execute(move |c: &mut Counter| {
                c.total += i;
                c.seen.push(i);
            }));
        }
        let (tx, rx) = bounded(1);
        driver.execute(move |c: &mut Counter| {
            tx.send((c.total, c.seen.clone())).unwrap();
        });
        let (total, seen) = rx.recv().unwrap();
        assert_eq!(total, 55);
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());

        driver.stop();
        handle.join().unwrap();
        assert!(!driver.execute(|_| {}));
    }

    #[test]
    fn factory_runs_before_thread_and_sees_own_driver() {
        let (tx, rx) = bounded(1);
        let (driver, handle) = spawn("self-aware", move |me: Driver<Counter>| {
            tx.send(me.id()).unwrap();
            Ok(Counter::default())
        })
        .unwrap();
        assert_eq!(rx.try_recv().unwrap(), driver.id());
        assert_eq!(handle.name(), "self-aware");
        driver.stop();
        handle.join().unwrap();
    }

    #[test]
    fn factory_error_aborts_spawn() {
        let result = spawn::<Counter, _>("broken", |_| {
            Err(ReactiveError::IllegalState("no graph".into()))
        });
        assert!(matches!(result, Err(ReactiveError::IllegalState(_))));
    }

    #[test]
    fn actor_can_message_itself() {
        struct Looper {
            me: Driver<Looper>,
            remaining: u32,
            done: Sender<()>,
        }
        let (tx, rx) = bounded(1);
        let (driver, handle) = spawn("looper", move |me| {
            Ok(Looper {
                me,
                remaining: 5,
                done: tx,
            })
        })
        .unwrap();

        fn tick(looper: &mut Looper) {
            if looper.remaining == 0 {
                looper.done.send(()).unwrap();
            } else {
                looper.remaining -= 1;
                looper.me.execute(tick);
            }
        }
        driver.execute(tick);
        rx.recv().unwrap();
        driver.stop();
        handle.join().unwrap();
    }
}
