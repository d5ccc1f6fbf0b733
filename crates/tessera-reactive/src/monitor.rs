//! Termination accounting for one computation
//!
//! The monitor is an actor. Every node reports to it through the monitoring
//! delegate; since all reports of a computation travel through this single
//! mailbox they are observed in one total order.
//!
//! Counting rules:
//!
//! * an item is *created* when a stage makes it available for delivery
//!   (source output, transformer output, pool admission counted once per
//!   eventual delivery),
//! * an item is *consumed* when a stage or root receives it,
//! * a stage always reports what it created before consuming the input that
//!   caused it, and before handing anything to another actor.
//!
//! The computation is finished once a root is registered, every registered
//! source has reported exhaustion and created equals consumed: nothing is in
//! flight and nothing can ever be produced again.

use crate::error::ReactiveError;
use crate::identifier::ReactiveIdentifier;
use serde::{Deserialize, Serialize};
use ahash::{AHashMap, AHashSet};

/// Callback notified once with the computation outcome
pub type RootCallback = Box<dyn FnOnce(Result<(), ReactiveError>) + Send>;

/// Callback notified when the computation is terminated by an error
pub type MemberCallback = Box<dyn Fn(ReactiveError) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Running,
    Finished,
    Terminated,
}

/// Created/consumed totals for one reactive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnswerCounts {
    pub created: u64,
    pub consumed: u64,
}

/// Point-in-time view of the monitor, for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub state: MonitorState,
    pub created: u64,
    pub consumed: u64,
    pub sources: usize,
    pub finished_sources: usize,
    pub roots: usize,
    pub paths: usize,
}

pub struct Monitor {
    state: MonitorState,
    roots: Vec<(ReactiveIdentifier, Option<RootCallback>)>,
    members: Vec<MemberCallback>,
    sources: AHashMap<ReactiveIdentifier, bool>,
    paths: AHashSet<(ReactiveIdentifier, ReactiveIdentifier)>,
    counts: AHashMap<ReactiveIdentifier, AnswerCounts>,
    created: u64,
    consumed: u64,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            state: MonitorState::Running,
            roots: Vec::new(),
            members: Vec::new(),
            sources: AHashMap::new(),
            paths: AHashSet::new(),
            counts: AHashMap::new(),
            created: 0,
            consumed: 0,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn register_root(&mut self, root: ReactiveIdentifier, on_done: RootCallback) {
        match self.state {
            MonitorState::Running => {
                tracing::debug!(%root, "root registered");
                self.roots.push((root, Some(on_done)));
                self.check_finished();
            }
            MonitorState::Finished => on_done(Ok(())),
            MonitorState::Terminated => on_done(Err(ReactiveError::Terminated(
                "computation already terminated".to_string(),
            ))),
        }
    }

    pub fn register_member(&mut self, on_terminate: MemberCallback) {
        self.members.push(on_terminate);
    }

    pub fn register_source(&mut self, source: ReactiveIdentifier) {
        self.sources.entry(source).or_insert(false);
    }

    pub fn source_finished(&mut self, source: ReactiveIdentifier) {
        match self.sources.get_mut(&source) {
            Some(finished) => *finished = true,
            None => {
                tracing::warn!(%source, "finish reported by unregistered source");
                self.sources.insert(source, true);
            }
        }
        self.check_finished();
    }

    /// Record that `subscriber` pulled from `publisher` for the first time.
    pub fn register_path(&mut self, subscriber: ReactiveIdentifier, publisher: ReactiveIdentifier) {
        if self.paths.insert((subscriber.clone(), publisher.clone())) {
            tracing::trace!(%subscriber, %publisher, "path registered");
        }
    }

    pub fn answers_created(&mut self, reactive: ReactiveIdentifier, count: u64) {
        self.created += count;
        self.counts.entry(reactive).or_default().created += count;
    }

    pub fn answer_consumed(&mut self, reactive: ReactiveIdentifier) {
        self.consumed += 1;
        self.counts.entry(reactive).or_default().consumed += 1;
        if self.consumed > self.created {
            tracing::warn!(
                created = self.created,
                consumed = self.consumed,
                "more answers consumed than created"
            );
        }
        self.check_finished();
    }

    /// Fail the computation: every member and root hears `cause` once.
    pub fn terminate(&mut self, cause: ReactiveError) {
        if self.state != MonitorState::Running {
            return;
        }
        tracing::warn!(error = %cause, "computation terminated");
        self.state = MonitorState::Terminated;
        for member in &self.members {
            member(cause.clone());
        }
        for (_, on_done) in &mut self.roots {
            if let Some(on_done) = on_done.take() {
                on_done(Err(cause.clone()));
            }
        }
    }

    pub fn counts(&self, reactive: &ReactiveIdentifier) -> AnswerCounts {
        self.counts.get(reactive).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            state: self.state,
            created: self.created,
            consumed: self.consumed,
            sources: self.sources.len(),
            finished_sources: self.sources.values().filter(|done| **done).count(),
            roots: self.roots.len(),
            paths: self.paths.len(),
        }
    }

    fn check_finished(&mut self) {
        if self.state != MonitorState::Running
            || self.roots.is_empty()
            || self.created != self.consumed
            || !self.sources.values().all(|done| *done)
        {
            return;
        }
        tracing::debug!(
            answers = self.created,
            sources = self.sources.len(),
            "computation finished"
        );
        self.state = MonitorState::Finished;
        for (_, on_done) in &mut self.roots {
            if let Some(on_done) = on_done.take() {
                on_done(Ok(()));
            }
        }
    }
}
