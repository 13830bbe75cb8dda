// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-function scale lock with typed state transitions.
//!
//! Lifecycle: Idle → ScalingUp → Ready → ScalingDown → Idle.
//! The lock owns the exclusive section, the episode counter and the set of
//! waiters suspended on the current scale-up episode. It performs no I/O;
//! the scale controller drives it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex, MutexGuard};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::{InvokeError, StateTransitionError};
use crate::types::FunctionId;

/// Scale lock states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleState {
    /// No scale-up in progress and no replica known to be ready.
    Idle,

    /// One scale-up episode is in flight; new callers join as waiters.
    ScalingUp,

    /// At least one replica was observed ready.
    Ready,

    /// The idle timer is scaling the workload to zero.
    ScalingDown,
}

impl ScaleState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::ScalingUp => "ScalingUp",
            Self::Ready => "Ready",
            Self::ScalingDown => "ScalingDown",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: ScaleState) -> bool {
        matches!(
            (self, target),
            // From Idle
            (Self::Idle, Self::ScalingUp) |
            // From ScalingUp: readiness observed, or deadline/error
            (Self::ScalingUp, Self::Ready) |
            (Self::ScalingUp, Self::Idle) |
            // From Ready: idle timer, or readiness lost
            (Self::Ready, Self::ScalingDown) |
            (Self::Ready, Self::ScalingUp) |
            // From ScalingDown: done, or scale-down failed
            (Self::ScalingDown, Self::Idle) |
            (Self::ScalingDown, Self::Ready)
        )
    }
}

impl std::fmt::Display for ScaleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Endpoint known to be backed by at least one ready replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEndpoint {
    pub function_id: FunctionId,
    pub address: String,
    /// Episode that produced this endpoint.
    pub episode: u64,
}

/// Terminal outcome delivered to every waiter of an episode.
pub type EpisodeOutcome = Result<ReadyEndpoint, InvokeError>;

#[derive(Debug)]
struct Waiter {
    tx: oneshot::Sender<EpisodeOutcome>,
    deadline: Instant,
}

/// State guarded by the lock's exclusive section.
#[derive(Debug)]
pub struct LockInner {
    function_id: FunctionId,
    state: ScaleState,
    episode: u64,
    waiters: BTreeMap<u64, Waiter>,
    next_waiter: u64,
    endpoint: Option<String>,
    ready_until: Option<Instant>,
    invalidated: bool,
    idle_task: Option<AbortHandle>,
}

impl LockInner {
    pub fn state(&self) -> ScaleState {
        self.state
    }

    pub fn episode(&self) -> u64 {
        self.episode
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: ScaleState) -> Result<(), StateTransitionError> {
        if !self.state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                function_id: self.function_id.clone(),
                from: self.state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            function_id = %self.function_id,
            from = self.state.name(),
            to = target.name(),
            "Scale state transition"
        );

        self.state = target;
        if target != ScaleState::Ready {
            self.ready_until = None;
        }
        Ok(())
    }

    /// Transition to ScalingUp and open a new episode.
    pub fn begin_episode(&mut self) -> Result<u64, StateTransitionError> {
        self.transition_to(ScaleState::ScalingUp)?;
        self.episode += 1;
        Ok(self.episode)
    }

    /// Register a waiter on the current episode.
    pub fn register_waiter(&mut self, deadline: Instant) -> (u64, oneshot::Receiver<EpisodeOutcome>) {
        self.waiters.retain(|_, w| !w.tx.is_closed());
        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter;
        self.next_waiter += 1;
        self.waiters.insert(id, Waiter { tx, deadline });
        (id, rx)
    }

    /// Remove a waiter whose own deadline elapsed. Returns false if it was
    /// already woken.
    pub fn deregister_waiter(&mut self, id: u64) -> bool {
        self.waiters.remove(&id).is_some()
    }

    /// Deliver the same outcome to every registered waiter, in registration order.
    pub fn wake_all(&mut self, outcome: EpisodeOutcome) -> usize {
        let waiters = std::mem::take(&mut self.waiters);
        let count = waiters.len();
        for (_, waiter) in waiters {
            // A dropped receiver means the caller went away; nothing to deliver.
            let _ = waiter.tx.send(outcome.clone());
        }
        count
    }

    /// Waiters still interested in the current episode.
    pub fn waiter_count(&self) -> usize {
        self.waiters.values().filter(|w| !w.tx.is_closed()).count()
    }

    /// Latest deadline among registered waiters.
    pub fn latest_deadline(&self) -> Option<Instant> {
        self.waiters.values().map(|w| w.deadline).max()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Record the serving endpoint and trust it until `ready_until`.
    pub fn mark_ready(&mut self, address: String, ready_until: Instant) {
        self.endpoint = Some(address);
        self.ready_until = Some(ready_until);
    }

    pub fn refresh_ready(&mut self, ready_until: Instant) {
        self.ready_until = Some(ready_until);
    }

    /// Whether a recent positive readiness read can be reused.
    pub fn ready_cached(&self, now: Instant) -> bool {
        self.state == ScaleState::Ready
            && self.endpoint.is_some()
            && self.ready_until.is_some_and(|until| now < until)
    }

    pub fn clear_endpoint(&mut self) {
        self.endpoint = None;
        self.ready_until = None;
    }

    pub fn has_idle_task(&self) -> bool {
        self.idle_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn set_idle_task(&mut self, task: Option<AbortHandle>) {
        if let Some(previous) = std::mem::replace(&mut self.idle_task, task) {
            if !previous.is_finished() {
                previous.abort();
            }
        }
    }

    /// Fail every waiter and refuse future use. The state machine is left as is.
    pub fn invalidate(&mut self) -> usize {
        self.invalidated = true;
        self.clear_endpoint();
        if let Some(task) = self.idle_task.take() {
            task.abort();
        }
        let outcome = Err(InvokeError::FunctionNotFound(self.function_id.clone()));
        self.wake_all(outcome)
    }
}

/// Per-function scale lock.
#[derive(Debug)]
pub struct ScaleLock {
    function_id: FunctionId,
    inner: Mutex<LockInner>,
    created: Instant,
    last_activity_ms: AtomicU64,
    in_flight: AtomicU64,
    scale_ups: AtomicU64,
    zero_scalable: AtomicBool,
}

impl ScaleLock {
    pub fn new(function_id: FunctionId) -> Self {
        Self {
            inner: Mutex::new(LockInner {
                function_id: function_id.clone(),
                state: ScaleState::Idle,
                episode: 0,
                waiters: BTreeMap::new(),
                next_waiter: 0,
                endpoint: None,
                ready_until: None,
                invalidated: false,
                idle_task: None,
            }),
            function_id,
            created: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            scale_ups: AtomicU64::new(0),
            zero_scalable: AtomicBool::new(true),
        }
    }

    pub fn function_id(&self) -> &FunctionId {
        &self.function_id
    }

    /// Enter the exclusive section.
    pub async fn lock(&self) -> MutexGuard<'_, LockInner> {
        self.inner.lock().await
    }

    /// Record activity; resets the idle timer.
    pub fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::SeqCst);
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> std::time::Duration {
        let now = self.created.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::SeqCst);
        std::time::Duration::from_millis(now.saturating_sub(last))
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Replica-count increases issued over the lock's lifetime.
    pub fn scale_ups(&self) -> u64 {
        self.scale_ups.load(Ordering::SeqCst)
    }

    pub(crate) fn record_scale_up(&self) {
        self.scale_ups.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_zero_scalable(&self) -> bool {
        self.zero_scalable.load(Ordering::SeqCst)
    }

    pub(crate) fn set_zero_scalable(&self, zero_scalable: bool) {
        self.zero_scalable.store(zero_scalable, Ordering::SeqCst);
    }

    /// Track one forwarded request until the guard is dropped.
    pub fn begin_request(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        InFlightGuard {
            lock: Arc::clone(self),
        }
    }

    /// Point-in-time view for the status surface.
    pub async fn snapshot(&self) -> LockSnapshot {
        let inner = self.inner.lock().await;
        LockSnapshot {
            state: inner.state,
            waiters: inner.waiter_count(),
            episode: inner.episode,
            scale_ups: self.scale_ups(),
            in_flight: self.in_flight(),
            endpoint: inner.endpoint.clone(),
        }
    }
}

/// Decrements the in-flight count on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    lock: Arc<ScaleLock>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.lock.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.lock.touch();
    }
}

/// Snapshot of a scale lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub state: ScaleState,
    pub waiters: usize,
    pub episode: u64,
    pub scale_ups: u64,
    pub in_flight: u64,
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn lock() -> Arc<ScaleLock> {
        Arc::new(ScaleLock::new(FunctionId::new("hello").unwrap()))
    }

    fn ready(episode: u64) -> EpisodeOutcome {
        Ok(ReadyEndpoint {
            function_id: FunctionId::new("hello").unwrap(),
            address: "http://fn-hello-svc:8080".to_string(),
            episode,
        })
    }

    #[test]
    fn test_valid_transitions() {
        assert!(ScaleState::Idle.can_transition_to(ScaleState::ScalingUp));
        assert!(ScaleState::ScalingUp.can_transition_to(ScaleState::Ready));
        assert!(ScaleState::ScalingUp.can_transition_to(ScaleState::Idle));
        assert!(ScaleState::Ready.can_transition_to(ScaleState::ScalingDown));
        assert!(ScaleState::ScalingDown.can_transition_to(ScaleState::Idle));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!ScaleState::Idle.can_transition_to(ScaleState::Ready));
        assert!(!ScaleState::Idle.can_transition_to(ScaleState::ScalingDown));
        assert!(!ScaleState::ScalingUp.can_transition_to(ScaleState::ScalingUp));
        assert!(!ScaleState::ScalingDown.can_transition_to(ScaleState::ScalingUp));
    }

    #[tokio::test]
    async fn test_transition_error_names_states() {
        let lock = lock();
        let mut inner = lock.lock().await;
        let err = inner.transition_to(ScaleState::Ready).unwrap_err();
        assert!(err.to_string().contains("Idle"));
        assert!(err.to_string().contains("Ready"));
        assert_eq!(inner.state(), ScaleState::Idle);
    }

    #[tokio::test]
    async fn test_episode_numbers_increase() {
        let lock = lock();
        let mut inner = lock.lock().await;
        assert_eq!(inner.begin_episode().unwrap(), 1);
        assert!(inner.begin_episode().is_err());
        inner.transition_to(ScaleState::Idle).unwrap();
        assert_eq!(inner.begin_episode().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_wake_all_delivers_same_outcome() {
        let lock = lock();
        let mut inner = lock.lock().await;
        let deadline = Instant::now() + Duration::from_secs(1);
        let receivers: Vec<_> = (0..5).map(|_| inner.register_waiter(deadline).1).collect();
        assert_eq!(inner.waiter_count(), 5);

        assert_eq!(inner.wake_all(ready(1)), 5);
        assert_eq!(inner.waiter_count(), 0);
        drop(inner);

        for rx in receivers {
            assert_eq!(rx.await.unwrap(), ready(1));
        }
    }

    #[tokio::test]
    async fn test_deregistered_waiter_is_not_woken() {
        let lock = lock();
        let mut inner = lock.lock().await;
        let deadline = Instant::now() + Duration::from_secs(1);
        let (id, rx) = inner.register_waiter(deadline);

        assert!(inner.deregister_waiter(id));
        assert!(!inner.deregister_waiter(id));
        assert_eq!(inner.wake_all(ready(1)), 0);
        drop(inner);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let lock = lock();
        let mut inner = lock.lock().await;
        let deadline = Instant::now() + Duration::from_secs(1);
        let (_, rx) = inner.register_waiter(deadline);
        drop(rx);
        assert_eq!(inner.waiter_count(), 0);

        let (_, _rx) = inner.register_waiter(deadline);
        assert_eq!(inner.waiters.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_fails_waiters() {
        let lock = lock();
        let mut inner = lock.lock().await;
        let (_, rx) = inner.register_waiter(Instant::now() + Duration::from_secs(1));

        assert_eq!(inner.invalidate(), 1);
        assert!(inner.is_invalidated());
        drop(inner);

        assert!(matches!(
            rx.await.unwrap(),
            Err(InvokeError::FunctionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_cache_expires() {
        let lock = lock();
        let mut inner = lock.lock().await;
        inner.begin_episode().unwrap();
        inner.transition_to(ScaleState::Ready).unwrap();
        inner.mark_ready(
            "http://fn-hello-svc:8080".to_string(),
            Instant::now() + Duration::from_millis(100),
        );
        assert!(inner.ready_cached(Instant::now()));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(!inner.ready_cached(Instant::now()));

        inner.transition_to(ScaleState::ScalingDown).unwrap();
        assert!(!inner.ready_cached(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_guard() {
        let lock = lock();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(lock.idle_for() >= Duration::from_secs(5));

        let guard = lock.begin_request();
        assert_eq!(lock.in_flight(), 1);
        assert_eq!(lock.idle_for(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(2)).await;
        drop(guard);
        assert_eq!(lock.in_flight(), 0);
        assert_eq!(lock.idle_for(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let lock = lock();
        {
            let mut inner = lock.lock().await;
            inner.begin_episode().unwrap();
            let _ = inner.register_waiter(Instant::now() + Duration::from_secs(1));
        }
        lock.record_scale_up();

        let snapshot = lock.snapshot().await;
        assert_eq!(snapshot.state, ScaleState::ScalingUp);
        assert_eq!(snapshot.episode, 1);
        assert_eq!(snapshot.scale_ups, 1);
        // The receiver was dropped immediately.
        assert_eq!(snapshot.waiters, 0);
    }
}
