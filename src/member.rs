//! Pooled member: one connection plus its pool-management state

use std::fmt;

use tokio::time::Instant;

use crate::eviction::{EvictionPolicy, Freshness};

/// Lifecycle state of a pooled member
///
/// ```text
///            create
///              |
///              v
///   +-----> Leased ---- discard / closed ----> Disposed
///   |          |                                  ^
///   |       release                               |
///   |          v                                  |
///   |        Idle ------- max idle / closed ------+
///   |          |                                  |
///   |   idle past health-check age                |
///   |          v                                  |
///   +--- HealthChecking ---- check failed --------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub enum MemberState {
    Idle,
    Leased,
    HealthChecking,
    Disposed,
}

impl MemberState {
    fn can_become(self, next: MemberState) -> bool {
        use MemberState::*;
        matches!(
            (self, next),
            (Leased, Idle)
                | (Idle, Leased)
                | (Idle, HealthChecking)
                | (HealthChecking, Leased)
                | (Idle, Disposed)
                | (Leased, Disposed)
                | (HealthChecking, Disposed)
        )
    }
}

pub(crate) struct Member<T> {
    id: u64,
    connection: T,
    state: MemberState,
    created_at: Instant,
    idle_since: Instant,
    last_health_check_at: Option<Instant>,
}

impl<T> Member<T> {
    /// Wrap a freshly created connection; new members go straight to a lease
    pub fn new(id: u64, connection: T) -> Self {
        let now = Instant::now();
        Self {
            id,
            connection,
            state: MemberState::Leased,
            created_at: now,
            idle_since: now,
            last_health_check_at: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> MemberState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_health_check_at(&self) -> Option<Instant> {
        self.last_health_check_at
    }

    pub fn connection(&self) -> &T {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut T {
        &mut self.connection
    }

    pub fn freshness(&self, policy: &EvictionPolicy, now: Instant) -> Freshness {
        policy.classify_at(self.idle_since, now)
    }

    pub fn mark_idle(&mut self, now: Instant) {
        self.transition(MemberState::Idle);
        self.idle_since = now;
    }

    pub fn mark_leased(&mut self) {
        self.transition(MemberState::Leased);
    }

    pub fn mark_health_checking(&mut self) {
        self.transition(MemberState::HealthChecking);
    }

    pub fn record_health_check(&mut self, at: Instant) {
        self.last_health_check_at = Some(at);
    }

    /// Hand the connection over for disposal. The member is consumed, so a
    /// disposed member can never be leased again.
    pub fn into_disposed(mut self) -> T {
        self.transition(MemberState::Disposed);
        tracing::debug!(member_id = self.id, "member disposed");
        self.connection
    }

    fn transition(&mut self, next: MemberState) {
        debug_assert!(
            self.state.can_become(next),
            "invalid member transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(member_id = self.id, from = ?self.state, to = ?next, "member transition");
        self.state = next;
    }
}

impl<T> fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("idle_since", &self.idle_since)
            .field("last_health_check_at", &self.last_health_check_at)
            .finish_non_exhaustive()
    }
}
