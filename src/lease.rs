//! Leased connections and pending checkouts

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::errors::{PoolError, PoolResult};
use crate::member::Member;
use crate::pool::PoolInner;

/// A connection leased from the pool
///
/// Dereferences to the connection. The lease goes back to the pool when
/// [`release`](Lease::release)d or dropped; call [`discard`](Lease::discard)
/// instead if the connection is broken.
pub struct Lease<T: Send + 'static> {
    member: Option<Member<T>>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Lease<T> {
    pub(crate) fn new(member: Member<T>, pool: Arc<PoolInner<T>>) -> Self {
        Self {
            member: Some(member),
            pool,
        }
    }

    fn member(&self) -> &Member<T> {
        self.member.as_ref().expect("member already returned")
    }

    /// Pool-assigned identifier of the underlying connection
    pub fn id(&self) -> u64 {
        self.member().id()
    }

    /// When the underlying connection was opened
    pub fn created_at(&self) -> Instant {
        self.member().created_at()
    }

    /// When the connection last passed through a health check, if ever
    pub fn last_health_check_at(&self) -> Option<Instant> {
        self.member().last_health_check_at()
    }

    /// Return the connection to the pool
    pub fn release(mut self) {
        if let Some(member) = self.member.take() {
            self.pool.checkin(member);
        }
    }

    /// Dispose of a broken connection instead of returning it
    ///
    /// Frees its slot so a waiting checkout can get a replacement.
    pub fn discard(mut self) {
        if let Some(member) = self.member.take() {
            self.pool.discard(member);
        }
    }
}

impl<T: Send + 'static> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.member().connection()
    }
}

impl<T: Send + 'static> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.member
            .as_mut()
            .expect("member already returned")
            .connection_mut()
    }
}

impl<T: Send + 'static> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(member) = self.member.take() {
            self.pool.checkin(member);
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => f
                .debug_struct("Lease")
                .field("id", &member.id())
                .field("state", &member.state())
                .finish(),
            None => f.write_str("Lease(returned)"),
        }
    }
}

/// A pending request for a [`Lease`]
///
/// Resolves once the pool leases a connection to this request. Dropping a
/// `Checkout` abandons the request; the pool skips it when a connection
/// frees up.
#[must_use = "dropping a Checkout abandons the request"]
pub struct Checkout<T: Send + 'static> {
    state: CheckoutState<T>,
}

enum CheckoutState<T: Send + 'static> {
    Failed(Option<PoolError>),
    Waiting(oneshot::Receiver<PoolResult<Lease<T>>>),
}

impl<T: Send + 'static> Checkout<T> {
    pub(crate) fn pending(rx: oneshot::Receiver<PoolResult<Lease<T>>>) -> Self {
        Self {
            state: CheckoutState::Waiting(rx),
        }
    }

    pub(crate) fn failed(error: PoolError) -> Self {
        Self {
            state: CheckoutState::Failed(Some(error)),
        }
    }

    /// Whether the checkout failed before being queued
    pub fn is_rejected(&self) -> bool {
        matches!(self.state, CheckoutState::Failed(_))
    }
}

impl<T: Send + 'static> Future for Checkout<T> {
    type Output = PoolResult<Lease<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CheckoutState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(PoolError::PoolClosed)))
            }
            // The sender is gone only if the pool was dropped mid-checkout
            CheckoutState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(PoolError::Cancelled))),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Checkout<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("rejected", &self.is_rejected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionPool, PoolConfiguration, TokioScheduler};

    fn pool() -> ConnectionPool<Vec<u8>> {
        let scheduler = Arc::new(TokioScheduler::current().unwrap());
        ConnectionPool::new(
            || async { Ok::<_, std::io::Error>(vec![1u8]) },
            PoolConfiguration::new()
                .with_max_pool_size(1)
                .with_scheduler(scheduler),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lease_derefs_to_connection() {
        let pool = pool();
        let mut lease = pool.member().await.unwrap();

        lease.push(2);
        assert_eq!(*lease, vec![1, 2]);
        assert_eq!(lease.id(), 1);
        assert!(lease.last_health_check_at().is_none());
    }

    #[tokio::test]
    async fn test_drop_returns_lease() {
        let pool = pool();
        {
            let _lease = pool.member().await.unwrap();
            assert_eq!(pool.leased_count(), 1);
        }
        assert_eq!(pool.leased_count(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_mutations_survive_release() {
        let pool = pool();
        let mut lease = pool.member().await.unwrap();
        lease.push(9);
        lease.release();

        let lease = pool.member().await.unwrap();
        assert_eq!(*lease, vec![1, 9]);
    }

    #[tokio::test]
    async fn test_closed_checkout_is_rejected_up_front() {
        let pool = pool();
        pool.close();

        let checkout = pool.member();
        assert!(checkout.is_rejected());
        assert!(matches!(checkout.await, Err(PoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_debug_output() {
        let pool = pool();
        let lease = pool.member().await.unwrap();
        assert_eq!(format!("{:?}", lease), "Lease { id: 1, state: Leased }");
    }
}
