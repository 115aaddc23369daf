//! Connection lifecycle seams: creation and disposal
//!
//! The pool never opens or closes a connection itself. A [`ConnectionFactory`]
//! produces new connections and a [`Disposer`] tears them down once the pool
//! evicts them. Plain closures implement both traits.

use std::future::Future;

use async_trait::async_trait;

use crate::errors::BoxError;

/// Produces new connections on demand
///
/// # Examples
///
/// ```
/// use esox_connpool::ConnectionFactory;
///
/// # async fn demo() {
/// let factory = || async { Ok::<_, std::io::Error>(String::from("conn")) };
/// let conn = ConnectionFactory::<String>::create(&factory).await.unwrap();
/// assert_eq!(conn, "conn");
/// # }
/// ```
#[async_trait]
pub trait ConnectionFactory<T>: Send + Sync + 'static {
    /// Open a new connection
    async fn create(&self) -> Result<T, BoxError>;
}

#[async_trait]
impl<T, F, Fut, E> ConnectionFactory<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send,
    E: Into<BoxError>,
{
    async fn create(&self) -> Result<T, BoxError> {
        (self)().await.map_err(Into::into)
    }
}

/// Releases the handles held by an evicted connection
///
/// Disposal is best-effort: errors are logged and swallowed by the pool.
#[async_trait]
pub trait Disposer<T>: Send + Sync + 'static {
    async fn dispose(&self, conn: T) -> Result<(), BoxError>;
}

#[async_trait]
impl<T, F> Disposer<T> for F
where
    T: Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    async fn dispose(&self, conn: T) -> Result<(), BoxError> {
        (self)(conn);
        Ok(())
    }
}

/// Default disposer: drops the connection and lets its `Drop` close it
pub(crate) fn close_silently<T>(conn: T) {
    drop(conn);
}
