//! Retry-once-with-refresh combinator for authenticated requests.
//!
//! A request that fails with `RemoteError::Authentication` gets exactly one
//! credential refresh followed by exactly one retry. Everything else passes
//! through untouched.

use crate::client::RemoteError;
use std::future::Future;
use tracing::debug;

/// Run `op`, refreshing credentials and retrying once on an authentication
/// failure.
///
/// A failed refresh is returned as-is; the second attempt's result is final.
pub async fn retry_once_after_refresh<T, Op, OpFut, Refresh, RefreshFut>(
    mut op: Op,
    refresh: Refresh,
) -> Result<T, RemoteError>
where
    Op: FnMut() -> OpFut,
    OpFut: Future<Output = Result<T, RemoteError>>,
    Refresh: FnOnce() -> RefreshFut,
    RefreshFut: Future<Output = Result<(), RemoteError>>,
{
    match op().await {
        Err(RemoteError::Authentication(reason)) => {
            debug!("Request rejected ({}), refreshing credentials", reason);
            refresh().await?;
            op().await
        }
        other => other,
    }
}
