//! One database transaction per request.
//!
//! [`transactional`] opens a transaction before the handler runs and hands it
//! over as a [`RequestTx`] extension. After the handler returns, a 2xx response
//! commits; anything else rolls back. A panicking handler rolls back and the
//! panic is re-raised for the outer panic layer to turn into a 500. If the
//! request future is dropped (timeout, disconnect) the transaction is dropped
//! with it and Postgres discards the work.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::{panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, error, info_span, warn, Instrument};

#[derive(thiserror::Error, Debug)]
#[error("request transaction is no longer open")]
pub struct TransactionClosed;

/// Handle to the request's transaction.
#[derive(Clone)]
pub struct RequestTx {
    inner: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

impl RequestTx {
    #[must_use]
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Borrow the transaction's connection for the duration of the guard.
    ///
    /// # Errors
    /// Returns [`TransactionClosed`] once the middleware has finished it.
    pub async fn conn(&self) -> Result<MappedMutexGuard<'_, PgConnection>, TransactionClosed> {
        let guard = self.inner.lock().await;
        MutexGuard::try_map(guard, |slot| slot.as_deref_mut()).map_err(|_| TransactionClosed)
    }

    async fn take(&self) -> Option<Transaction<'static, Postgres>> {
        self.inner.lock().await.take()
    }
}

/// Commit only on success statuses.
#[must_use]
pub fn should_commit(status: StatusCode) -> bool {
    status.is_success()
}

pub async fn transactional(
    State(pool): State<PgPool>,
    mut request: Request,
    next: Next,
) -> Response {
    let span = info_span!("db.begin", db.system = "postgresql", db.operation = "BEGIN");
    let tx = match pool.begin().instrument(span).await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin transaction: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    let handle = RequestTx::new(tx);
    request.extensions_mut().insert(handle.clone());

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => finish(&handle, response).await,
        Err(panic) => {
            if let Some(tx) = handle.take().await {
                if let Err(err) = tx.rollback().await {
                    error!("Rollback after panic failed: {err}");
                }
            }
            warn!("Handler panicked, transaction rolled back");
            std::panic::resume_unwind(panic)
        }
    }
}

async fn finish(handle: &RequestTx, response: Response) -> Response {
    let Some(tx) = handle.take().await else {
        return response;
    };

    if should_commit(response.status()) {
        let span = info_span!("db.commit", db.system = "postgresql", db.operation = "COMMIT");
        if let Err(err) = tx.commit().instrument(span).await {
            error!("Failed to commit transaction: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
        debug!("Transaction committed");
    } else {
        let span = info_span!("db.rollback", db.system = "postgresql", db.operation = "ROLLBACK");
        if let Err(err) = tx.rollback().instrument(span).await {
            error!("Failed to roll back transaction: {err}");
        }
        debug!(status = %response.status(), "Transaction rolled back");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_success_statuses_commit() {
        assert!(should_commit(StatusCode::OK));
        assert!(should_commit(StatusCode::CREATED));
        assert!(should_commit(StatusCode::NO_CONTENT));
        assert!(!should_commit(StatusCode::FOUND));
        assert!(!should_commit(StatusCode::BAD_REQUEST));
        assert!(!should_commit(StatusCode::TOO_MANY_REQUESTS));
        assert!(!should_commit(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
