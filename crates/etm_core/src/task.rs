use std::time::Duration;

use crate::error::{codes, AppError};

/// Run blocking work on the blocking pool, bounded by `limit`.
///
/// An expired limit yields `TIMEOUT`; the blocking thread is left to finish on its own.
pub async fn run_blocking<T, F>(limit: Duration, what: &str, f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(AppError::new(codes::TASK_FAILED, format!("{what} task failed"))
            .with_details(join_err.to_string())),
        Err(_) => Err(AppError::timeout(format!("{what} timed out"))
            .with_details(format!("limit_ms={}", limit.as_millis()))),
    }
}
