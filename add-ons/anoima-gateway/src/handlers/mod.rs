use crate::auth::ApiError;
use crate::AppState;
use anoima_core::{Anoima, AnoimaResult};
use std::sync::Arc;

pub(crate) mod bookmarks;
pub(crate) mod maintenance;
pub(crate) mod persons;

/// Runs a core call on tokio's blocking pool. Sled reads and writes block the calling thread.
pub(crate) async fn blocking<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    F: FnOnce(&Anoima) -> AnoimaResult<T> + Send + 'static,
    T: Send + 'static,
{
    let core = Arc::clone(&state.core);
    match tokio::task::spawn_blocking(move || call(&core)).await {
        Ok(result) => Ok(result?),
        Err(e) => Err(ApiError::Internal(format!("core task failed: {}", e))),
    }
}
