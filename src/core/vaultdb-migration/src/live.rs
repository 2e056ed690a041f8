//! Hook for the application's open handle on the live database.

use async_trait::async_trait;
use sqlx::SqlitePool;

/// Something holding the live database open.
///
/// The manager quiesces it right before the live file set is renamed away.
/// Reopening afterwards is the caller's job.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    /// Closes every connection and waits for them to be released.
    async fn quiesce(&self);
}

#[async_trait]
impl LiveConnection for SqlitePool {
    async fn quiesce(&self) {
        self.close().await;
    }
}
