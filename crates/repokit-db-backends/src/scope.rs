//! Scoped sessions.

use std::future::Future;
use std::sync::Arc;

use repokit_core::RepoResult;
use repokit_db::Session;

use crate::session::SqliteSession;
use crate::sqlite::SqliteDatabase;

/// Runs `f` with a fresh session, committing when it returns `Ok` and
/// rolling back when it returns `Err`.
///
/// # Examples
///
/// ```ignore
/// use repokit_db_backends::{session_scope, SqliteDatabase};
///
/// let db = SqliteDatabase::memory()?;
/// let created = session_scope(&db, |session| async move {
///     let sections = Repository::<Section>::new(&*session)?;
///     sections.create(fields! { "title" => "Intro" }).await
/// })
/// .await?;
/// ```
pub async fn session_scope<F, Fut, T>(db: &SqliteDatabase, f: F) -> RepoResult<T>
where
    F: FnOnce(Arc<SqliteSession>) -> Fut,
    Fut: Future<Output = RepoResult<T>>,
{
    let session = Arc::new(db.session());

    match f(Arc::clone(&session)).await {
        Ok(result) => {
            session.commit().await?;
            Ok(result)
        }
        Err(e) => {
            // The original error wins over a failed rollback.
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback after failed scope also failed");
            }
            Err(e)
        }
    }
}
