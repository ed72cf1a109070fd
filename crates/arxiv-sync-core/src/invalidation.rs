//! Embedding invalidation on accepted revisions.
//!
//! An embedding is derived from one specific document. When a newer
//! revision replaces that document the embedding is cleared in the same
//! session, and the embedding pass later picks the paper up through
//! [`find_missing_embeddings`](crate::store::PaperStore::find_missing_embeddings).
//! Whether the text actually changed is not inspected.

use crate::error::StoreError;
use crate::models::Outcome;
use crate::store::StoreSession;

/// Clear the embedding of `paper_id` if `outcome` is [`Outcome::Updated`].
///
/// Returns whether an invalidation was written. Inserted papers have no
/// embedding yet, and skipped revisions must not touch derived state.
pub async fn invalidate_embedding<S>(
    session: &mut S,
    paper_id: &str,
    outcome: Outcome,
) -> Result<bool, StoreError>
where
    S: StoreSession + ?Sized,
{
    match outcome {
        Outcome::Updated => {
            session.clear_embedding(paper_id).await?;
            Ok(true)
        }
        Outcome::Inserted | Outcome::Skipped => Ok(false),
    }
}
