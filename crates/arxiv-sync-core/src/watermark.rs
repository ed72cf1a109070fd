//! Where the next incremental harvest starts.

use chrono::{Duration, NaiveDate};

use crate::error::StoreError;
use crate::store::PaperStore;

/// Default overlap subtracted from the newest stored date.
///
/// The feed's datestamps have day granularity and a day can be published
/// in several batches, so the newest day is always re-read.
pub const DEFAULT_OVERLAP_DAYS: i64 = 1;

/// `max(update_date) - overlap`, or `None` for an empty store.
///
/// Re-reading the overlap is harmless: those records reconcile as skips.
pub async fn next_sync_from<S>(store: &S, overlap: Duration) -> Result<Option<NaiveDate>, StoreError>
where
    S: PaperStore + ?Sized,
{
    let newest = store.max_update_date().await?;
    Ok(newest.map(|date| date.checked_sub_signed(overlap).unwrap_or(NaiveDate::MIN)))
}
