//! Category membership reconciliation.

use crate::error::StoreError;
use crate::models::CategorySet;
use crate::store::StoreSession;

/// Make the stored categories of `paper_id` equal `new_categories`.
///
/// Compares as sets. When they are already equal nothing is written and
/// `false` is returned; otherwise all memberships are replaced within the
/// caller's session and `true` is returned.
pub async fn diff_categories<S>(
    session: &mut S,
    paper_id: &str,
    new_categories: &CategorySet,
) -> Result<bool, StoreError>
where
    S: StoreSession + ?Sized,
{
    let current = session.get_categories(paper_id).await?;
    if &current == new_categories {
        return Ok(false);
    }
    session.replace_categories(paper_id, new_categories).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::PaperStore;

    fn set(labels: &[&str]) -> CategorySet {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn equal_sets_write_nothing() {
        let store = InMemoryStore::new();

        let mut s = store.begin().await.unwrap();
        assert!(diff_categories(&mut s, "p1", &set(&["a", "b"])).await.unwrap());
        s.commit().await.unwrap();
        assert_eq!(store.write_stats().await.category_writes, 1);

        let mut s = store.begin().await.unwrap();
        assert!(!diff_categories(&mut s, "p1", &set(&["b", "a"])).await.unwrap());
        s.commit().await.unwrap();
        assert_eq!(store.write_stats().await.category_writes, 1);
    }

    #[tokio::test]
    async fn changed_set_is_replaced_wholesale() {
        let store = InMemoryStore::new();
        let mut s = store.begin().await.unwrap();
        diff_categories(&mut s, "p1", &set(&["a", "b"])).await.unwrap();
        assert!(diff_categories(&mut s, "p1", &set(&["c"])).await.unwrap());
        s.commit().await.unwrap();
        assert_eq!(store.get_categories("p1").await.unwrap(), set(&["c"]));
    }
}
