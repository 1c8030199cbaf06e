//! Page-numbered list fetching.
//!
//! Current-shape list endpoints answer `{data: [...], meta: {current_page, last_page}}`.
//! Page 1 is fetched first to learn `last_page`; the remaining pages are then
//! requested concurrently (the family throttle bounds actual concurrency).

use futures::future::try_join_all;
use serde::Deserialize;
use std::future::Future;
use teamsync::SyncError;
use tracing::{debug, warn};

/// Items per page requested from list endpoints
pub const PER_PAGE: u32 = 100;

/// Upper bound on pages fetched for one list
const MAX_PAGES: u32 = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub last_page: u32,
}

/// One page of a list endpoint. A missing `meta` means the list has a single page.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

impl<T> Page<T> {
    pub fn last_page(&self) -> u32 {
        self.meta.as_ref().map(|m| m.last_page).unwrap_or(1).max(1)
    }
}

/// Fetches every page of a list and concatenates the items in page order.
///
/// # Arguments
/// * `what` - Name of the list, for logs and errors
/// * `fetch_page` - Fetches one 1-based page
///
/// # Errors
/// Any page failing fails the whole list, as does a list longer than
/// `MAX_PAGES` pages.
pub async fn fetch_all_pages<T, F, Fut>(what: &str, fetch_page: F) -> Result<Vec<T>, SyncError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, SyncError>>,
{
    let first = fetch_page(1).await?;
    let last_page = first.last_page();

    if last_page > MAX_PAGES {
        warn!(list = what, last_page, max_pages = MAX_PAGES, "Page count exceeds limit");
        return Err(SyncError::Fatal(format!(
            "{} reports {} pages, more than the limit of {}",
            what, last_page, MAX_PAGES
        )));
    }

    let mut items = first.data;
    if last_page == 1 {
        debug!(list = what, items = items.len(), "Fetched single-page list");
        return Ok(items);
    }

    let rest = try_join_all((2..=last_page).map(&fetch_page)).await?;
    for page in rest {
        items.extend(page.data);
    }

    debug!(list = what, pages = last_page, items = items.len(), "Fetched paginated list");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn page(data: Vec<u32>, last_page: Option<u32>) -> Page<u32> {
        Page {
            data,
            meta: last_page.map(|last_page| PageMeta {
                current_page: 1,
                last_page,
            }),
        }
    }

    #[tokio::test]
    async fn test_missing_meta_is_single_page() {
        let calls = AtomicU32::new(0);
        let items = fetch_all_pages("numbers", |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(page(vec![n], None)) }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pages_concatenate_in_order() {
        let items = fetch_all_pages("numbers", |n| async move {
            Ok(page(vec![n * 10, n * 10 + 1], Some(3)))
        })
        .await
        .unwrap();

        assert_eq!(items, vec![10, 11, 20, 21, 30, 31]);
    }

    #[tokio::test]
    async fn test_failed_page_fails_list() {
        let result = fetch_all_pages("numbers", |n| async move {
            if n == 2 {
                Err(SyncError::Transient("boom".to_string()))
            } else {
                Ok(page(vec![n], Some(3)))
            }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Transient(_))));
    }

    #[tokio::test]
    async fn test_page_count_over_limit_fails_list() {
        let calls = AtomicU32::new(0);
        let result = fetch_all_pages("numbers", |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(page(vec![n], Some(MAX_PAGES + 1))) }
        })
        .await;

        match result {
            Err(SyncError::Fatal(cause)) => assert!(cause.contains("501 pages"), "cause: {}", cause),
            other => panic!("expected fatal, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_page_decodes_without_meta() {
        let page: Page<serde_json::Value> = serde_json::from_str(r#"{"data":[{"id":1}]}"#).unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.last_page(), 1);
    }
}
