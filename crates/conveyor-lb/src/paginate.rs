//! Bounded pagination over marker-continued list calls.
//!
//! A continuation marker means "more data" only while it is non-empty.
//! A page with no items but a marker earns exactly one more fetch; a
//! second empty page in a row ends the scan. `max_pages` caps the walk.

use conveyor_core::PaginationConfig;
use tracing::{debug, warn};

use crate::api::{Page, PageRequest};
use crate::error::{LbError, LbResult};

/// Walk pages until `visit` returns `Some`, the pages run out, or the
/// page limit is hit.
pub fn scan<T, R, F, V>(what: &str, config: &PaginationConfig, mut fetch: F, mut visit: V) -> LbResult<Option<R>>
where
    F: FnMut(&PageRequest) -> LbResult<Page<T>>,
    V: FnMut(Vec<T>) -> Option<R>,
{
    let mut marker: Option<String> = None;
    let mut previous_empty = false;
    let mut pages = 0;

    loop {
        if pages >= config.max_pages {
            return Err(LbError::PaginationLimit {
                what: what.to_string(),
                pages,
            });
        }
        let request = PageRequest {
            marker: marker.take(),
            page_size: config.page_size,
        };
        let page = fetch(&request)?;
        pages += 1;

        let empty = page.items.is_empty();
        debug!(%what, page = pages, items = page.items.len(), "page fetched");
        if let Some(found) = visit(page.items) {
            return Ok(Some(found));
        }

        let Some(next) = page.next_marker.filter(|m| !m.is_empty()) else {
            return Ok(None);
        };
        if empty && previous_empty {
            warn!(%what, pages, "two empty pages with a continuation marker, stopping");
            return Ok(None);
        }
        previous_empty = empty;
        marker = Some(next);
    }
}

/// Collect every item across all pages.
pub fn paginate<T, F>(what: &str, config: &PaginationConfig, fetch: F) -> LbResult<Vec<T>>
where
    F: FnMut(&PageRequest) -> LbResult<Page<T>>,
{
    let mut all = Vec::new();
    scan(what, config, fetch, |items| {
        all.extend(items);
        None::<()>
    })?;
    Ok(all)
}
