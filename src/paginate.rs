//! Walks a cursor-linked remote collection into a single list.
//!
//! The walk is an explicit loop: each page either carries a cursor to the
//! next page or ends the crawl.  A transport or decode failure stops the
//! crawl and hands back everything collected up to that point together
//! with the error, so the caller can decide whether partial data is good
//! enough.

use log::{info, warn};

use crate::error::{Error, Result};
use crate::rate_limiter::Pacer;

/// One page of a remote collection.
#[derive(Debug, Clone)]
pub struct Page<T, C> {
    pub items: Vec<T>,
    /// Cursor for the following page, `None` on the last page.
    pub next: Option<C>,
    /// Total number of pages, when the service reports it.
    pub total_pages: Option<u32>,
}

/// A paginated remote collection.
pub trait PageSource {
    type Item;
    type Cursor;

    /// Short label for progress logging.
    fn label(&self) -> &str;

    fn fetch_page(&mut self, cursor: &Self::Cursor) -> Result<Page<Self::Item, Self::Cursor>>;
}

/// Progress reported after each successfully fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlProgress {
    /// 1-based index of the page just processed.
    pub page: u32,
    pub total_pages: Option<u32>,
    pub items_so_far: usize,
    pub is_last: bool,
}

/// Result of a crawl: all items in server order, plus the error that cut
/// it short, if any.
#[derive(Debug)]
pub struct Crawl<T> {
    pub items: Vec<T>,
    pub pages: u32,
    pub error: Option<Error>,
}

impl<T> Crawl<T> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Turn a partial crawl into an error, for callers that need everything.
    pub fn into_complete(self) -> Result<Vec<T>> {
        match self.error {
            None => Ok(self.items),
            Some(err) => Err(err),
        }
    }
}

/// Fetch every page starting at `start`.
///
/// `pacer.wait()` runs before each request, so the pacing delay sits
/// between successive pages and never after the last one.  `on_page` sees
/// the progress and the full list accumulated so far.
pub fn fetch_all<S, F>(
    source: &mut S,
    start: S::Cursor,
    pacer: &mut dyn Pacer,
    mut on_page: F,
) -> Crawl<S::Item>
where
    S: PageSource,
    F: FnMut(&CrawlProgress, &[S::Item]),
{
    let mut items = Vec::new();
    let mut page_index: u32 = 0;
    let mut cursor = start;

    loop {
        pacer.wait();
        let page = match source.fetch_page(&cursor) {
            Ok(page) => {
                pacer.report_success();
                page
            }
            Err(err) => {
                if err.is_rate_limited() {
                    pacer.report_failure();
                }
                warn!(
                    "{}: crawl aborted after {} pages ({} items): {}",
                    source.label(),
                    page_index,
                    items.len(),
                    err
                );
                return Crawl {
                    items,
                    pages: page_index,
                    error: Some(err),
                };
            }
        };

        page_index += 1;
        items.extend(page.items);

        let progress = CrawlProgress {
            page: page_index,
            total_pages: page.total_pages,
            items_so_far: items.len(),
            is_last: page.next.is_none(),
        };
        match progress.total_pages {
            Some(total) => info!(
                "{}: processed page {}/{} ({} items so far)",
                source.label(),
                page_index,
                total,
                items.len()
            ),
            None => info!(
                "{}: processed page {} ({} items so far)",
                source.label(),
                page_index,
                items.len()
            ),
        }
        on_page(&progress, &items);

        match page.next {
            Some(next) => cursor = next,
            None => break,
        }
    }

    Crawl {
        items,
        pages: page_index,
        error: None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    /// Pacer that counts calls instead of sleeping.
    #[derive(Default)]
    pub(crate) struct CountingPacer {
        pub waits: usize,
        pub pauses: Vec<(Duration, String)>,
        pub failures: usize,
    }

    impl Pacer for CountingPacer {
        fn wait(&mut self) {
            self.waits += 1;
        }

        fn pause(&mut self, duration: Duration, reason: &str) {
            self.pauses.push((duration, reason.to_string()));
        }

        fn report_failure(&mut self) {
            self.failures += 1;
        }
    }

    /// Numbered pages of integers; fails on `fail_at` if set.
    struct NumberPages {
        pages: Vec<Vec<u32>>,
        fail_at: Option<usize>,
        requested: Vec<usize>,
    }

    impl PageSource for NumberPages {
        type Item = u32;
        type Cursor = usize;

        fn label(&self) -> &str {
            "numbers"
        }

        fn fetch_page(&mut self, cursor: &usize) -> Result<Page<u32, usize>> {
            self.requested.push(*cursor);
            if self.fail_at == Some(*cursor) {
                return Err(Error::api("numbers", "malformed page"));
            }
            let next = if cursor + 1 < self.pages.len() {
                Some(cursor + 1)
            } else {
                None
            };
            Ok(Page {
                items: self.pages[*cursor].clone(),
                next,
                total_pages: Some(self.pages.len() as u32),
            })
        }
    }

    #[test]
    fn test_concatenates_pages_in_order() {
        let mut source = NumberPages {
            pages: vec![vec![1, 2], vec![3], vec![4, 5, 6]],
            fail_at: None,
            requested: Vec::new(),
        };
        let mut pacer = CountingPacer::default();
        let mut seen = Vec::new();

        let crawl = fetch_all(&mut source, 0, &mut pacer, |progress, items| {
            seen.push((*progress, items.len()));
        });

        assert!(crawl.is_complete());
        assert_eq!(crawl.items, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(crawl.pages, 3);
        assert_eq!(source.requested, vec![0, 1, 2]);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0.page, 1);
        assert_eq!(seen[1].0.items_so_far, 3);
        assert!(!seen[1].0.is_last);
        assert!(seen[2].0.is_last);
        assert_eq!(seen[2].1, 6);
    }

    #[test]
    fn test_one_wait_per_request() {
        let mut source = NumberPages {
            pages: vec![vec![1], vec![2], vec![3], vec![4]],
            fail_at: None,
            requested: Vec::new(),
        };
        let mut pacer = CountingPacer::default();
        fetch_all(&mut source, 0, &mut pacer, |_, _| {});
        // Nothing is requested after the final page, so nothing waits for it.
        assert_eq!(pacer.waits, 4);
        assert_eq!(source.requested.len(), 4);
    }

    #[test]
    fn test_failure_returns_partial_items() {
        let mut source = NumberPages {
            pages: vec![vec![1, 2], vec![3], vec![4]],
            fail_at: Some(2),
            requested: Vec::new(),
        };
        let mut pacer = CountingPacer::default();
        let crawl = fetch_all(&mut source, 0, &mut pacer, |_, _| {});

        assert!(!crawl.is_complete());
        assert_eq!(crawl.items, vec![1, 2, 3]);
        assert_eq!(crawl.pages, 2);
        assert!(crawl.into_complete().is_err());
    }

    #[test]
    fn test_single_terminal_page() {
        let mut source = NumberPages {
            pages: vec![vec![]],
            fail_at: None,
            requested: Vec::new(),
        };
        let mut pacer = CountingPacer::default();
        let crawl = fetch_all(&mut source, 0, &mut pacer, |_, _| {});
        assert!(crawl.items.is_empty());
        assert_eq!(crawl.pages, 1);
        assert!(crawl.is_complete());
    }
}
