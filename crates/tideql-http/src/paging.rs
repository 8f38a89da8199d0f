use log::debug;
use tideql_common::error::{Error, Result};

/// Page-parallel fetcher for paginated reads.
///
/// Page 0 is fetched sequentially; only when it comes back full are later
/// pages fetched, in waves of at most `max_parallel` scoped worker threads.
/// A short or empty page ends the scan, results are concatenated in
/// page-index order (never completion order), and a LIMIT is applied by
/// truncation. Any worker error aborts the whole fetch and discards partial
/// results.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    page_size: usize,
    max_parallel: usize,
}

impl PageFetcher {
    pub fn new(page_size: usize, max_parallel: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn fetch_pages<T, F>(&self, fetch_page: F, limit: Option<usize>) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<Vec<T>> + Sync,
    {
        let mut records = fetch_page(0)?;
        let first_len = records.len();
        if let Some(limit) = limit {
            if records.len() >= limit {
                records.truncate(limit);
                return Ok(records);
            }
        }
        if first_len < self.page_size {
            return Ok(records);
        }

        let fetch_page = &fetch_page;
        let mut next_page = 1usize;
        'scan: loop {
            let wave: Vec<usize> = (next_page..next_page + self.max_parallel).collect();
            next_page += self.max_parallel;
            debug!("fetching pages {:?} in parallel", wave);

            let results: Vec<Result<Vec<T>>> = std::thread::scope(|scope| {
                let workers: Vec<_> = wave
                    .iter()
                    .map(|&page| scope.spawn(move || fetch_page(page)))
                    .collect();
                workers
                    .into_iter()
                    .map(|worker| {
                        worker
                            .join()
                            .unwrap_or_else(|_| Err(Error::adapter("page fetch worker panicked")))
                    })
                    .collect()
            });

            for result in results {
                let page = result?;
                let short = page.len() < self.page_size;
                records.extend(page);
                if let Some(limit) = limit {
                    if records.len() >= limit {
                        break 'scan;
                    }
                }
                if short {
                    break 'scan;
                }
            }
        }

        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}
