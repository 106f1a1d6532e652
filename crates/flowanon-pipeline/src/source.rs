//! Paginated flow record sources

use flowanon_core::FlowRecord;

/// One page from a paginated source
#[derive(Debug, Clone, Default)]
pub struct FlowPage {
    /// Continuation cursor for the next page; `None` when the source is done
    pub cursor: Option<String>,
    /// Total or estimated record count, when the source reports one
    pub total: Option<u64>,
    pub records: Vec<FlowRecord>,
}

impl FlowPage {
    /// Page signalling end of stream
    pub fn end() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A source that yields flow records page by page.
///
/// An empty page ends the stream. Failures, including an expired
/// continuation, are fatal to the run.
#[allow(async_fn_in_trait)]
pub trait FlowSource {
    /// Open the stream and return the first page
    async fn first_page(&mut self) -> anyhow::Result<FlowPage>;

    /// Continue with a cursor from a previous page
    async fn next_page(&mut self, cursor: &str) -> anyhow::Result<FlowPage>;

    /// Release any server-side continuation state
    async fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<S: FlowSource> FlowSource for &mut S {
    async fn first_page(&mut self) -> anyhow::Result<FlowPage> {
        (**self).first_page().await
    }

    async fn next_page(&mut self, cursor: &str) -> anyhow::Result<FlowPage> {
        (**self).next_page(cursor).await
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        (**self).finish().await
    }
}

/// In-memory source serving pre-built pages in order
#[derive(Debug, Default)]
pub struct VecSource {
    pages: std::collections::VecDeque<Vec<FlowRecord>>,
    served: usize,
}

impl VecSource {
    pub fn new(pages: Vec<Vec<FlowRecord>>) -> Self {
        Self {
            pages: pages.into(),
            served: 0,
        }
    }

    fn next(&mut self) -> FlowPage {
        match self.pages.pop_front() {
            Some(records) => {
                self.served += 1;
                FlowPage {
                    cursor: Some(format!("page-{}", self.served)),
                    total: None,
                    records,
                }
            }
            None => FlowPage::end(),
        }
    }
}

impl FlowSource for VecSource {
    async fn first_page(&mut self) -> anyhow::Result<FlowPage> {
        let total = self.pages.iter().map(|p| p.len() as u64).sum();
        let mut page = self.next();
        page.total = Some(total);
        Ok(page)
    }

    async fn next_page(&mut self, _cursor: &str) -> anyhow::Result<FlowPage> {
        Ok(self.next())
    }
}
