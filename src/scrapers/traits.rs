use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::Source;
use crate::scrapers::types::RoundStats;

/// Common trait for all source scan loops.
/// One call walks the source's whole `(city, category)` matrix once.
#[async_trait]
pub trait SourceScanner: Send {
    /// Run one scan round. Per-key and per-item failures are logged and
    /// counted, not returned; an `Err` means the round could not run at all.
    async fn scan_round(&mut self, token: &CancellationToken) -> Result<RoundStats>;

    /// The source this scanner feeds
    fn source(&self) -> Source;
}
