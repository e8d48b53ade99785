use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::scrapers::traits::SourceScanner;
use crate::scrapers::types::sleep_or_cancel;

/// Drive `scanner` round after round until `token` is cancelled.
///
/// A failed round is logged and followed by the usual pause; nothing a round
/// does can end the loop.
pub async fn run_scanner<S: SourceScanner + ?Sized>(
    scanner: &mut S,
    pause: Duration,
    token: CancellationToken,
) {
    let source = scanner.source();
    info!(target: "scrapers", %source, "scan loop started");

    while !token.is_cancelled() {
        match scanner.scan_round(&token).await {
            Ok(stats) => info!(
                target: "scrapers",
                %source,
                found = stats.found,
                added = stats.added,
                failed_keys = stats.failed_keys,
                "round finished"
            ),
            Err(e) => error!(target: "scrapers", %source, error = %format!("{e:#}"), "round failed"),
        }

        if !sleep_or_cancel(pause, &token).await {
            break;
        }
    }

    info!(target: "scrapers", %source, "scan loop stopped");
}
