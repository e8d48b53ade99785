pub mod morizon;
pub mod nieruch;
pub mod olx;
pub mod otodom;
pub mod runner;
pub mod traits;
pub mod types;

use reqwest::header::HeaderMap;

use crate::http::header_map;
use crate::models::Source;

pub use morizon::MorizonScanner;
pub use nieruch::NieruchScanner;
pub use olx::OlxScanner;
pub use otodom::OtodomScanner;
pub use runner::run_scanner;
pub use traits::SourceScanner;
pub use types::{Pipeline, PoliteDelay, RoundStats};

/// Browser-like header set a source expects; liveness probes reuse it.
pub fn headers_for(source: Source) -> HeaderMap {
    header_map(match source {
        Source::Olx => olx::HEADERS,
        Source::Otodom => otodom::HEADERS,
        Source::Morizon => morizon::HEADERS,
        Source::Nieruch => nieruch::HEADERS,
    })
}

/// Boxed scanner for `source`, ready for [`run_scanner`].
pub fn scanner_for(source: Source, pipeline: Pipeline) -> Box<dyn SourceScanner> {
    match source {
        Source::Olx => Box::new(OlxScanner::new(pipeline)),
        Source::Otodom => Box::new(OtodomScanner::new(pipeline)),
        Source::Morizon => Box::new(MorizonScanner::new(pipeline)),
        Source::Nieruch => Box::new(NieruchScanner::new(pipeline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_source_has_headers() {
        for source in Source::ALL {
            assert!(!headers_for(source).is_empty(), "{source}");
        }
        assert_eq!(headers_for(Source::Olx)["x-client"], "DESKTOP");
        assert_eq!(headers_for(Source::Nieruch)["accept-language"], "pl,ru;q=0.9,en;q=0.8");
    }
}
