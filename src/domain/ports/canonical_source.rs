use async_trait::async_trait;

use crate::domain::errors::SourceError;
use crate::domain::models::CanonicalSample;

/// Supplier of fresh samples to the stabilization retry driver.
///
/// `fetch_canonical` hits the platform's authoritative endpoint. When that
/// keeps failing, `degraded_sample` may offer a lower-fidelity snapshot (for
/// example one scraped from the page) carrying its own readiness judgment.
#[async_trait]
pub trait CanonicalSampleSource: Send + Sync {
    async fn fetch_canonical(&self, attempt_id: &str) -> Result<Option<CanonicalSample>, SourceError>;

    async fn degraded_sample(&self, _attempt_id: &str) -> Option<CanonicalSample> {
        None
    }
}
