//! Primary/secondary provider chain.

use std::sync::Arc;

use async_trait::async_trait;
use b3_core::{DailyPriceProvider, DataProvider, FetchMeta, FetchRequest, Result, empty_frame};
use polars::prelude::DataFrame;
use tracing::{debug, info, instrument, warn};

/// Provider that falls back to a secondary source.
///
/// The primary is asked first. Its result is returned when it has rows;
/// otherwise (no rows or an error) the secondary is asked. When the
/// secondary also fails, the primary's error is returned if there was one,
/// and an empty table otherwise.
///
/// On success `meta.provider` names the provider that served the rows.
/// HTTP counters in `meta.http` accumulate across both providers.
pub struct CompositeProvider {
    primary: Arc<dyn DailyPriceProvider>,
    secondary: Arc<dyn DailyPriceProvider>,
    name: String,
}

impl std::fmt::Debug for CompositeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeProvider")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .finish()
    }
}

impl CompositeProvider {
    /// Chain `primary` with a `secondary` fallback.
    pub fn new(
        primary: Arc<dyn DailyPriceProvider>,
        secondary: Arc<dyn DailyPriceProvider>,
    ) -> Self {
        let name = format!("{}+{}", primary.name(), secondary.name());
        Self {
            primary,
            secondary,
            name,
        }
    }

    /// brapi.dev backed by Yahoo Finance, both with default settings.
    ///
    /// # Errors
    /// Returns an error if either HTTP client cannot be built.
    #[cfg(all(feature = "brapi", feature = "yahoo"))]
    pub fn brapi_then_yahoo() -> Result<Self> {
        Ok(Self::new(
            Arc::new(b3_brapi::BrapiProvider::new()?),
            Arc::new(b3_yahoo::YahooProvider::new()?),
        ))
    }

    /// The provider asked first.
    #[must_use]
    pub fn primary(&self) -> &Arc<dyn DailyPriceProvider> {
        &self.primary
    }

    /// The fallback provider.
    #[must_use]
    pub fn secondary(&self) -> &Arc<dyn DailyPriceProvider> {
        &self.secondary
    }
}

impl DataProvider for CompositeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Primary provider with a secondary fallback"
    }
}

#[async_trait]
impl DailyPriceProvider for CompositeProvider {
    #[instrument(skip(self, request, meta), fields(symbol = %request.symbol))]
    async fn fetch_daily(
        &self,
        request: &FetchRequest,
        meta: &mut FetchMeta,
    ) -> Result<DataFrame> {
        let primary_error = match self.primary.fetch_daily(request, meta).await {
            Ok(frame) if frame.height() > 0 => {
                meta.provider = Some(self.primary.name().to_string());
                debug!(provider = self.primary.name(), rows = frame.height(), "Primary served");
                return Ok(frame);
            }
            Ok(_) => {
                info!(provider = self.primary.name(), "Primary returned no rows, trying fallback");
                None
            }
            Err(e) => {
                warn!(
                    provider = self.primary.name(),
                    error = %e,
                    "Primary failed, trying fallback"
                );
                Some(e)
            }
        };

        match self.secondary.fetch_daily(request, meta).await {
            Ok(frame) => {
                meta.provider = Some(self.secondary.name().to_string());
                debug!(provider = self.secondary.name(), rows = frame.height(), "Fallback served");
                Ok(frame)
            }
            Err(e) => {
                warn!(provider = self.secondary.name(), error = %e, "Fallback failed");
                match primary_error {
                    Some(primary) => Err(primary),
                    None => Ok(empty_frame()),
                }
            }
        }
    }
}
