use async_trait::async_trait;
use b3_core::{
    DailyPriceProvider, DataProvider, FetchMeta, FetchRequest, OhlcvBar, RangeToken, Result,
    Symbol, bars_to_frame, choose_range, retain_days,
};
use b3_http::{HttpClient, HttpConfig};
use polars::prelude::DataFrame;
use tracing::{debug, info, instrument};

use crate::normalize::normalize_bars;

/// Default brapi API host.
pub const BRAPI_BASE_URL: &str = "https://brapi.dev";

/// brapi.dev daily OHLCV provider.
///
/// Implements [`DataProvider`] and [`DailyPriceProvider`].
#[derive(Debug, Clone)]
pub struct BrapiProvider {
    http: HttpClient,
    base_url: String,
}

impl BrapiProvider {
    /// Create a provider with the default HTTP settings.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_config(HttpConfig::default())
    }

    /// Create a provider with custom retry settings.
    ///
    /// # Errors
    /// Returns [`b3_core::DataError::InvalidConfiguration`] if `config` is invalid.
    pub fn with_config(config: HttpConfig) -> Result<Self> {
        Ok(Self::with_client(HttpClient::new(config)?))
    }

    /// Create a provider that sends requests through `http`.
    #[must_use]
    pub fn with_client(http: HttpClient) -> Self {
        Self {
            http: http.with_provider("brapi"),
            base_url: BRAPI_BASE_URL.to_string(),
        }
    }

    /// Point the provider at another host (a mirror or a test server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the quote URL for a symbol and range token.
    #[must_use]
    pub fn quote_url(&self, symbol: &Symbol, range: RangeToken) -> String {
        format!(
            "{}/api/quote/{}?interval=1d&range={}",
            self.base_url,
            symbol.as_str(),
            range
        )
    }

    async fn fetch_window(
        &self,
        request: &FetchRequest,
        range: RangeToken,
        meta: &mut FetchMeta,
    ) -> Result<Vec<OhlcvBar>> {
        let url = self.quote_url(&request.symbol, range);
        debug!(%url, "Fetching quote");

        let payload = self
            .http
            .get_json(&url, request.throttle_hook(), Some(&mut meta.http))
            .await?;
        let mut bars = normalize_bars(&request.symbol, &payload)?;
        let normalized = bars.len();
        retain_days(&mut bars, Some(request.start), Some(request.end));
        debug!(%range, normalized, in_window = bars.len(), "Normalized quote");

        Ok(bars)
    }
}

impl DataProvider for BrapiProvider {
    fn name(&self) -> &str {
        "brapi"
    }

    fn description(&self) -> &str {
        "brapi.dev quote API for B3 daily OHLCV"
    }
}

#[async_trait]
impl DailyPriceProvider for BrapiProvider {
    #[instrument(skip(self, request, meta), fields(symbol = %request.symbol, start = %request.start, end = %request.end))]
    async fn fetch_daily(
        &self,
        request: &FetchRequest,
        meta: &mut FetchMeta,
    ) -> Result<DataFrame> {
        request.validate()?;

        let mut range = if request.prefer_max {
            RangeToken::Max
        } else {
            choose_range(request.start, request.end)
        };

        let mut bars = self.fetch_window(request, range, meta).await?;
        if bars.is_empty() && range != RangeToken::Max {
            info!(%range, "No rows inside window; retrying with range=max");
            range = RangeToken::Max;
            bars = self.fetch_window(request, range, meta).await?;
        }

        meta.range_used = Some(range);
        bars_to_frame(&bars)
    }
}
