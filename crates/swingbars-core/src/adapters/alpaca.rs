use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::{AlpacaCredentials, FetchSettings, DEFAULT_ALPACA_DATA_URL};
use crate::domain::{Bar, CachedRange, Resolution, Series, SeriesKey, UtcDateTime};
use crate::fetcher::{BarFetcher, FetchError, FetchRequest};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::throttling::RequestThrottle;

/// Historical stock bars from the Alpaca market-data v2 API.
///
/// One `fetch` walks every result page of `/v2/stocks/{symbol}/bars` for the
/// requested range. Calls pass through a circuit breaker and a client-side
/// request quota.
#[derive(Clone)]
pub struct AlpacaBarsAdapter {
    http_client: Arc<dyn HttpClient>,
    credentials: AlpacaCredentials,
    base_url: String,
    feed: String,
    page_limit: u32,
    timeout_ms: u64,
    circuit_breaker: Arc<CircuitBreaker>,
    throttle: RequestThrottle,
}

impl AlpacaBarsAdapter {
    /// Adapter over the real network using `settings`.
    pub fn from_config(
        settings: &FetchSettings,
        circuit_breaker: CircuitBreakerConfig,
        credentials: AlpacaCredentials,
    ) -> Self {
        Self {
            http_client: Arc::new(ReqwestHttpClient::new()),
            credentials,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            feed: settings.feed.clone(),
            page_limit: settings.page_limit,
            timeout_ms: settings.timeout_ms,
            circuit_breaker: Arc::new(CircuitBreaker::new(circuit_breaker)),
            throttle: RequestThrottle::per_minute(settings.requests_per_minute),
        }
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>, credentials: AlpacaCredentials) -> Self {
        let settings = FetchSettings::default();
        Self {
            http_client,
            credentials,
            base_url: DEFAULT_ALPACA_DATA_URL.to_owned(),
            feed: settings.feed,
            page_limit: settings.page_limit,
            timeout_ms: settings.timeout_ms,
            circuit_breaker: Arc::new(CircuitBreaker::default()),
            throttle: RequestThrottle::unlimited(),
        }
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn page_request(&self, key: &SeriesKey, range: CachedRange, page_token: Option<&str>) -> HttpRequest {
        let endpoint = format!(
            "{}/v2/stocks/{}/bars",
            self.base_url,
            urlencoding::encode(key.symbol.as_str())
        );

        let mut request = HttpRequest::get(endpoint)
            .with_header("APCA-API-KEY-ID", &self.credentials.api_key)
            .with_header("APCA-API-SECRET-KEY", &self.credentials.secret_key)
            .with_timeout_ms(self.timeout_ms)
            .with_query("timeframe", key.resolution.alpaca_timeframe())
            .with_query("start", range.start().format_rfc3339())
            .with_query("end", upstream_end(key.resolution, range).format_rfc3339())
            .with_query("limit", self.page_limit.to_string())
            .with_query("adjustment", "raw")
            .with_query("feed", &self.feed);
        if let Some(token) = page_token {
            request = request.with_query("page_token", token);
        }
        request
    }

    async fn execute_page(&self, request: HttpRequest) -> Result<AlpacaBarsPage, FetchError> {
        if !self.circuit_breaker.allow_request() {
            return Err(FetchError::transient_network(
                "alpaca circuit breaker is open; skipping upstream call",
            ));
        }
        self.throttle.until_ready().await;

        let response = self.http_client.execute(request).await.map_err(|error| {
            self.circuit_breaker.record_failure();
            FetchError::transient_network(format!("alpaca transport error: {}", error.message()))
        })?;

        if response.status >= 500 {
            self.circuit_breaker.record_failure();
        } else {
            self.circuit_breaker.record_success();
        }
        if !response.is_success() {
            return Err(status_to_error(&response));
        }

        serde_json::from_str(&response.body).map_err(|error| {
            FetchError::transient_network(format!("failed to parse alpaca bars payload: {error}"))
        })
    }
}

impl BarFetcher for AlpacaBarsAdapter {
    fn id(&self) -> &'static str {
        "alpaca"
    }

    fn fetch<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Series, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let FetchRequest { key, range } = request;
            let mut bars = Vec::new();
            let mut page_token: Option<String> = None;
            let mut pages = 0_usize;

            loop {
                let page = self
                    .execute_page(self.page_request(&key, range, page_token.as_deref()))
                    .await?;
                pages += 1;

                for raw in page.bars.unwrap_or_default() {
                    match normalize_bar(raw, key.resolution) {
                        Ok(bar) => bars.push(bar),
                        Err(reason) => warn!(%key, %reason, "skipping malformed alpaca bar"),
                    }
                }

                match page.next_page_token.filter(|token| !token.is_empty()) {
                    Some(next) if page_token.as_deref() != Some(next.as_str()) => {
                        page_token = Some(next);
                    }
                    _ => break,
                }
            }

            debug!(%key, %range, pages, bars = bars.len(), "alpaca bars fetched");
            Ok(Series::from_unordered(&key, bars))
        })
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaBarsPage {
    #[serde(default)]
    bars: Option<Vec<AlpacaBar>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

#[derive(Debug, Deserialize)]
struct AlpacaErrorBody {
    message: Option<String>,
}

/// Inclusive upstream `end` covering the whole last bar period of `range`.
///
/// Alpaca stamps daily bars at local session open (e.g. 05:00Z), so the
/// request has to reach the end of the last day, not its midnight.
fn upstream_end(resolution: Resolution, range: CachedRange) -> UtcDateTime {
    range
        .end()
        .checked_add(resolution.step() - time::Duration::SECOND)
        .unwrap_or(range.end())
}

fn normalize_bar(raw: AlpacaBar, resolution: Resolution) -> Result<Bar, String> {
    let ts = OffsetDateTime::parse(&raw.t, &Rfc3339)
        .map_err(|error| format!("bad timestamp '{}': {error}", raw.t))?
        .to_offset(UtcOffset::UTC);
    let ts = UtcDateTime::from_offset_datetime(ts).map_err(|error| error.to_string())?;
    if !raw.v.is_finite() || raw.v < 0.0 {
        return Err(format!("bad volume {}", raw.v));
    }

    Bar::new(
        resolution.align(ts),
        raw.o,
        raw.h,
        raw.l,
        raw.c,
        raw.v.round() as u64,
    )
    .map_err(|error| error.to_string())
}

fn status_to_error(response: &HttpResponse) -> FetchError {
    let detail = serde_json::from_str::<AlpacaErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| format!("alpaca returned status {}", response.status));

    match response.status {
        429 => FetchError::rate_limited(detail),
        401 | 403 => FetchError::invalid_credentials(detail),
        404 | 422 => FetchError::not_found(detail),
        _ => FetchError::transient_network(detail),
    }
}
