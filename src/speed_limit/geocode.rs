use super::RoadInfo;
use crate::types::Coordinate;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Reverse lookup errors
#[derive(Debug, Clone)]
pub enum GeocodeError {
    NetworkTimeout,
    HttpError(u16),
    RateLimited,
    ParseError(String),
    NoData,
    UnknownError(String),
}

impl Display for GeocodeError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            GeocodeError::NetworkTimeout => write!(f, "Network timeout"),
            GeocodeError::HttpError(code) => write!(f, "HTTP error: {}", code),
            GeocodeError::RateLimited => write!(f, "Rate limited by geocoder"),
            GeocodeError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            GeocodeError::NoData => write!(f, "No data returned"),
            GeocodeError::UnknownError(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for GeocodeError {}

/// Coordinate to road context
pub trait ReverseGeocoder: Send + Sync {
    fn reverse(&self, coordinate: Coordinate) -> BoxFuture<'_, Result<RoadInfo, GeocodeError>>;
}

/// Nominatim reverse-geocoding client
///
/// # Rate Limiting
/// - Minimum 1 second between requests (Nominatim usage policy)
/// - HTTP 429 is reported as `RateLimited`, never retried inline
///
/// The caller bounds the whole call with its own timeout; the client timeout
/// only guards against a hung connection.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("drive_telemetry/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        NominatimGeocoder {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            min_interval: Duration::from_secs(1),
            last_request: Mutex::new(None),
        }
    }

    fn build_url(&self, coordinate: &Coordinate) -> String {
        format!(
            "{}/reverse?format=jsonv2&lat={:.6}&lon={:.6}&zoom=17&addressdetails=1",
            self.base_url, coordinate.latitude, coordinate.longitude
        )
    }

    /// Respect rate limit by sleeping if needed
    async fn respect_rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn fetch(&self, coordinate: Coordinate) -> Result<RoadInfo, GeocodeError> {
        self.respect_rate_limit().await;

        let response = self
            .client
            .get(self.build_url(&coordinate))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeocodeError::NetworkTimeout
                } else {
                    GeocodeError::UnknownError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == 429 {
            return Err(GeocodeError::RateLimited);
        } else if !status.is_success() {
            return Err(GeocodeError::HttpError(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GeocodeError::UnknownError(format!("Failed to read response: {}", e)))?;

        parse_nominatim(&body)
    }
}

impl ReverseGeocoder for NominatimGeocoder {
    fn reverse(&self, coordinate: Coordinate) -> BoxFuture<'_, Result<RoadInfo, GeocodeError>> {
        self.fetch(coordinate).boxed()
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: HashMap<String, String>,
}

/// Address keys that name a feature rather than a road or area
const FEATURE_KEYS: [&str; 5] = ["amenity", "leisure", "building", "tourism", "school"];

/// Parse a Nominatim `format=jsonv2` reverse response
pub fn parse_nominatim(body: &str) -> Result<RoadInfo, GeocodeError> {
    let response: NominatimResponse =
        serde_json::from_str(body).map_err(|e| GeocodeError::ParseError(e.to_string()))?;

    if response.error.is_some() {
        return Err(GeocodeError::NoData);
    }

    let on_road = response.category.as_deref() == Some("highway");
    let road_name = response
        .address
        .get("road")
        .cloned()
        .or_else(|| if on_road { response.name.clone() } else { None });
    let road_type = if on_road { response.kind.clone() } else { None };

    let place_name = if on_road {
        None
    } else {
        response.name.clone().filter(|n| !n.is_empty())
    }
    .or_else(|| FEATURE_KEYS.iter().find_map(|k| response.address.get(*k).cloned()));

    let locality = ["city", "town", "village", "suburb"]
        .iter()
        .find_map(|k| response.address.get(*k).cloned());

    let info = RoadInfo {
        road_name,
        road_type,
        place_name,
        locality,
        admin_area: response.address.get("state").cloned(),
    };

    if info == RoadInfo::default() {
        return Err(GeocodeError::NoData);
    }
    Ok(info)
}
