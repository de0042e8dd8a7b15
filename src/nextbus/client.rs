use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::debug;

use super::error::FetchError;
use super::urls::{next_update_url, vehicle_locations_url};
use super::RawObservation;
use crate::fetch::{HttpClient, fetch_response};
use crate::parser::parse_locations;

/// Result of one successful incremental fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpdate {
    /// Local wall-clock time at which the response arrived.
    pub received_at: DateTime<Utc>,
    /// The feed's own `lastTime`, kept for diagnostics only.
    pub last_time: Option<String>,
    pub vehicles: Vec<RawObservation>,
}

/// Source of incremental vehicle-location updates for a route.
#[async_trait]
pub trait VehicleFeed: Send + Sync {
    /// Fetches everything reported for `route_tag` since `since`
    /// (`None` requests the initial snapshot).
    async fn fetch(
        &self,
        since: Option<DateTime<Utc>>,
        route_tag: &str,
    ) -> Result<FeedUpdate, FetchError>;
}

/// [`VehicleFeed`] backed by the public JSON feed over HTTP.
pub struct NextbusClient<C> {
    http: C,
    update_url: Url,
}

impl<C: HttpClient> NextbusClient<C> {
    /// `feed_url` is the bare feed endpoint; the vehicle-locations command
    /// and agency are filled in here.
    pub fn new(http: C, feed_url: &Url, agency: &str) -> Self {
        Self {
            http,
            update_url: vehicle_locations_url(feed_url, agency),
        }
    }

    pub fn update_url(&self) -> &Url {
        &self.update_url
    }
}

#[async_trait]
impl<C: HttpClient> VehicleFeed for NextbusClient<C> {
    async fn fetch(
        &self,
        since: Option<DateTime<Utc>>,
        route_tag: &str,
    ) -> Result<FeedUpdate, FetchError> {
        let url = next_update_url(&self.update_url, since, route_tag);
        debug!(%url, "Requesting vehicle locations");

        let response = fetch_response(&self.http, url)
            .await
            .map_err(FetchError::from_transport)?;

        // Taken as soon as the response arrives so a broken body still reports it.
        let received_at = Utc::now();

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Body { source, received_at })?;

        let locations =
            parse_locations(&bytes).map_err(|source| FetchError::Decode { source, received_at })?;

        Ok(FeedUpdate {
            received_at,
            last_time: locations.last_time.map(|last| last.time),
            vehicles: locations.vehicles,
        })
    }
}
