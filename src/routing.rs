//! routing.rs
//!
//! RouteEngine: walking directions from an external provider, turned into a
//! `Route`. One provider call per request, no cache, no straight-line
//! fallback: provider failure is reported as `RoutingUnavailable`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::distance::polyline_length_m;
use crate::error::{NavError, Result};
use crate::models::types::{Coord, Destination, Position, Route, RouteStep};

/// Provider answer before it is bound to an origin/destination.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRoute {
    pub geometry: Vec<Coord>,
    pub distance_m: f64,
    pub duration_s: f64,
    pub steps: Vec<RouteStep>,
}

#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn walking_route(&self, from: Coord, to: Coord) -> Result<ProviderRoute>;
}

// -------------------------------
// OSRM
// -------------------------------

/// OSRM HTTP API, `foot` profile.
pub struct OsrmClient {
    http: Client,
    base_url: String,
    profile: String,
}

impl OsrmClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into(), profile: "foot".into() }
    }

    pub fn route_url(&self, from: Coord, to: Coord) -> String {
        format!(
            "{}/route/v1/{}/{:.7},{:.7};{:.7},{:.7}",
            self.base_url.trim_end_matches('/'),
            self.profile,
            from.lon, from.lat, to.lon, to.lat
        )
    }
}

#[async_trait]
impl RoutingProvider for OsrmClient {
    async fn walking_route(&self, from: Coord, to: Coord) -> Result<ProviderRoute> {
        let url = self.route_url(from, to);
        debug!("osrm request {url}");
        let resp = self
            .http
            .get(&url)
            .query(&[("overview", "full"), ("geometries", "geojson"), ("steps", "true")])
            .send()
            .await?;
        let status = resp.status();
        let body: OsrmResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => return Err(NavError::RoutingUnavailable(format!("HTTP {status}"))),
        };
        route_from_osrm(body)
    }
}

#[derive(Debug, Deserialize)]
pub struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
    #[serde(default)]
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>, // (lon, lat)
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    distance: f64,
    #[serde(default)]
    name: String,
    maneuver: OsrmManeuver,
}

#[derive(Debug, Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    modifier: Option<String>,
    #[serde(default)]
    bearing_after: Option<f64>,
}

pub fn route_from_osrm(resp: OsrmResponse) -> Result<ProviderRoute> {
    if resp.code != "Ok" {
        let msg = resp.message.unwrap_or_default();
        return Err(NavError::RoutingUnavailable(format!("{} {}", resp.code, msg).trim().to_string()));
    }
    let Some(r) = resp.routes.into_iter().next() else {
        return Err(NavError::RoutingUnavailable("no route".into()));
    };
    let geometry = r
        .geometry
        .coordinates
        .iter()
        .map(|[lon, lat]| Coord { lat: *lat, lon: *lon })
        .collect();
    let steps = r
        .legs
        .iter()
        .flat_map(|l| l.steps.iter())
        .map(|s| RouteStep { instruction: instruction_text(&s.maneuver, &s.name), distance_m: s.distance })
        .collect();
    Ok(ProviderRoute { geometry, distance_m: r.distance, duration_s: r.duration, steps })
}

fn compass(bearing: f64) -> &'static str {
    const DIRS: [&str; 8] = ["north", "northeast", "east", "southeast", "south", "southwest", "west", "northwest"];
    let i = ((bearing.rem_euclid(360.0) + 22.5) / 45.0).floor() as usize % 8;
    DIRS[i]
}

fn instruction_text(m: &OsrmManeuver, name: &str) -> String {
    let onto = |base: String| if name.is_empty() { base } else { format!("{base} onto {name}") };
    match m.kind.as_str() {
        "depart" => {
            let dir = m.bearing_after.map(compass).unwrap_or("out");
            if name.is_empty() { format!("Head {dir}") } else { format!("Head {dir} on {name}") }
        }
        "arrive" => "You have arrived at your destination".into(),
        "roundabout" | "rotary" => {
            if name.is_empty() { "Enter the roundabout".into() } else { format!("Enter the roundabout and exit onto {name}") }
        }
        _ => match m.modifier.as_deref() {
            Some("uturn") => onto("Make a U-turn".into()),
            Some("straight") | None => {
                if name.is_empty() { "Continue straight".into() } else { format!("Continue on {name}") }
            }
            Some(modifier @ ("left" | "right")) => onto(format!("Turn {modifier}")),
            // "slight left" -> "Slight left"
            Some(modifier) => {
                let mut chars = modifier.chars();
                let cap = chars.next().map(|c| c.to_uppercase().chain(chars).collect()).unwrap_or_default();
                onto(cap)
            }
        },
    }
}

// -------------------------------
// Engine
// -------------------------------
pub struct RouteEngine {
    provider: Arc<dyn RoutingProvider>,
    timeout: Duration,
}

impl RouteEngine {
    pub fn new(provider: Arc<dyn RoutingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub async fn compute_route(&self, origin: &Position, destination: &Destination) -> Result<Route> {
        if !destination.coordinates.is_valid() {
            return Err(NavError::InvalidDestination(destination.id.clone()));
        }
        if !origin.coords.is_valid() {
            return Err(NavError::PositionUnavailable("invalid origin".into()));
        }

        let call = self.provider.walking_route(origin.coords, destination.coordinates);
        let pr = match timeout(self.timeout, call).await {
            Err(_) => return Err(NavError::Timeout("route computation")),
            Ok(r) => r?,
        };

        if pr.geometry.len() < 2 {
            return Err(NavError::RoutingUnavailable("provider returned no path".into()));
        }
        if !pr.distance_m.is_finite() || pr.distance_m < 0.0 || !pr.duration_s.is_finite() || pr.duration_s < 0.0 {
            return Err(NavError::RoutingUnavailable("provider returned invalid totals".into()));
        }
        if pr.steps.iter().any(|s| !s.distance_m.is_finite() || s.distance_m < 0.0) {
            return Err(NavError::RoutingUnavailable("provider returned an invalid step distance".into()));
        }
        if !pr.geometry.iter().all(|c| c.is_valid()) {
            return Err(NavError::RoutingUnavailable("provider returned invalid geometry".into()));
        }

        debug!(
            "route to {}: provider {:.0} m, polyline {:.0} m, {} steps",
            destination.id,
            pr.distance_m,
            polyline_length_m(&pr.geometry),
            pr.steps.len()
        );
        let steps_total: f64 = pr.steps.iter().map(|s| s.distance_m).sum();
        let distance_m = if steps_total > pr.distance_m + 1.0 {
            warn!("route to {}: steps sum {steps_total:.1} m > total {:.1} m", destination.id, pr.distance_m);
            steps_total
        } else {
            pr.distance_m
        };

        Ok(Route {
            origin: *origin,
            destination: destination.clone(),
            polyline: pr.geometry,
            distance_m,
            duration_s: pr.duration_s,
            steps: pr.steps,
        })
    }
}
