//! source.rs
//!
//! Crowd data sources: the reporting backend feed and the built-in simulated
//! dataset. Both hand `CrowdSample`s to the model the same way.
//!
//! A failed or empty fetch swaps in the simulated dataset instead of leaving
//! navigation without crowd data.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::crowd::model::{CrowdModel, CrowdOrigin};
use crate::models::types::{Coord, CrowdSample};
use crate::registry::Registry;
use crate::server::fetch::{get_with_cache, CacheCtl};

#[async_trait]
pub trait CrowdSource: Send + Sync {
    /// `Ok(None)`: nothing changed since the last fetch.
    async fn fetch(&self) -> Result<Option<Vec<CrowdSample>>>;

    /// Forget any cache validators so the next fetch returns a full body.
    async fn reset(&self) {}
}

/// Wire shape of one feed record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrowdRecord {
    pub lat: f64,
    pub lon: f64,
    pub intensity: f64,
    #[serde(default)]
    pub sampled_at: Option<DateTime<Utc>>,
}

/// Decodes a JSON array of records, skipping invalid ones.
pub fn parse_crowd_json(raw: &[u8]) -> Result<Vec<CrowdSample>> {
    let records: Vec<CrowdRecord> = serde_json::from_slice(raw).context("crowd feed JSON")?;
    let now = Utc::now();
    let total = records.len();
    let out: Vec<CrowdSample> = records
        .into_iter()
        .filter_map(|r| {
            let coords = Coord::new(r.lat, r.lon).ok()?;
            CrowdSample::new(coords, r.intensity, r.sampled_at.unwrap_or(now)).ok()
        })
        .collect();
    if out.len() < total {
        warn!("crowd feed: skipped {} invalid records of {}", total - out.len(), total);
    }
    Ok(out)
}

// -------------------------------
// Reporting backend
// -------------------------------
pub struct HttpCrowdSource {
    http: Client,
    url: String,
    cache: Mutex<CacheCtl>,
}

impl HttpCrowdSource {
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self { http, url: url.into(), cache: Mutex::new(CacheCtl::default()) }
    }
}

#[async_trait]
impl CrowdSource for HttpCrowdSource {
    async fn fetch(&self) -> Result<Option<Vec<CrowdSample>>> {
        // validators are copied out; no lock across the request
        let mut cache = self.cache.lock().await.clone();
        let body = get_with_cache(&self.http, &self.url, &mut cache).await?;
        *self.cache.lock().await = cache;
        match body {
            Some(bytes) => Ok(Some(parse_crowd_json(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn reset(&self) {
        self.cache.lock().await.clear();
    }
}

// -------------------------------
// Simulated dataset
// -------------------------------

/// Sample cluster per registry place: (id, level, dlat, dlon).
///
/// The venue sectors sit 56-122 m apart, so a radius query at one place also
/// reaches its neighbours' clusters. Offsets and levels are laid out so the
/// mean within the default 100 m reads very high at the confluence, high at
/// the entrance and bathing sectors, medium commercial/parking and low at
/// accommodation and services. Every cluster point stays more than 10 m away
/// from any place's 100 m boundary.
const SIMULATED_LEVELS: &[(&str, f64, f64, f64)] = &[
    ("triveni-ghat", 0.95, 0.00035, 0.00010),
    ("sector1", 0.55, 0.00038, 0.00041),
    ("sector2", 0.78, 0.0, 0.0),
    ("sector3", 0.55, -0.00018, 0.00034),
    ("sector4", 0.15, -0.00047, -0.00029),
    ("sector5", 0.46, -0.00022, 0.00042),
    ("sector6", 0.15, -0.00019, -0.00021),
    ("mahakaleshwar", 0.20, 0.0, 0.0),
    ("ram-ghat", 0.35, 0.0, 0.0),
    ("harsiddhi", 0.30, 0.0, 0.0),
    ("kal-bhairav", 0.25, 0.0, 0.0),
];

/// Offsets (deg lat, deg lon, intensity delta) inside a cluster, ~4 m apart.
/// Deltas sum to zero so the cluster mean is its level.
const JITTER: [(f64, f64, f64); 5] = [
    (0.0, 0.0, 0.0),
    (0.00004, 0.0, 0.03),
    (-0.00004, 0.0, -0.03),
    (0.0, 0.00004, 0.02),
    (0.0, -0.00004, -0.02),
];

#[derive(Clone, Debug, Default)]
pub struct SimulatedCrowd;

impl SimulatedCrowd {
    pub fn samples(&self, at: DateTime<Utc>) -> Vec<CrowdSample> {
        let registry = Registry::builtin_ref();
        let mut out = Vec::with_capacity(SIMULATED_LEVELS.len() * JITTER.len());
        for (id, level, clat, clon) in SIMULATED_LEVELS {
            let Some(d) = registry.get(id) else { continue };
            for (dlat, dlon, di) in JITTER {
                let coordinates = Coord {
                    lat: d.coordinates.lat + clat + dlat,
                    lon: d.coordinates.lon + clon + dlon,
                };
                out.push(CrowdSample { coordinates, intensity: (level + di).clamp(0.0, 1.0), sampled_at: at });
            }
        }
        out
    }
}

#[async_trait]
impl CrowdSource for SimulatedCrowd {
    async fn fetch(&self) -> Result<Option<Vec<CrowdSample>>> {
        Ok(Some(self.samples(Utc::now())))
    }
}

// -------------------------------
// Refresh
// -------------------------------
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated(usize),
    Unchanged,
    Simulated(usize),
}

pub async fn refresh_crowd(model: &RwLock<CrowdModel>, source: &dyn CrowdSource) -> RefreshOutcome {
    let reason = match source.fetch().await {
        Ok(Some(samples)) if !samples.is_empty() => {
            let n = samples.len();
            model.write().await.load_samples_from(samples, CrowdOrigin::Live);
            info!("crowd refresh OK: {n} samples");
            return RefreshOutcome::Updated(n);
        }
        Ok(None) => {
            debug!("crowd feed not modified");
            return RefreshOutcome::Unchanged;
        }
        Ok(Some(_)) => "empty feed".to_string(),
        Err(e) => format!("{e:#}"),
    };

    warn!("crowd refresh failed ({reason}), using simulated dataset");
    // validators belong to the live body we are discarding
    source.reset().await;
    let samples = SimulatedCrowd.samples(Utc::now());
    let n = samples.len();
    model.write().await.load_samples_from(samples, CrowdOrigin::Simulated);
    RefreshOutcome::Simulated(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        answers: std::sync::Mutex<Vec<Result<Option<Vec<CrowdSample>>>>>,
        resets: AtomicUsize,
    }

    impl Scripted {
        fn new(mut answers: Vec<Result<Option<Vec<CrowdSample>>>>) -> Self {
            answers.reverse();
            Self { answers: std::sync::Mutex::new(answers), resets: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl CrowdSource for Scripted {
        async fn fetch(&self) -> Result<Option<Vec<CrowdSample>>> {
            self.answers.lock().unwrap().pop().unwrap_or(Ok(None))
        }
        async fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn one_sample() -> Vec<CrowdSample> {
        vec![CrowdSample::new(Coord { lat: 23.13, lon: 75.79 }, 0.5, Utc::now()).unwrap()]
    }

    #[test]
    fn feed_parsing_skips_invalid_records() {
        let raw = br#"[
            {"lat": 23.13, "lon": 75.79, "intensity": 0.4},
            {"lat": 23.13, "lon": 75.79, "intensity": 1.4},
            {"lat": 123.0, "lon": 75.79, "intensity": 0.4},
            {"lat": 23.14, "lon": 75.80, "intensity": 1.0, "sampled_at": "2026-01-14T06:00:00Z"}
        ]"#;
        let s = parse_crowd_json(raw).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s[1].sampled_at.to_rfc3339(), "2026-01-14T06:00:00+00:00");
        assert!(parse_crowd_json(b"{not json").is_err());
    }

    #[test]
    fn simulated_dataset_is_in_range() {
        let s = SimulatedCrowd.samples(Utc::now());
        assert_eq!(s.len(), SIMULATED_LEVELS.len() * JITTER.len());
        assert!(s.iter().all(|x| (0.0..=1.0).contains(&x.intensity)));
    }

    #[test]
    fn simulated_levels_hold_at_the_default_radius() {
        use crate::advisor::assess_with;
        use crate::models::types::{AdvisorCfg, RiskLevel};

        let m = CrowdModel::new(SimulatedCrowd.samples(Utc::now()));
        let reg = Registry::builtin();
        let cfg = AdvisorCfg::default();
        let expected = [
            ("triveni-ghat", RiskLevel::Critical),
            ("sector1", RiskLevel::High),
            ("sector2", RiskLevel::High),
            ("sector3", RiskLevel::Medium),
            ("sector5", RiskLevel::Medium),
            ("sector4", RiskLevel::Low),
            ("sector6", RiskLevel::Low),
            ("mahakaleshwar", RiskLevel::Low),
            ("ram-ghat", RiskLevel::Low),
            ("harsiddhi", RiskLevel::Low),
            ("kal-bhairav", RiskLevel::Low),
        ];
        for (id, risk) in expected {
            let a = assess_with(&m, &reg, &cfg, reg.get(id).unwrap());
            assert_eq!(a.risk, risk, "{id} at {:.3}", a.average_intensity);
            assert!(a.alternatives.iter().all(|d| d.id != "triveni-ghat"), "{id} offers the ghat");
        }
        let ghat = assess_with(&m, &reg, &cfg, reg.get("triveni-ghat").unwrap());
        assert!(!ghat.alternatives.is_empty());
    }

    #[tokio::test]
    async fn live_then_unchanged_then_failure_falls_back() {
        let model = RwLock::new(CrowdModel::default());
        let src = Scripted::new(vec![
            Ok(Some(one_sample())),
            Ok(None),
            Err(anyhow::anyhow!("connection refused")),
        ]);

        assert_eq!(refresh_crowd(&model, &src).await, RefreshOutcome::Updated(1));
        assert_eq!(model.read().await.origin(), CrowdOrigin::Live);

        assert_eq!(refresh_crowd(&model, &src).await, RefreshOutcome::Unchanged);
        assert_eq!(model.read().await.len(), 1);

        let out = refresh_crowd(&model, &src).await;
        assert!(matches!(out, RefreshOutcome::Simulated(n) if n > 1));
        assert_eq!(model.read().await.origin(), CrowdOrigin::Simulated);
        assert_eq!(src.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_source_does_not_block_reset_while_fetching() {
        use axum::extract::State;
        use axum::http::{header, HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::{routing::get, Router};
        use std::sync::Arc;
        use std::time::Duration;
        use tokio::sync::Notify;

        async fn feed(State(gate): State<Arc<Notify>>, headers: HeaderMap) -> Response {
            if headers.get(header::IF_NONE_MATCH).is_some_and(|v| v.as_bytes() == b"\"v1\"") {
                return StatusCode::NOT_MODIFIED.into_response();
            }
            gate.notified().await;
            ([(header::ETAG, "\"v1\"")], r#"[{"lat": 23.13, "lon": 75.79, "intensity": 0.6}]"#).into_response()
        }

        let gate = Arc::new(Notify::new());
        let app = Router::new().route("/crowd", get(feed)).with_state(gate.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let src = Arc::new(HttpCrowdSource::new(Client::new(), format!("http://{addr}/crowd")));
        let pending = {
            let src = src.clone();
            tokio::spawn(async move { src.fetch().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_secs(1), src.reset())
            .await
            .expect("reset waited on the in-flight request");

        gate.notify_one();
        let got = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(got.len(), 1);
        // validators written back after the body: next poll is a 304
        assert!(src.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_feed_falls_back() {
        let model = RwLock::new(CrowdModel::default());
        let src = Scripted::new(vec![Ok(Some(Vec::new()))]);
        assert!(matches!(refresh_crowd(&model, &src).await, RefreshOutcome::Simulated(_)));
        assert!(!model.read().await.is_empty());
    }
}
