//! tracking.rs
//!
//! GeoTracker: continuous position updates plus a one-shot "fresh fix".
//!
//! - `start_tracking` turns the source's raw readings into `Position`s and
//!   broadcasts them (errors included). Nothing is retried.
//! - `get_current_position` never answers from cache: the reading must be
//!   taken after the call started, within `fix_timeout`.
//! - Readings above `low_confidence_m` are still emitted, tagged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{NavError, Result};
use crate::models::types::{Coord, Position, TrackerCfg};

/// Reading as delivered by a platform, before validation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

pub type Reading = std::result::Result<RawFix, NavError>;
pub type TrackingUpdate = std::result::Result<Position, NavError>;

/// Platform location capability.
#[async_trait]
pub trait LocationSource: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    /// Continuous readings.
    fn watch(&self) -> broadcast::Receiver<Reading>;

    /// Next reading taken after this call. Never a cached one.
    async fn fresh_fix(&self) -> Reading;
}

// -------------------------------
// Sources
// -------------------------------

/// Readings pushed by the client device (the browser geolocation API lives
/// on the phone, the engine only sees what it forwards).
pub struct PushLocationSource {
    tx: broadcast::Sender<Reading>,
    available: bool,
}

impl Default for PushLocationSource {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PushLocationSource {
    pub fn new(available: bool) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx, available }
    }

    /// Returns how many listeners saw the reading.
    pub fn push(&self, fix: RawFix) -> usize {
        self.tx.send(Ok(fix)).unwrap_or(0)
    }

    pub fn push_error(&self, err: NavError) -> usize {
        self.tx.send(Err(err)).unwrap_or(0)
    }
}

#[async_trait]
impl LocationSource for PushLocationSource {
    fn is_available(&self) -> bool {
        self.available
    }

    fn watch(&self) -> broadcast::Receiver<Reading> {
        self.tx.subscribe()
    }

    async fn fresh_fix(&self) -> Reading {
        let mut rx = self.tx.subscribe();
        loop {
            match rx.recv().await {
                Ok(r) => return r,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => {
                    return Err(NavError::PositionUnavailable("location source closed".into()))
                }
            }
        }
    }
}

/// Always reports the same spot, freshly stamped. Demos and tests.
pub struct FixedLocationSource {
    pub coords: Coord,
    pub accuracy_m: f64,
}

impl FixedLocationSource {
    pub fn new(coords: Coord, accuracy_m: f64) -> Self {
        Self { coords, accuracy_m }
    }

    fn fix(&self) -> RawFix {
        RawFix { lat: self.coords.lat, lon: self.coords.lon, accuracy_m: self.accuracy_m, timestamp: Utc::now() }
    }
}

#[async_trait]
impl LocationSource for FixedLocationSource {
    fn watch(&self) -> broadcast::Receiver<Reading> {
        let (tx, rx) = broadcast::channel(1);
        let _ = tx.send(Ok(self.fix()));
        rx
    }

    async fn fresh_fix(&self) -> Reading {
        Ok(self.fix())
    }
}

// -------------------------------
// Tracker
// -------------------------------
pub struct GeoTracker {
    source: Arc<dyn LocationSource>,
    cfg: TrackerCfg,
    last: RwLock<Option<Position>>,
    updates: broadcast::Sender<TrackingUpdate>,
    tracking: AtomicBool,
}

impl GeoTracker {
    pub fn new(source: Arc<dyn LocationSource>, cfg: TrackerCfg) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self { source, cfg, last: RwLock::new(None), updates, tracking: AtomicBool::new(false) }
    }

    pub fn position_from(&self, fix: RawFix) -> Result<Position> {
        let coords = Coord::new(fix.lat, fix.lon)
            .map_err(|_| NavError::PositionUnavailable(format!("invalid reading {},{}", fix.lat, fix.lon)))?;
        if !fix.accuracy_m.is_finite() || fix.accuracy_m < 0.0 {
            return Err(NavError::PositionUnavailable(format!("invalid accuracy {}", fix.accuracy_m)));
        }
        Ok(Position {
            coords,
            accuracy_m: fix.accuracy_m,
            timestamp: fix.timestamp,
            low_confidence: fix.accuracy_m > self.cfg.low_confidence_m,
        })
    }

    /// Most recent accepted position, if any.
    pub async fn last_position(&self) -> Option<Position> {
        *self.last.read().await
    }

    /// Last position, unless it is older than `max_fix_age`.
    pub async fn recent_position(&self) -> Option<Position> {
        let p = self.last_position().await?;
        let age = (Utc::now() - p.timestamp).to_std().unwrap_or_default();
        (age <= self.cfg.max_fix_age).then_some(p)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingUpdate> {
        self.updates.subscribe()
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    /// Starts the watch (once) and returns a stream of updates.
    pub fn start_tracking(self: &Arc<Self>) -> Result<broadcast::Receiver<TrackingUpdate>> {
        if !self.source.is_available() {
            return Err(NavError::LocationUnavailable);
        }
        let out = self.updates.subscribe();
        if self.tracking.swap(true, Ordering::SeqCst) {
            return Ok(out);
        }

        let mut raw = self.source.watch();
        let me = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match raw.recv().await {
                    Ok(Ok(fix)) => match me.position_from(fix) {
                        Ok(p) => me.publish(p).await,
                        Err(e) => {
                            warn!("location watch: {e}");
                            let _ = me.updates.send(Err(e));
                        }
                    },
                    Ok(Err(e)) => {
                        warn!("location watch: {e}");
                        let _ = me.updates.send(Err(e));
                    }
                    Err(RecvError::Lagged(n)) => debug!("location watch skipped {n} readings"),
                    Err(RecvError::Closed) => break,
                }
            }
            me.tracking.store(false, Ordering::SeqCst);
            info!("location watch ended");
        });
        Ok(out)
    }

    /// One-shot fresh fix.
    pub async fn get_current_position(&self) -> Result<Position> {
        let requested_at = Utc::now();
        let fix = match timeout(self.cfg.fix_timeout, self.source.fresh_fix()).await {
            Err(_) => return Err(NavError::Timeout("location fix")),
            Ok(r) => r?,
        };
        if fix.timestamp < requested_at {
            return Err(NavError::PositionUnavailable("stale fix".into()));
        }
        let p = self.position_from(fix)?;
        self.publish(p).await;
        Ok(p)
    }

    async fn publish(&self, p: Position) {
        *self.last.write().await = Some(p);
        let _ = self.updates.send(Ok(p));
    }
}
