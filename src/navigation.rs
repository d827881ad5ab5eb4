//! navigation.rs
//!
//! NavigationController: one navigation request at a time, through
//! Idle -> LocatingUser -> AssessingCrowd -> RoutingInProgress -> RouteActive.
//!
//! - The state lock is never held across a location, crowd or provider await.
//!   Each request carries a ticket; after every await the ticket is checked
//!   again and a result for an abandoned request is dropped (`Cancelled`).
//! - High/critical crowd risk parks the request in AssessingCrowd with the
//!   assessment pending until the user continues, picks an alternative,
//!   declines or cancels.
//! - Any failure puts the controller back in Idle and emits `RouteError`.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::advisor::CrowdAdvisor;
use crate::error::{NavError, Result};
use crate::models::types::{CrowdAssessment, Destination, Position, Route, RouteStep};
use crate::routing::RouteEngine;
use crate::tracking::GeoTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavPhase {
    Idle,
    LocatingUser,
    AssessingCrowd,
    RoutingInProgress,
    RouteActive,
}

/// Lifecycle events for the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub enum NavEvent {
    LocatingStarted,
    PositionUpdated(Position),
    WarningIssued(CrowdAssessment),
    RouteReady { destination_id: String, distance_m: f64, duration_s: f64, steps: Vec<RouteStep> },
    RouteError(NavError),
    RouteCleared,
}

impl NavEvent {
    /// Event name as the presentation layer knows it.
    pub fn name(&self) -> &'static str {
        match self {
            NavEvent::LocatingStarted => "locating-started",
            NavEvent::PositionUpdated(_) => "position-updated",
            NavEvent::WarningIssued(_) => "warning-issued",
            NavEvent::RouteReady { .. } => "route-ready",
            NavEvent::RouteError(_) => "route-error",
            NavEvent::RouteCleared => "route-cleared",
        }
    }
}

/// How a navigation command ended.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NavOutcome {
    RouteReady { route: Route },
    /// Crowd risk is high/critical; waiting for a user decision.
    Warning { assessment: CrowdAssessment },
}

#[derive(Debug)]
enum NavState {
    Idle,
    LocatingUser { ticket: u64 },
    AssessingCrowd { ticket: u64, origin: Position, pending: Option<CrowdAssessment> },
    RoutingInProgress { ticket: u64 },
    RouteActive(Route),
}

impl NavState {
    fn phase(&self) -> NavPhase {
        match self {
            NavState::Idle => NavPhase::Idle,
            NavState::LocatingUser { .. } => NavPhase::LocatingUser,
            NavState::AssessingCrowd { .. } => NavPhase::AssessingCrowd,
            NavState::RoutingInProgress { .. } => NavPhase::RoutingInProgress,
            NavState::RouteActive(_) => NavPhase::RouteActive,
        }
    }

    fn ticket(&self) -> Option<u64> {
        match self {
            NavState::LocatingUser { ticket }
            | NavState::AssessingCrowd { ticket, .. }
            | NavState::RoutingInProgress { ticket } => Some(*ticket),
            NavState::Idle | NavState::RouteActive(_) => None,
        }
    }
}

pub struct NavigationController {
    tracker: Arc<GeoTracker>,
    engine: Arc<RouteEngine>,
    advisor: Arc<CrowdAdvisor>,
    state: Mutex<NavState>,
    tickets: AtomicU64,
    events: broadcast::Sender<NavEvent>,
    following: AtomicBool,
}

impl NavigationController {
    pub fn new(tracker: Arc<GeoTracker>, engine: Arc<RouteEngine>, advisor: Arc<CrowdAdvisor>) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            tracker,
            engine,
            advisor,
            state: Mutex::new(NavState::Idle),
            tickets: AtomicU64::new(0),
            events,
            following: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NavEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> NavPhase {
        self.state.lock().await.phase()
    }

    pub async fn active_route(&self) -> Option<Route> {
        match &*self.state.lock().await {
            NavState::RouteActive(r) => Some(r.clone()),
            _ => None,
        }
    }

    /// Assessment waiting for a continue / alternative / decline decision.
    pub async fn pending_warning(&self) -> Option<CrowdAssessment> {
        match &*self.state.lock().await {
            NavState::AssessingCrowd { pending, .. } => pending.clone(),
            _ => None,
        }
    }

    fn emit(&self, ev: NavEvent) {
        // no subscribers is fine
        let _ = self.events.send(ev);
    }

    // -------------------------------
    // Commands
    // -------------------------------

    /// "navigate to <destination>". An active route is released by a new request.
    pub async fn request_navigation(&self, destination_id: &str) -> Result<NavOutcome> {
        let (ticket, destination) = {
            let mut st = self.state.lock().await;
            if st.ticket().is_some() {
                return Err(NavError::NavigationInProgress);
            }
            let destination = self
                .advisor
                .registry()
                .get(destination_id)
                .cloned()
                .ok_or_else(|| NavError::InvalidDestination(destination_id.to_string()))?;
            if !destination.coordinates.is_valid() {
                return Err(NavError::InvalidDestination(destination.id));
            }
            let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
            if let NavState::RouteActive(old) = &*st {
                info!("releasing route to {} for a new request", old.destination.id);
            }
            *st = NavState::LocatingUser { ticket };
            (ticket, destination)
        };
        info!("navigation #{ticket} to {}", destination.id);

        let origin = match self.tracker.recent_position().await {
            Some(p) => p,
            None => {
                self.emit(NavEvent::LocatingStarted);
                match self.tracker.get_current_position().await {
                    Ok(p) => p,
                    Err(e) => return Err(self.fail(ticket, e).await),
                }
            }
        };

        {
            let mut st = self.state.lock().await;
            if st.ticket() != Some(ticket) {
                debug!("navigation #{ticket} abandoned while locating");
                return Err(NavError::Cancelled);
            }
            *st = NavState::AssessingCrowd { ticket, origin, pending: None };
        }
        self.assess_and_route(ticket, origin, destination).await
    }

    /// "continue anyway": route to the destination that was warned about.
    pub async fn continue_anyway(&self) -> Result<NavOutcome> {
        let (ticket, origin, destination) = {
            let mut st = self.state.lock().await;
            let NavState::AssessingCrowd { ticket, origin, pending: Some(a) } = &*st else {
                return Err(NavError::NoPendingWarning);
            };
            let picked = (*ticket, *origin, a.destination.clone());
            *st = NavState::RoutingInProgress { ticket: picked.0 };
            picked
        };
        info!("navigation #{ticket}: continuing to {} despite crowd warning", destination.id);
        self.route(ticket, origin, destination).await
    }

    /// "choose alternative": the id must be one of the alternatives offered.
    /// The alternative goes through the crowd check again.
    pub async fn choose_alternative(&self, destination_id: &str) -> Result<NavOutcome> {
        let (ticket, origin, destination) = {
            let mut st = self.state.lock().await;
            let NavState::AssessingCrowd { ticket, origin, pending: Some(a) } = &*st else {
                return Err(NavError::NoPendingWarning);
            };
            let Some(alt) = a.alternatives.iter().find(|d| d.id == destination_id).cloned() else {
                return Err(NavError::InvalidDestination(destination_id.to_string()));
            };
            let picked = (*ticket, *origin, alt);
            *st = NavState::AssessingCrowd { ticket: picked.0, origin: picked.1, pending: None };
            picked
        };
        info!("navigation #{ticket}: switching to alternative {}", destination.id);
        self.assess_and_route(ticket, origin, destination).await
    }

    /// Back to Idle without routing.
    pub async fn decline(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        match &*st {
            NavState::AssessingCrowd { ticket, pending: Some(a), .. } => {
                info!("navigation #{ticket}: declined ({} stays crowded)", a.destination.id);
                *st = NavState::Idle;
                Ok(())
            }
            _ => Err(NavError::NoPendingWarning),
        }
    }

    /// Abandons the in-flight request, if any. Its late results are dropped.
    pub async fn cancel(&self) -> bool {
        let mut st = self.state.lock().await;
        let Some(ticket) = st.ticket() else {
            return false;
        };
        info!("navigation #{ticket} cancelled in {:?}", st.phase());
        *st = NavState::Idle;
        drop(st);
        self.emit(NavEvent::RouteError(NavError::Cancelled));
        true
    }

    pub async fn clear_route(&self) -> Result<Route> {
        let mut st = self.state.lock().await;
        match std::mem::replace(&mut *st, NavState::Idle) {
            NavState::RouteActive(r) => {
                drop(st);
                info!("route to {} cleared", r.destination.id);
                self.emit(NavEvent::RouteCleared);
                Ok(r)
            }
            other => {
                *st = other;
                Err(NavError::NoActiveRoute)
            }
        }
    }

    /// "find my location": one fresh fix.
    pub async fn locate(&self) -> Result<Position> {
        self.emit(NavEvent::LocatingStarted);
        let p = self.tracker.get_current_position().await?;
        // when following, the tracking stream already carries it
        if !self.following.load(Ordering::SeqCst) {
            self.emit(NavEvent::PositionUpdated(p));
        }
        Ok(p)
    }

    /// Starts continuous tracking and republishes each reading as
    /// `PositionUpdated`.
    pub fn follow_tracking(&self) -> Result<()> {
        let mut rx = self.tracker.start_tracking()?;
        if self.following.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Ok(p)) => {
                        let _ = events.send(NavEvent::PositionUpdated(p));
                    }
                    Ok(Err(e)) => debug!("tracking update: {e}"),
                    Err(RecvError::Lagged(n)) => debug!("position events lagged by {n}"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    // -------------------------------
    // Request stages
    // -------------------------------

    async fn assess_and_route(&self, ticket: u64, origin: Position, destination: Destination) -> Result<NavOutcome> {
        let assessment = self.advisor.assess(&destination).await;

        {
            let mut st = self.state.lock().await;
            if st.ticket() != Some(ticket) {
                debug!("navigation #{ticket} abandoned while assessing");
                return Err(NavError::Cancelled);
            }
            if assessment.needs_confirmation() {
                warn!(
                    "navigation #{ticket}: {} crowd at {} ({:.2}), {} alternatives",
                    assessment.risk.label(),
                    destination.id,
                    assessment.average_intensity,
                    assessment.alternatives.len()
                );
                *st = NavState::AssessingCrowd { ticket, origin, pending: Some(assessment.clone()) };
                drop(st);
                self.emit(NavEvent::WarningIssued(assessment.clone()));
                return Ok(NavOutcome::Warning { assessment });
            }
            *st = NavState::RoutingInProgress { ticket };
        }
        self.route(ticket, origin, destination).await
    }

    async fn route(&self, ticket: u64, origin: Position, destination: Destination) -> Result<NavOutcome> {
        let result = self.engine.compute_route(&origin, &destination).await;

        let mut st = self.state.lock().await;
        if st.ticket() != Some(ticket) {
            debug!("navigation #{ticket}: late route result discarded");
            return Err(NavError::Cancelled);
        }
        match result {
            Ok(route) => {
                info!(
                    "navigation #{ticket}: route to {} ready, {:.0} m, {} min",
                    destination.id,
                    route.distance_m,
                    route.duration_min()
                );
                *st = NavState::RouteActive(route.clone());
                drop(st);
                self.emit(NavEvent::RouteReady {
                    destination_id: destination.id,
                    distance_m: route.distance_m,
                    duration_s: route.duration_s,
                    steps: route.steps.clone(),
                });
                Ok(NavOutcome::RouteReady { route })
            }
            Err(e) => {
                drop(st);
                Err(self.fail(ticket, e).await)
            }
        }
    }

    /// Back to Idle if `ticket` is still current. Returns the error for the caller.
    async fn fail(&self, ticket: u64, e: NavError) -> NavError {
        let mut st = self.state.lock().await;
        if st.ticket() != Some(ticket) {
            return NavError::Cancelled;
        }
        *st = NavState::Idle;
        drop(st);
        warn!("navigation #{ticket} failed: {e}");
        self.emit(NavEvent::RouteError(e.clone()));
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crowd::CrowdModel;
    use crate::models::types::{AdvisorCfg, Coord, CrowdSample, TrackerCfg};
    use crate::registry::Registry;
    use crate::routing::{ProviderRoute, RoutingProvider};
    use crate::tracking::{FixedLocationSource, PushLocationSource};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::{Notify, RwLock};

    const HOME: Coord = Coord { lat: 23.10, lon: 75.78 };

    /// Straight two-point path; optionally waits on `gate` before answering.
    struct LineProvider {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    #[async_trait]
    impl RoutingProvider for LineProvider {
        async fn walking_route(&self, from: Coord, to: Coord) -> Result<ProviderRoute> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(g) = &self.gate {
                g.notified().await;
            }
            if self.fail {
                return Err(NavError::RoutingUnavailable("down".into()));
            }
            let d = crate::distance::haversine_m(from, to);
            Ok(ProviderRoute {
                geometry: vec![from, to],
                distance_m: d,
                duration_s: d / 1.4,
                steps: vec![RouteStep { instruction: "Head north".into(), distance_m: d }],
            })
        }
    }

    struct Rig {
        nav: NavigationController,
        provider: Arc<LineProvider>,
    }

    fn rig_with(levels: &[(&str, f64)], gate: Option<Arc<Notify>>, fail: bool) -> Rig {
        let d = |id: &str, lat: f64| Destination::new(id, id, Coord { lat, lon: 75.78 }, vec![]).unwrap();
        let registry = Registry::new(vec![d("a", 23.12), d("b", 23.14), d("c", 23.16)]).unwrap();
        let samples = levels
            .iter()
            .map(|(id, x)| CrowdSample::new(registry.get(id).unwrap().coordinates, *x, Utc::now()).unwrap())
            .collect();
        let advisor = CrowdAdvisor::new(
            Arc::new(RwLock::new(CrowdModel::new(samples))),
            Arc::new(registry),
            AdvisorCfg::default(),
        );
        let provider = Arc::new(LineProvider { calls: AtomicUsize::new(0), gate, fail });
        let engine = RouteEngine::new(provider.clone(), Duration::from_secs(15));
        let tracker = GeoTracker::new(Arc::new(FixedLocationSource::new(HOME, 20.0)), TrackerCfg::default());
        let nav = NavigationController::new(Arc::new(tracker), Arc::new(engine), Arc::new(advisor));
        Rig { nav, provider }
    }

    fn rig(levels: &[(&str, f64)]) -> Rig {
        rig_with(levels, None, false)
    }

    fn drain(rx: &mut broadcast::Receiver<NavEvent>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.name());
        }
        out
    }

    #[tokio::test]
    async fn calm_destination_routes_directly() {
        let r = rig(&[("a", 0.2)]);
        let mut rx = r.nav.subscribe();
        let out = r.nav.request_navigation("a").await.unwrap();
        let NavOutcome::RouteReady { route } = out else { panic!("expected a route") };
        assert_eq!(route.destination.id, "a");
        assert_eq!(r.nav.phase().await, NavPhase::RouteActive);
        assert_eq!(r.nav.active_route().await, Some(route));
        assert_eq!(drain(&mut rx), ["locating-started", "route-ready"]);
    }

    #[tokio::test]
    async fn unknown_destination_leaves_controller_idle() {
        let r = rig(&[]);
        assert_eq!(r.nav.request_navigation("zz").await.unwrap_err(), NavError::InvalidDestination("zz".into()));
        assert_eq!(r.nav.phase().await, NavPhase::Idle);
    }

    #[tokio::test]
    async fn warning_then_continue_anyway() {
        let r = rig(&[("a", 0.9)]);
        let mut rx = r.nav.subscribe();
        let NavOutcome::Warning { assessment } = r.nav.request_navigation("a").await.unwrap() else {
            panic!("expected a warning")
        };
        assert_eq!(assessment.alternatives.len(), 2);
        assert_eq!(r.provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(r.nav.phase().await, NavPhase::AssessingCrowd);
        assert!(r.nav.pending_warning().await.is_some());
        // still waiting on the user
        assert_eq!(r.nav.request_navigation("b").await.unwrap_err(), NavError::NavigationInProgress);

        let out = r.nav.continue_anyway().await.unwrap();
        assert!(matches!(out, NavOutcome::RouteReady { ref route } if route.destination.id == "a"));
        assert_eq!(r.provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(drain(&mut rx), ["locating-started", "warning-issued", "route-ready"]);
    }

    #[tokio::test]
    async fn choosing_an_alternative_reassesses_it() {
        let r = rig(&[("a", 0.9), ("b", 0.1)]);
        r.nav.request_navigation("a").await.unwrap();
        assert_eq!(r.nav.choose_alternative("a").await.unwrap_err().kind(), "invalid_destination");
        let out = r.nav.choose_alternative("b").await.unwrap();
        assert!(matches!(out, NavOutcome::RouteReady { ref route } if route.destination.id == "b"));
    }

    #[tokio::test]
    async fn decline_returns_to_idle() {
        let r = rig(&[("a", 0.75)]);
        assert_eq!(r.nav.decline().await.unwrap_err(), NavError::NoPendingWarning);
        assert_eq!(r.nav.continue_anyway().await.unwrap_err(), NavError::NoPendingWarning);
        r.nav.request_navigation("a").await.unwrap();
        r.nav.decline().await.unwrap();
        assert_eq!(r.nav.phase().await, NavPhase::Idle);
        assert_eq!(r.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn routing_failure_goes_back_to_idle() {
        let r = rig_with(&[], None, true);
        let mut rx = r.nav.subscribe();
        assert_eq!(r.nav.request_navigation("a").await.unwrap_err().kind(), "routing_unavailable");
        assert_eq!(r.nav.phase().await, NavPhase::Idle);
        assert!(drain(&mut rx).contains(&"route-error"));
    }

    #[tokio::test]
    async fn clear_route_only_from_route_active() {
        let r = rig(&[]);
        assert_eq!(r.nav.clear_route().await.unwrap_err(), NavError::NoActiveRoute);
        r.nav.request_navigation("b").await.unwrap();
        let cleared = r.nav.clear_route().await.unwrap();
        assert_eq!(cleared.destination.id, "b");
        assert_eq!(r.nav.phase().await, NavPhase::Idle);
        assert!(r.nav.active_route().await.is_none());
        assert!(r.nav.request_navigation("c").await.is_ok());
    }

    #[tokio::test]
    async fn new_request_replaces_active_route() {
        let r = rig(&[]);
        r.nav.request_navigation("a").await.unwrap();
        r.nav.request_navigation("c").await.unwrap();
        assert_eq!(r.nav.active_route().await.map(|r| r.destination.id), Some("c".to_string()));
    }

    #[tokio::test]
    async fn cancelled_request_discards_late_route() {
        let gate = Arc::new(Notify::new());
        let r = Arc::new(rig_with(&[], Some(gate.clone()), false));
        let r2 = r.clone();
        let h = tokio::spawn(async move { r2.nav.request_navigation("a").await });
        while r.nav.phase().await != NavPhase::RoutingInProgress {
            tokio::task::yield_now().await;
        }
        assert!(r.nav.cancel().await);
        assert!(!r.nav.cancel().await);
        gate.notify_one();
        assert_eq!(h.await.unwrap().unwrap_err(), NavError::Cancelled);
        assert_eq!(r.nav.phase().await, NavPhase::Idle);
        assert!(r.nav.active_route().await.is_none());
    }

    #[tokio::test]
    async fn locate_waits_for_pushed_fix() {
        let src = Arc::new(PushLocationSource::default());
        let tracker = Arc::new(GeoTracker::new(src.clone(), TrackerCfg::default()));
        let r = rig(&[]);
        let nav = Arc::new(NavigationController::new(tracker, r.nav.engine.clone(), r.nav.advisor.clone()));
        let mut rx = nav.subscribe();
        let n2 = nav.clone();
        let h = tokio::spawn(async move { n2.locate().await });
        // stamped at push time, so always newer than the request
        let fix = || crate::tracking::RawFix { lat: HOME.lat, lon: HOME.lon, accuracy_m: 12.0, timestamp: Utc::now() };
        while src.push(fix()) == 0 {
            tokio::task::yield_now().await;
        }
        let p = h.await.unwrap().unwrap();
        assert_eq!(p.accuracy_m, 12.0);
        assert_eq!(drain(&mut rx), ["locating-started", "position-updated"]);
    }
}
