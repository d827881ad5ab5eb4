//! main.rs
//! HTTP service hosting the navigation engine.

use anyhow::{Context, Result};
use reqwest::Client;
use std::{env, str::FromStr, sync::Arc, time::Duration};
use tokio::{
    signal,
    sync::{broadcast::error::RecvError, RwLock},
    time::sleep,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use kumbhnav::advisor::CrowdAdvisor;
use kumbhnav::crowd::{refresh_crowd, CrowdModel, CrowdOrigin, CrowdSource, HttpCrowdSource, SimulatedCrowd};
use kumbhnav::heatmap::HeatMapRenderer;
use kumbhnav::models::types::{AppCfg, RiskThresholds};
use kumbhnav::navigation::{NavEvent, NavigationController};
use kumbhnav::registry::Registry;
use kumbhnav::routing::{OsrmClient, RouteEngine};
use kumbhnav::server::api;
use kumbhnav::tracking::{GeoTracker, PushLocationSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app_cfg = app_cfg_from_env();

    let registry = Arc::new(match &app_cfg.registry_path {
        Some(p) => {
            info!("Loading registry: {p}");
            Registry::from_csv(p)?
        }
        None => Registry::builtin(),
    });
    info!("{} destinations", registry.len());

    // simulated set until the first feed answer
    let crowd = Arc::new(RwLock::new(CrowdModel::default()));
    crowd
        .write()
        .await
        .load_samples_from(SimulatedCrowd.samples(chrono::Utc::now()), CrowdOrigin::Simulated);

    // HTTP client with compression
    let client = Client::builder()
        .brotli(true)
        .gzip(true)
        .deflate(true)
        .timeout(Duration::from_secs(app_cfg.route_timeout_s))
        .build()
        .context("HTTP client")?;

    {
        let source: Arc<dyn CrowdSource> = match &app_cfg.crowd_url {
            Some(url) => Arc::new(HttpCrowdSource::new(client.clone(), url.clone())),
            None => Arc::new(SimulatedCrowd),
        };
        let crowd_c = crowd.clone();
        let cfg_c = app_cfg.clone();
        tokio::spawn(async move { fetch_loop_crowd(source, crowd_c, cfg_c).await });
    }

    // Engine
    let location = Arc::new(PushLocationSource::default());
    let tracker = Arc::new(GeoTracker::new(location.clone(), app_cfg.tracker.clone()));
    let engine = Arc::new(RouteEngine::new(
        Arc::new(OsrmClient::new(client.clone(), app_cfg.osrm_url.clone())),
        Duration::from_secs(app_cfg.route_timeout_s),
    ));
    let advisor = Arc::new(CrowdAdvisor::new(crowd.clone(), registry.clone(), app_cfg.advisor.clone()));
    let nav = Arc::new(NavigationController::new(tracker.clone(), engine, advisor.clone()));

    tokio::spawn(log_events(nav.clone()));
    if let Err(e) = nav.follow_tracking() {
        warn!("location tracking not started: {e}");
    }

    // API
    let app = api::router(api::ApiState {
        nav,
        tracker,
        location,
        advisor,
        registry,
        crowd,
        heat: Arc::new(RwLock::new(HeatMapRenderer::new())),
        hex_res: app_cfg.hex_res,
    });
    info!("Listening on http://{}", app_cfg.bind);
    let listener = tokio::net::TcpListener::bind(&app_cfg.bind)
        .await
        .with_context(|| format!("bind {}", app_cfg.bind))?;
    let serve = axum::serve(listener, app);
    tokio::select! {
        r = serve => { r?; },
        _ = signal::ctrl_c() => { info!("Shutdown signal received"); }
    }

    Ok(())
}

/// Parsed value of `name`, or `default` (with a warning) when it does not parse.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            warn!("{name}={v:?} is not valid, keeping default");
            default
        }),
        Err(_) => default,
    }
}

fn app_cfg_from_env() -> AppCfg {
    let mut c = AppCfg::default();
    if let Ok(v) = env::var("BIND") { c.bind = v; }
    if let Ok(v) = env::var("OSRM_URL") { c.osrm_url = v; }
    c.crowd_url = env::var("CROWD_URL").ok().filter(|v| !v.trim().is_empty());
    c.registry_path = env::var("REGISTRY_PATH").ok().filter(|v| !v.trim().is_empty());
    c.t_crowd_s = env_or("T_CROWD_S", c.t_crowd_s).max(1);
    c.route_timeout_s = env_or("ROUTE_TIMEOUT_S", c.route_timeout_s).max(1);
    c.tracker.fix_timeout = Duration::from_secs(env_or("FIX_TIMEOUT_S", c.tracker.fix_timeout.as_secs()).max(1));
    c.tracker.low_confidence_m = env_or("LOW_CONFIDENCE_M", c.tracker.low_confidence_m);
    c.tracker.max_fix_age = Duration::from_secs(env_or("MAX_FIX_AGE_S", c.tracker.max_fix_age.as_secs()));
    c.hex_res = env_or("HEX_RES", c.hex_res);
    if c.hex_res > 15 {
        warn!("HEX_RES={} out of range, keeping default", c.hex_res);
        c.hex_res = AppCfg::default().hex_res;
    }

    let radius = env_or("CROWD_RADIUS_M", c.advisor.radius_m);
    if radius.is_finite() && radius > 0.0 {
        c.advisor.radius_m = radius;
    } else {
        warn!("CROWD_RADIUS_M={radius} out of range, keeping default");
    }
    let thr = RiskThresholds {
        medium: env_or("RISK_MEDIUM", c.advisor.thresholds.medium),
        high: env_or("RISK_HIGH", c.advisor.thresholds.high),
        critical: env_or("RISK_CRITICAL", c.advisor.thresholds.critical),
    };
    if !thr.is_monotonic() {
        warn!("risk thresholds {thr:?} are not increasing within [0,1], using defaults");
    }
    c.advisor.thresholds = thr.validated();
    c
}

async fn fetch_loop_crowd(source: Arc<dyn CrowdSource>, crowd: Arc<RwLock<CrowdModel>>, cfg: AppCfg) {
    loop {
        let outcome = refresh_crowd(&crowd, source.as_ref()).await;
        debug!("crowd refresh: {outcome:?}");
        sleep(Duration::from_secs(cfg.t_crowd_s)).await;
    }
}

async fn log_events(nav: Arc<NavigationController>) {
    let mut rx = nav.subscribe();
    loop {
        match rx.recv().await {
            Ok(NavEvent::PositionUpdated(p)) => {
                debug!("position-updated {:.6},{:.6} ±{:.0} m", p.coords.lat, p.coords.lon, p.accuracy_m)
            }
            Ok(NavEvent::WarningIssued(a)) => info!(
                "warning-issued {} risk={} avg={:.2} alternatives={}",
                a.destination.id,
                a.risk.label(),
                a.average_intensity,
                a.alternatives.len()
            ),
            Ok(NavEvent::RouteReady { destination_id, distance_m, duration_s, steps }) => info!(
                "route-ready {destination_id} {distance_m:.0} m {:.0} min {} steps",
                duration_s / 60.0,
                steps.len()
            ),
            Ok(NavEvent::RouteError(e)) => info!("route-error {}: {e}", e.kind()),
            Ok(ev) => info!("{}", ev.name()),
            Err(RecvError::Lagged(n)) => warn!("event log skipped {n} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
