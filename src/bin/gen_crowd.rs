//! gen_crowd.rs
//! Writes the simulated crowd set in the feed format (JSON array of
//! `{lat, lon, intensity, sampled_at}`) and the built-in registry as CSV, so a
//! static file server can stand in for the reporting backend.
//!
//! Usage: gen_crowd [out_dir]   (default: data)

use anyhow::Context;
use chrono::Utc;
use std::{env, fs, path::PathBuf};

use kumbhnav::crowd::source::{CrowdRecord, SimulatedCrowd};
use kumbhnav::registry::Registry;

fn main() -> anyhow::Result<()> {
    let dir = PathBuf::from(env::args().nth(1).unwrap_or_else(|| "data".into()));
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

    let now = Utc::now();
    let records: Vec<CrowdRecord> = SimulatedCrowd
        .samples(now)
        .into_iter()
        .map(|s| CrowdRecord {
            lat: s.coordinates.lat,
            lon: s.coordinates.lon,
            intensity: (s.intensity * 100.0).round() / 100.0,
            sampled_at: Some(s.sampled_at),
        })
        .collect();
    let crowd_path = dir.join("crowd_samples.json");
    fs::write(&crowd_path, serde_json::to_vec_pretty(&records)?)
        .with_context(|| format!("write {}", crowd_path.display()))?;
    println!("OK -> {} ({} samples)", crowd_path.display(), records.len());

    let reg_path = dir.join("registry.csv");
    let mut w = csv::Writer::from_path(&reg_path).with_context(|| format!("write {}", reg_path.display()))?;
    w.write_record(["id", "name", "lat", "lon", "tags"])?;
    for d in Registry::builtin_ref().iter() {
        w.write_record([
            d.id.clone(),
            d.display_name.clone(),
            format!("{:.7}", d.coordinates.lat),
            format!("{:.7}", d.coordinates.lon),
            d.facility_tags.join("|"),
        ])?;
    }
    w.flush()?;
    println!("OK -> {}", reg_path.display());
    Ok(())
}
