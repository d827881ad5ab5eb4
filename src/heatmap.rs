//! heatmap.rs
//! Crowd overlay for the map surface: weighted points + a fixed 5-stop
//! gradient, and an H3 hexagon export of the same samples.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use geo::{BoundingRect, MultiPoint};
use geojson::GeoJson;
use h3o::{CellIndex, LatLng, Resolution};
use serde::Serialize;
use serde_json::json;
use serde_with::{serde_as, DisplayFromStr};
use std::collections::HashMap;
use tracing::debug;

use crate::models::types::CrowdSample;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GradientStop {
    pub weight: f64,
    pub color: &'static str,
}

/// green -> yellow -> orange -> red -> dark red
pub const GRADIENT: [GradientStop; 5] = [
    GradientStop { weight: 0.0, color: "#008000" },
    GradientStop { weight: 0.3, color: "#ffff00" },
    GradientStop { weight: 0.6, color: "#ffa500" },
    GradientStop { weight: 0.8, color: "#ff0000" },
    GradientStop { weight: 1.0, color: "#8b0000" },
];

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HeatPoint {
    pub lat: f64,
    pub lon: f64,
    pub weight: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeatOverlay {
    pub points: Vec<HeatPoint>,
    pub gradient: [GradientStop; 5],
    /// None for an empty sample set
    pub bounds: Option<Bounds>,
}

/// Colour of the highest stop at or below `weight`.
pub fn color_for(weight: f64) -> &'static str {
    let w = if weight.is_finite() { weight.clamp(0.0, 1.0) } else { 0.0 };
    GRADIENT.iter().rev().find(|s| w >= s.weight).map_or(GRADIENT[0].color, |s| s.color)
}

/// Projection only; nothing is kept between calls.
pub fn render(samples: &[CrowdSample]) -> HeatOverlay {
    let points: Vec<HeatPoint> = samples
        .iter()
        .map(|s| HeatPoint { lat: s.coordinates.lat, lon: s.coordinates.lon, weight: s.intensity.clamp(0.0, 1.0) })
        .collect();

    let mp: MultiPoint<f64> = points.iter().map(|p| (p.lon, p.lat)).collect::<Vec<_>>().into();
    let bounds = mp.bounding_rect().map(|r| Bounds {
        min_lat: r.min().y,
        min_lon: r.min().x,
        max_lat: r.max().y,
        max_lon: r.max().x,
    });

    HeatOverlay { points, gradient: GRADIENT, bounds }
}

/// Show/hide state of the overlay. Only a change of visibility redraws.
#[derive(Debug, Default)]
pub struct HeatMapRenderer {
    visible: bool,
    redraws: u64,
}

impl HeatMapRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn redraws(&self) -> u64 {
        self.redraws
    }

    /// Returns true when the surface had to be redrawn.
    pub fn toggle(&mut self, visible: bool) -> bool {
        if self.visible == visible {
            return false;
        }
        self.visible = visible;
        self.redraws += 1;
        debug!("heat map {} (redraw #{})", if visible { "shown" } else { "hidden" }, self.redraws);
        true
    }

    /// Overlay to draw, or None while hidden.
    pub fn overlay(&self, samples: &[CrowdSample]) -> Option<HeatOverlay> {
        self.visible.then(|| render(samples))
    }
}

// -------------------------------
// H3 export
// -------------------------------

#[serde_as]
#[derive(Clone, Debug, Serialize)]
pub struct HexCell {
    #[serde_as(as = "DisplayFromStr")]
    pub h3: CellIndex,
    pub mean_intensity: f64,
    pub samples: usize,
}

/// Mean intensity per H3 cell, sorted by cell id.
pub fn hex_cells(samples: &[CrowdSample], res: u8) -> Result<Vec<HexCell>> {
    let r = Resolution::try_from(res).with_context(|| format!("invalid H3 resolution {res}"))?;
    let mut acc: HashMap<CellIndex, (f64, usize)> = HashMap::new();
    for s in samples {
        let Ok(ll) = LatLng::new(s.coordinates.lat, s.coordinates.lon) else { continue };
        let e = acc.entry(ll.to_cell(r)).or_default();
        e.0 += s.intensity;
        e.1 += 1;
    }
    let mut cells: Vec<HexCell> = acc
        .into_iter()
        .map(|(h3, (sum, n))| HexCell { h3, mean_intensity: (sum / n as f64).clamp(0.0, 1.0), samples: n })
        .collect();
    cells.sort_by_key(|c| u64::from(c.h3));
    Ok(cells)
}

fn cell_polygon_coords(c: CellIndex) -> Vec<[f64; 2]> {
    let mut coords: Vec<[f64; 2]> = c.boundary().iter().map(|ll| [ll.lng(), ll.lat()]).collect();
    if let Some(first) = coords.first().copied() {
        if coords.last() != Some(&first) {
            coords.push(first);
        }
    }
    coords
}

/// FeatureCollection of coloured hexagons.
pub fn hex_geojson(samples: &[CrowdSample], res: u8) -> Result<String> {
    let mut features = Vec::new();
    for cell in hex_cells(samples, res)? {
        let col = color_for(cell.mean_intensity);
        let mut props = serde_json::to_value(&cell)?;
        props["style"] = json!({
            "fill": true, "fill-color": col, "fill-opacity": 0.6,
            "stroke": col, "stroke-width": 1, "stroke-opacity": 1.0
        });
        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "Polygon", "coordinates": [cell_polygon_coords(cell.h3)] },
            "properties": props
        }));
    }

    let gj = json!({
        "type": "FeatureCollection",
        "name": "crowd_hex_h3",
        "ts_utc": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "features": features
    });
    Ok(GeoJson::from_json_value(gj).context("hex GeoJSON")?.to_string())
}
