//! registry.rs
//!
//! Static registry of navigable places (sectors, ghats, temples).
//!
//! - Loaded once at startup, from a CSV file or the built-in table.
//! - Order is significant: ties in alternatives and nearby lists keep it.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::distance::{haversine_m, walking_minutes};
use crate::models::types::{Coord, Destination};

/// Main confluence point of the venue.
pub const TRIVENI_GHAT: Coord = Coord { lat: 23.1287723, lon: 75.7933631 };

const BUILTIN: &[(&str, &str, f64, f64, &[&str])] = &[
    ("triveni-ghat", "Triveni Ghat - Sacred Confluence", 23.1287723, 75.7933631,
        &["Main Bathing Area", "Religious Activities", "Crowd Management"]),
    ("sector1", "North Sector - Main Entrance", 23.1295, 75.7930,
        &["Police Station", "Medical Post", "Lost & Found"]),
    ("sector2", "East Sector - Bathing Ghats", 23.1290, 75.7940,
        &["Sanitation", "Food Distribution", "Temporary Shelters"]),
    ("sector3", "South Sector - Parking & Transport", 23.1280, 75.7935,
        &["Fire Station", "Medical Post", "Food Distribution"]),
    ("sector4", "West Sector - Accommodation", 23.1285, 75.7925,
        &["Temporary Shelters", "Sanitation", "Lost & Found"]),
    ("sector5", "Northeast Sector - Commercial", 23.1295, 75.7940,
        &["Food Distribution", "Medical Post", "Police Station"]),
    ("sector6", "Southwest Sector - Services", 23.1275, 75.7925,
        &["Fire Station", "Sanitation", "Lost & Found"]),
    ("mahakaleshwar", "Mahakaleshwar Jyotirlinga Temple", 23.1826, 75.7681,
        &["Temple", "Religious Activities"]),
    ("ram-ghat", "Ram Ghat", 23.1815, 75.7681,
        &["Main Bathing Area", "Sanitation"]),
    ("harsiddhi", "Harsiddhi Temple", 23.1698, 75.7889,
        &["Temple", "Religious Activities"]),
    ("kal-bhairav", "Kal Bhairav Temple", 23.1789, 75.7712,
        &["Temple"]),
];

static BUILTIN_REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    items: BUILTIN
        .iter()
        .map(|(id, name, lat, lon, tags)| Destination {
            id: id.to_string(),
            display_name: name.to_string(),
            coordinates: Coord { lat: *lat, lon: *lon },
            facility_tags: tags.iter().map(|t| t.to_string()).collect(),
        })
        .collect(),
});

#[derive(Debug, Deserialize)]
struct RegistryRow {
    id: String,
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    tags: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct NearbyPlace {
    pub destination: Destination,
    pub distance_m: f64,
    pub walking_min: u32,
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    items: Vec<Destination>,
}

impl Registry {
    pub fn new(items: Vec<Destination>) -> Result<Self> {
        let mut seen = HashSet::new();
        for d in &items {
            if !seen.insert(d.id.as_str()) {
                anyhow::bail!("duplicate destination id `{}`", d.id);
            }
        }
        Ok(Self { items })
    }

    pub fn builtin() -> Self {
        BUILTIN_REGISTRY.clone()
    }

    /// Shared copy of the built-in table.
    pub fn builtin_ref() -> &'static Registry {
        &BUILTIN_REGISTRY
    }

    /// CSV with header `id,name,lat,lon,tags`; tags separated by `|`.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("open registry {}", path.display()))?;

        let mut items = Vec::new();
        for (i, rec) in rdr.deserialize::<RegistryRow>().enumerate() {
            let row = rec.with_context(|| format!("registry row {}", i + 1))?;
            let coords = Coord::new(row.lat, row.lon)
                .with_context(|| format!("registry row {} ({})", i + 1, row.id))?;
            let tags = row
                .tags
                .split('|')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
            items.push(
                Destination::new(row.id, row.name, coords, tags)
                    .with_context(|| format!("registry row {}", i + 1))?,
            );
        }
        Self::new(items)
    }

    pub fn get(&self, id: &str) -> Option<&Destination> {
        self.items.iter().find(|d| d.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Places within `radius_m` of `point`, closest first.
    pub fn nearby(&self, point: Coord, radius_m: f64, tag: Option<&str>) -> Vec<NearbyPlace> {
        let mut out: Vec<NearbyPlace> = self
            .items
            .iter()
            .filter(|d| tag.map_or(true, |t| d.has_tag(t)))
            .filter_map(|d| {
                let distance_m = haversine_m(point, d.coordinates);
                (distance_m <= radius_m).then(|| NearbyPlace {
                    destination: d.clone(),
                    distance_m,
                    walking_min: walking_minutes(distance_m),
                })
            })
            .collect();
        // stable sort: equal distances keep registry order
        out.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        out
    }
}
