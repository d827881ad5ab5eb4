//! kumbhnav
//! Location-aware routing and crowd-density advisories for pilgrims at the
//! Ujjain Kumbh Mela grounds.

pub mod advisor;
pub mod crowd;
pub mod distance;
pub mod error;
pub mod heatmap;
pub mod models;
pub mod navigation;
pub mod registry;
pub mod routing;
pub mod server;
pub mod tracking;

pub use error::{NavError, Result};
