pub mod model;
pub mod source;

pub use model::{CrowdModel, CrowdOrigin};
pub use source::{refresh_crowd, CrowdSource, HttpCrowdSource, RefreshOutcome, SimulatedCrowd};
