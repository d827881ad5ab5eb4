//! error.rs
//! Error kinds reported by the navigation engine. None of them is retried by
//! the engine itself: a retry is always a new user command.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    /// The platform has no location capability at all (reported once, at start).
    #[error("location capability unavailable")]
    LocationUnavailable,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("routing unavailable: {0}")]
    RoutingUnavailable(String),

    #[error("a navigation request is already in progress")]
    NavigationInProgress,

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("no active route")]
    NoActiveRoute,

    #[error("no crowd warning is awaiting a decision")]
    NoPendingWarning,

    #[error("navigation request was cancelled")]
    Cancelled,

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl NavError {
    /// Stable identifier used in lifecycle events and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            NavError::PermissionDenied => "permission_denied",
            NavError::PositionUnavailable(_) => "position_unavailable",
            NavError::LocationUnavailable => "location_unavailable",
            NavError::Timeout(_) => "timeout",
            NavError::RoutingUnavailable(_) => "routing_unavailable",
            NavError::NavigationInProgress => "navigation_in_progress",
            NavError::InvalidDestination(_) => "invalid_destination",
            NavError::NoActiveRoute => "no_active_route",
            NavError::NoPendingWarning => "no_pending_warning",
            NavError::Cancelled => "cancelled",
            NavError::InvalidData(_) => "invalid_data",
        }
    }

    /// Geolocation failure codes as browsers report them (1, 2, 3).
    pub fn from_geolocation_code(code: u8, message: Option<String>) -> Self {
        match code {
            1 => NavError::PermissionDenied,
            3 => NavError::Timeout("location fix"),
            _ => NavError::PositionUnavailable(message.unwrap_or_else(|| "unknown error".into())),
        }
    }
}

impl From<reqwest::Error> for NavError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NavError::Timeout("route computation")
        } else {
            NavError::RoutingUnavailable(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, NavError>;
