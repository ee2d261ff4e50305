//! Position fixes. A provider hands out a continuous stream of fixes; dropping
//! the stream ends the subscription.

use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lng)
    }
}

#[derive(Debug, Clone)]
pub enum LocationError {
    Unavailable(String),
}

impl std::fmt::Display for LocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationError::Unavailable(msg) => write!(f, "position unavailable: {msg}"),
        }
    }
}

impl std::error::Error for LocationError {}

pub type LocationStream = BoxStream<'static, Result<Position, LocationError>>;

pub trait LocationProvider: Send + Sync {
    /// Subscribe to continuous position updates.
    fn watch(&self) -> LocationStream;
}

/// Reports a configured position, then repeats it on an interval.
pub struct FixedLocation {
    position: Position,
    interval: Duration,
}

impl FixedLocation {
    pub fn new(position: Position, interval: Duration) -> Self {
        Self { position, interval }
    }
}

impl LocationProvider for FixedLocation {
    fn watch(&self) -> LocationStream {
        let position = self.position;
        let interval = self.interval;
        stream::unfold(true, move |first| async move {
            if !first {
                tokio::time::sleep(interval).await;
            }
            Some((Ok::<_, LocationError>(position), false))
        })
        .boxed()
    }
}

/// No position source: a single error, then the subscription stays silent.
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn watch(&self) -> LocationStream {
        stream::once(async { Err(LocationError::Unavailable("no location source configured".into())) })
            .chain(stream::pending())
            .boxed()
    }
}
