//! Two-way binding between an address field and its map coordinates.

mod sync;

use futures::future::BoxFuture;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::settle::BoxError;

pub use sync::{AddressSync, GeoOutcome, GeoPhase, GeoSnapshot};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub lat: Decimal,
    pub lng: Decimal,
}

impl Coords {
    pub const fn new(lat: Decimal, lng: Decimal) -> Self {
        Self { lat, lng }
    }
}

/// Geocoding service used by [`AddressSync`].
///
/// `Ok(None)` means the service answered but found nothing.
pub trait AddressResolver: Send + Sync + 'static {
    fn forward(&self, address: String) -> BoxFuture<'static, Result<Option<Coords>, BoxError>>;

    fn reverse(&self, coords: Coords) -> BoxFuture<'static, Result<Option<String>, BoxError>>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoOptions {
    pub forward_debounce_ms: u64,
    pub reverse_debounce_ms: u64,
}

impl Default for GeoOptions {
    fn default() -> Self {
        Self {
            forward_debounce_ms: 400,
            reverse_debounce_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("address sync state lock poisoned while {0}")]
    StatePoisoned(&'static str),
}

pub type GeoResult<T> = Result<T, GeoError>;
