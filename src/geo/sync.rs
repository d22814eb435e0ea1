use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_timer::Delay;

use super::{AddressResolver, Coords, GeoError, GeoOptions, GeoResult};
use crate::settle::settle;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GeoPhase {
    Idle,
    GeocodingForward,
    GeocodingReverse,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GeoOutcome {
    Resolved,
    NotFound,
    /// A newer change in the same direction replaced this one.
    Superseded,
    /// The address was the echo of a reverse lookup and was not geocoded again.
    Suppressed,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeoSnapshot {
    pub address: String,
    pub coords: Option<Coords>,
    pub phase: GeoPhase,
    pub last_error: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct GeoTicket(u64);

impl GeoTicket {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Forward,
    Reverse,
}

#[derive(Default)]
struct GeoState {
    address: String,
    coords: Option<Coords>,
    phase: Option<Direction>,
    forward: GeoTicket,
    reverse: GeoTicket,
    echo: Option<String>,
    last_error: Option<String>,
}

impl GeoState {
    fn ticket(&self, direction: Direction) -> GeoTicket {
        match direction {
            Direction::Forward => self.forward,
            Direction::Reverse => self.reverse,
        }
    }

    fn phase(&self) -> GeoPhase {
        match self.phase {
            None => GeoPhase::Idle,
            Some(Direction::Forward) => GeoPhase::GeocodingForward,
            Some(Direction::Reverse) => GeoPhase::GeocodingReverse,
        }
    }
}

/// Keeps an address and its coordinates in step through an [`AddressResolver`].
///
/// Each direction is debounced on its own and only the latest request per direction is applied.
pub struct AddressSync<R> {
    resolver: Arc<R>,
    options: GeoOptions,
    state: Arc<RwLock<GeoState>>,
}

impl<R> Clone for AddressSync<R> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            options: self.options,
            state: self.state.clone(),
        }
    }
}

impl<R: AddressResolver> AddressSync<R> {
    pub fn new(resolver: R, options: GeoOptions) -> Self {
        Self {
            resolver: Arc::new(resolver),
            options,
            state: Arc::new(RwLock::new(GeoState::default())),
        }
    }

    /// Loads the stored address and coordinates of an existing record without geocoding.
    pub fn seed(&self, address: impl Into<String>, coords: Option<Coords>) -> GeoResult<()> {
        let mut state = write_lock(&self.state, "seeding address")?;
        state.address = address.into();
        state.coords = coords;
        state.echo = None;
        state.last_error = None;
        Ok(())
    }

    pub fn snapshot(&self) -> GeoResult<GeoSnapshot> {
        let state = read_lock(&self.state, "creating geo snapshot")?;
        Ok(GeoSnapshot {
            address: state.address.clone(),
            coords: state.coords,
            phase: state.phase(),
            last_error: state.last_error.clone(),
        })
    }

    pub fn address(&self) -> GeoResult<String> {
        Ok(read_lock(&self.state, "reading address")?.address.clone())
    }

    pub fn coords(&self) -> GeoResult<Option<Coords>> {
        Ok(read_lock(&self.state, "reading coordinates")?.coords)
    }

    pub fn phase(&self) -> GeoResult<GeoPhase> {
        Ok(read_lock(&self.state, "reading geocoding phase")?.phase())
    }

    /// The address field changed: geocode it into coordinates.
    pub async fn address_changed(&self, address: impl Into<String>) -> GeoResult<GeoOutcome> {
        let address = address.into();
        let ticket = {
            let mut state = write_lock(&self.state, "recording address change")?;
            let echo = state.echo.take();
            state.address = address.clone();
            if echo.as_deref() == Some(address.as_str()) {
                tracing::debug!("address change echoes reverse lookup, not geocoding");
                return Ok(GeoOutcome::Suppressed);
            }
            state.forward = state.forward.next();
            state.forward
        };

        if !self
            .debounce(Direction::Forward, ticket, self.options.forward_debounce_ms)
            .await?
        {
            return Ok(GeoOutcome::Superseded);
        }
        let resolver = &self.resolver;
        let result = settle(async move { resolver.forward(address).await }).await;

        let mut state = write_lock(&self.state, "applying forward geocoding result")?;
        if state.forward != ticket {
            return Ok(GeoOutcome::Superseded);
        }
        finish_phase(&mut state, Direction::Forward);
        Ok(match result {
            Ok(Some(coords)) => {
                state.coords = Some(coords);
                state.last_error = None;
                tracing::debug!(lat = %coords.lat, lng = %coords.lng, "address geocoded");
                GeoOutcome::Resolved
            }
            Ok(None) => {
                state.last_error = None;
                GeoOutcome::NotFound
            }
            Err(error) => {
                tracing::warn!(%error, "forward geocoding failed");
                state.last_error = Some(error.to_string());
                GeoOutcome::Failed
            }
        })
    }

    /// The coordinates changed (e.g. a map pin moved): look up the matching address.
    ///
    /// A resolved address is stored and its echo through [`Self::address_changed`] is
    /// suppressed once.
    pub async fn coords_changed(&self, coords: Coords) -> GeoResult<GeoOutcome> {
        let ticket = {
            let mut state = write_lock(&self.state, "recording coordinate change")?;
            state.coords = Some(coords);
            state.reverse = state.reverse.next();
            state.reverse
        };

        if !self
            .debounce(Direction::Reverse, ticket, self.options.reverse_debounce_ms)
            .await?
        {
            return Ok(GeoOutcome::Superseded);
        }
        let resolver = &self.resolver;
        let result = settle(async move { resolver.reverse(coords).await }).await;

        let mut state = write_lock(&self.state, "applying reverse geocoding result")?;
        if state.reverse != ticket {
            return Ok(GeoOutcome::Superseded);
        }
        finish_phase(&mut state, Direction::Reverse);
        Ok(match result {
            Ok(Some(address)) => {
                tracing::debug!(address = %address, "coordinates reverse geocoded");
                state.echo = Some(address.clone());
                state.address = address;
                state.last_error = None;
                GeoOutcome::Resolved
            }
            Ok(None) => {
                state.last_error = None;
                GeoOutcome::NotFound
            }
            Err(error) => {
                tracing::warn!(%error, "reverse geocoding failed");
                state.last_error = Some(error.to_string());
                GeoOutcome::Failed
            }
        })
    }

    /// Waits out the debounce window, then marks the lookup as running if `ticket` is still
    /// the latest for its direction.
    async fn debounce(
        &self,
        direction: Direction,
        ticket: GeoTicket,
        debounce_ms: u64,
    ) -> GeoResult<bool> {
        if debounce_ms > 0 {
            Delay::new(Duration::from_millis(debounce_ms)).await;
        }
        let mut state = write_lock(&self.state, "starting geocoding lookup")?;
        if state.ticket(direction) != ticket {
            return Ok(false);
        }
        state.phase = Some(direction);
        Ok(true)
    }
}

fn finish_phase(state: &mut GeoState, direction: Direction) {
    if matches!(
        (state.phase, direction),
        (Some(Direction::Forward), Direction::Forward)
            | (Some(Direction::Reverse), Direction::Reverse)
    ) {
        state.phase = None;
    }
}

fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> GeoResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| GeoError::StatePoisoned(context))
}

fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> GeoResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| GeoError::StatePoisoned(context))
}
