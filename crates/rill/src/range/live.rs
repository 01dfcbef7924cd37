//! The tier-bridging range iterator.

use super::{ArrayRange, DataRange, RowRange};
use crate::cold::ColdStore;
use crate::error::Result;
use crate::hot::HotCache;
use crate::model::{Coordinate, Datapoint, DatapointArray};
use std::sync::Arc;

/// Where the range is currently drawing datapoints from.
enum State {
    /// Actively draining a backing source.
    Backed(Backing),
    /// The current backing ran dry; the tiers must be consulted again at
    /// the cursor before yielding more.
    NeedsRefetch,
    /// The cursor reached the coordinate length at the last probe. Not
    /// final: a later call probes again, so a long-lived range observes
    /// datapoints inserted after it first drained.
    Exhausted,
}

enum Backing {
    /// Durable rows below the hot tier's cached window.
    Rows(RowRange),
    /// A snapshot of the cached window from the cursor onward.
    Cached(ArrayRange),
}

impl Backing {
    fn next(&mut self) -> Result<Option<Datapoint>> {
        match self {
            Backing::Rows(r) => r.next(),
            Backing::Cached(r) => r.next(),
        }
    }

    fn next_array(&mut self) -> Result<Option<DatapointArray>> {
        match self {
            Backing::Rows(r) => r.next_array(),
            Backing::Cached(r) => r.next_array(),
        }
    }
}

/// Iterates a coordinate's datapoints from an absolute index, transparently
/// crossing the cold/hot boundary.
///
/// The range tracks an absolute cursor. Whenever its current backing runs
/// dry it re-enters the tiers at the cursor: the hot cache either serves
/// the remainder directly (a snapshot of its window) or defers to a lazy
/// cold-tier cursor for the trimmed prefix. A datapoint compacted and
/// trimmed mid-iteration is therefore still observed exactly once - the
/// cursor position, not the tier, decides what comes next.
pub(crate) struct LiveRange {
    hot: Arc<HotCache>,
    cold: ColdStore,
    coordinate: Coordinate,
    cursor: i64,
    state: State,
    closed: bool,
}

impl LiveRange {
    pub(crate) fn new(
        hot: Arc<HotCache>,
        cold: ColdStore,
        coordinate: Coordinate,
        start: i64,
    ) -> Self {
        Self {
            hot,
            cold,
            coordinate,
            cursor: start.max(0),
            state: State::NeedsRefetch,
            closed: false,
        }
    }

    /// Consults the tiers at the cursor. `None` means the cursor sits at
    /// the coordinate length (for now).
    fn probe(&self) -> Result<Option<Backing>> {
        let (data, _r1, _r2) = self.hot.read_range(
            &self.coordinate.stream,
            &self.coordinate.substream,
            self.cursor,
            0,
        );
        match data {
            Some(data) if data.is_empty() => Ok(None),
            Some(data) => Ok(Some(Backing::Cached(ArrayRange::new(data)))),
            None => Ok(Some(Backing::Rows(RowRange::new(
                self.cold.clone(),
                self.coordinate.clone(),
                self.cursor,
            )))),
        }
    }
}

impl DataRange for LiveRange {
    fn next(&mut self) -> Result<Option<Datapoint>> {
        if self.closed {
            return Ok(None);
        }
        loop {
            match &mut self.state {
                State::Backed(backing) => {
                    if let Some(point) = backing.next()? {
                        self.cursor += 1;
                        return Ok(Some(point));
                    }
                    self.state = State::NeedsRefetch;
                }
                State::NeedsRefetch | State::Exhausted => match self.probe()? {
                    Some(backing) => self.state = State::Backed(backing),
                    None => {
                        self.state = State::Exhausted;
                        return Ok(None);
                    }
                },
            }
        }
    }

    fn next_array(&mut self) -> Result<Option<DatapointArray>> {
        if self.closed {
            return Ok(None);
        }
        loop {
            match &mut self.state {
                State::Backed(backing) => {
                    if let Some(array) = backing.next_array()? {
                        self.cursor += array.len() as i64;
                        return Ok(Some(array));
                    }
                    self.state = State::NeedsRefetch;
                }
                State::NeedsRefetch | State::Exhausted => match self.probe()? {
                    Some(backing) => self.state = State::Backed(backing),
                    None => {
                        self.state = State::Exhausted;
                        return Ok(None);
                    }
                },
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.state = State::Exhausted;
    }
}
