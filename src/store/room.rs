use std::collections::HashMap;

use crate::model::*;

/// Every booking ever made on one room, plus an index of the active ones.
#[derive(Debug, Default)]
pub struct RoomState {
    /// Creation order.
    bookings: Vec<Booking>,
    positions: HashMap<BookingId, usize>,
    /// Active bookings sorted by `span.start`. Never overlapping.
    active: Vec<(Span, BookingId)>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn booking(&self, id: &BookingId) -> Option<&Booking> {
        self.positions.get(id).map(|&pos| &self.bookings[pos])
    }

    pub fn active_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.is_active())
    }

    /// Append a booking. Active ones join the overlap index.
    pub fn insert(&mut self, booking: Booking) {
        if booking.is_active() {
            let pos = self
                .active
                .binary_search_by_key(&booking.span.start, |(span, _)| span.start)
                .unwrap_or_else(|e| e);
            self.active.insert(pos, (booking.span, booking.id));
        }
        self.positions.insert(booking.id, self.bookings.len());
        self.bookings.push(booking);
    }

    /// Cancel a booking and drop it from the overlap index.
    /// `None` if unknown, `Some(false)` if it was already canceled.
    pub fn cancel(&mut self, id: &BookingId, at: Ms) -> Option<bool> {
        let pos = *self.positions.get(id)?;
        let changed = self.bookings[pos].cancel(at);
        if changed {
            self.active.retain(|(_, active_id)| active_id != id);
        }
        Some(changed)
    }

    /// Active bookings whose span intersects `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = BookingId> + '_ {
        let right_bound = self.active.partition_point(|(span, _)| span.start < query.end);
        let query_start = query.start;
        self.active[..right_bound]
            .iter()
            .filter(move |(span, _)| span.end > query_start)
            .map(|(_, id)| *id)
    }

    pub fn first_conflict(&self, span: &Span) -> Option<BookingId> {
        self.overlapping(span).next()
    }
}
