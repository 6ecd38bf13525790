use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only time type.
pub type Ms = i64;

/// Opaque room identity.
pub type ResourceId = Ulid;

/// Opaque booking identity, assigned by the store.
pub type BookingId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A bookable room. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
}

/// Booking lifecycle. `Active → Canceled` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Active,
    Canceled { at: Ms },
}

impl BookingStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Active => "active",
            BookingStatus::Canceled { .. } => "canceled",
        }
    }

    /// Move to `Canceled`. A status that is already canceled keeps its
    /// original timestamp.
    fn cancel(self, at: Ms) -> BookingStatus {
        match self {
            BookingStatus::Active => BookingStatus::Canceled { at },
            canceled @ BookingStatus::Canceled { .. } => canceled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: BookingId,
    pub resource_id: ResourceId,
    pub span: Span,
    pub booker: Option<String>,
    pub created_at: Ms,
    status: BookingStatus,
}

impl Booking {
    /// New bookings always start out `Active`.
    pub fn new(
        id: BookingId,
        resource_id: ResourceId,
        span: Span,
        booker: Option<String>,
        created_at: Ms,
    ) -> Self {
        Self {
            id,
            resource_id,
            span,
            booker,
            created_at,
            status: BookingStatus::Active,
        }
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Cancel the booking. Returns false if it was already canceled.
    pub fn cancel(&mut self, at: Ms) -> bool {
        let was_active = self.status.is_active();
        self.status = self.status.cancel(at);
        was_active
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: ResourceId,
        name: String,
    },
    BookingCreated {
        id: BookingId,
        resource_id: ResourceId,
        span: Span,
        booker: Option<String>,
        created_at: Ms,
    },
    BookingCanceled {
        id: BookingId,
        resource_id: ResourceId,
        at: Ms,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(start: Ms, end: Ms) -> Booking {
        Booking::new(Ulid::new(), Ulid::new(), Span::new(start, end), None, 0)
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_containing_other_overlaps() {
        let outer = Span::new(0, 1000);
        let inner = Span::new(400, 500);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn span_single_ms_overlap() {
        assert!(Span::new(100, 201).overlaps(&Span::new(200, 300)));
    }

    #[test]
    fn new_booking_is_active() {
        let b = booking(100, 200);
        assert_eq!(b.status(), BookingStatus::Active);
        assert!(b.is_active());
        assert_eq!(b.status().as_str(), "active");
    }

    #[test]
    fn cancel_is_one_way() {
        let mut b = booking(100, 200);
        assert!(b.cancel(50));
        assert_eq!(b.status(), BookingStatus::Canceled { at: 50 });
        assert_eq!(b.status().as_str(), "canceled");

        // Second cancel is a no-op and keeps the first timestamp
        assert!(!b.cancel(90));
        assert_eq!(b.status(), BookingStatus::Canceled { at: 50 });
        assert!(!b.is_active());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            span: Span::new(1000, 2000),
            booker: Some("Alice".into()),
            created_at: 10,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
