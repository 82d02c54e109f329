pub mod availability;
pub mod booking;
pub mod lifecycle;
pub mod sequence;
pub mod side_effects;

pub use availability::AvailabilityResolver;
pub use booking::BookingCoordinator;
pub use lifecycle::{valid_transitions, validate_status_transition, AppointmentLifecycleService};
pub use sequence::SequenceCodeGenerator;
pub use side_effects::{BookingSideEffect, LedgerAnchor, SideEffectDispatcher, WebhookNotifier};
