pub mod conflict;
pub mod overlap;
pub mod schedule;

pub use conflict::ScheduleConflictChecker;
pub use overlap::SlotOverlapValidator;
pub use schedule::ScheduleService;
