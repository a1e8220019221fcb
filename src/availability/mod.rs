//! Availability engine: free/busy math over UTC instants.
//!
//! Layers, leaves first:
//! 1. `interval`: validate, clip, merge, gaps
//! 2. `engine`: free-slot search, range checks, window partition
//! 3. `all_day`: date-only events in the calendar's timezone
//! 4. `reschedule`: plan and apply moves that clear a protected range

pub mod all_day;
pub mod engine;
pub mod interval;
pub mod reschedule;

pub use all_day::{EventTime, normalize_all_day};
pub use engine::{
    Availability, AvailabilityWindow, FreeSlot, compute_free_slots, is_range_free, partition,
};
pub use interval::{BusyInterval, TimeRange};
pub use reschedule::{
    PlannedMove, RescheduleOptions, ReschedulePlan, ScheduledEvent, Unresolved, UnresolvedReason,
    apply_plan, plan_rescheduling, plan_rescheduling_around,
};
