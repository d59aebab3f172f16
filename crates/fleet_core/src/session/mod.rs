pub mod model;
pub mod status;

pub use model::{
    LaunchMode, ReachabilityHandle, ReservationError, Session, SessionConfig, StoragePolicy,
    HARD_MAX_HOURS, MAX_RESERVATION_HOURS, MIN_RESERVATION_HOURS, validate_extension,
    validate_reservation_hours,
};
pub use status::{apply_event, SessionEvent, SessionStatus, TransitionError};
