pub mod chat;
pub mod place;
pub mod session;
pub mod tracking;

pub use chat::{ChatTurn, DailyItinerary, Role, ShortTermProfile};
pub use place::ShortlistItem;
pub use session::{SessionSnapshot, SessionSummary};
pub use tracking::{EventKind, TrackEvent, TrackingSession};
