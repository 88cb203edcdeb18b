pub mod events;
pub mod notifications;
pub mod relationships;
pub mod users;
pub mod venues;

pub type UserId = String;

pub use events::{ClientEvent, ServerEvent};
pub use notifications::{NewNotification, Notification, NotificationKind};
pub use relationships::{EdgeType, Match, MatchStreak};
pub use users::{Coordinates, DiscoveryFilters, UserSnapshot, UserUpdate, VisibilityMode};
pub use venues::Venue;
