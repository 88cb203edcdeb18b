pub mod calls;
pub mod discovery;
pub mod geo;
pub mod meet;
pub mod notifications;
pub mod presence;
pub mod relationships;
pub mod router;
pub mod venues;

pub use calls::{CallSignal, CallSignalRelay};
pub use discovery::{CandidateCard, CandidateDiscoveryEngine, DiscoveryResult};
pub use meet::{MeetNegotiator, MeetSnapshot, MeetState, RequestOutcome};
pub use notifications::LiveNotifier;
pub use presence::{ConnectionHandle, InMemoryPresenceRegistry, PresenceRegistry};
pub use relationships::{BuzzOutcome, LikeOutcome, RelationshipStateMachine};
pub use router::{Delivery, RelayTarget, Route, SessionRouter};
pub use venues::{OverpassVenueSearch, StaticVenueSearch, VenueSearch};
