pub mod card;
pub mod container;
pub mod dates;
pub mod scroll;
pub mod session;

pub use container::{ContainerHandle, ScrollMetrics};
pub use scroll::{collect_reviews, FeedSurface, SessionState};
pub use session::{scrape_place_reviews, PlaceSession};
