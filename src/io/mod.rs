pub mod places;
pub mod proxies;
pub mod sink;

pub use places::load_places;
pub use proxies::{load_proxies, ProxyEndpoint};
pub use sink::ReviewSink;
