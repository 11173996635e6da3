pub mod place;
pub mod review;

pub use place::*;
pub use review::*;
