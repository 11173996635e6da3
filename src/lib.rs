pub mod config;
pub mod error;
pub mod io;
pub mod models;
pub mod runner;
pub mod scrape;

pub use config::Config;
pub use error::{AppError, Result};
