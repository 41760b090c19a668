pub mod config;
pub mod ids;

pub use ids::*;
