pub mod analysis;
pub mod config;

pub use analysis::*;
pub use config::*;
