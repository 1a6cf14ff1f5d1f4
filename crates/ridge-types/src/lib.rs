pub mod params;
pub mod outcome;
pub mod records;
pub mod config;
pub mod errors;

pub use params::*;
pub use outcome::*;
pub use records::*;
pub use config::*;
pub use errors::*;
