pub mod database;
pub mod error;
pub mod hrana;
pub mod http;
pub mod query;
pub mod query_analysis;
pub mod version;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
