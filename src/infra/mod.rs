// Adapters behind the app ports

pub mod header_identity;
pub mod rate_limiter;
pub mod tmdb_client;

pub use header_identity::HeaderIdentity;
pub use tmdb_client::TmdbClient;
