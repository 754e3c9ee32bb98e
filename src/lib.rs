pub mod browser;
pub mod cash;
pub mod chain;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod normalize;
pub mod proxy;
pub mod routes;
pub mod shared;
pub mod tiktok;

pub use config::Config;
pub use routes::build_router;
pub use shared::AppState;
