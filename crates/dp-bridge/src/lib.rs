pub mod http_api;
pub mod hub;
pub mod state;

pub use http_api::router;
pub use state::AppState;
