pub mod error;
mod handlers;
pub mod router;
pub mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
