pub mod api;
pub mod types;

pub use api::{ApiServer, SharedContext, DEFAULT_ADDR};
