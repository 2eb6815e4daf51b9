pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod normalize;
pub mod server;
pub mod translate;

pub use config::GatewayConfig;
pub use dispatcher::{CanonicalImageResult, Dispatcher};
pub use error::{GatewayError, Result};
pub use normalize::CanonicalImageRequest;
pub use server::{build_router, AppState};
