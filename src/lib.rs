pub mod config;
pub mod credential;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod translate;
pub mod upstream;

pub use config::ProxyConfig;
pub use credential::Credential;
pub use error::{ProxyError, Result};
pub use logging::SharedLogger;
pub use proxy::UpstreamDispatcher;
pub use server::{build_router, AppState};
