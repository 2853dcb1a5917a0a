pub mod config;
pub mod errors;
pub mod session;

pub use config::{DefaultTransportFactory, ProviderConfig, TransportConfig, TransportFactory};
pub use errors::ProviderError;
pub use session::{ProviderSession, SessionState};
