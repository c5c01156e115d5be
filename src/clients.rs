pub mod provider;

pub use provider::{ProviderClient, ProviderConfig, ProviderError};
