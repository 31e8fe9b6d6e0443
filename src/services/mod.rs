pub mod client;
pub mod providers;
pub mod transport;

pub use client::{resolve_url, ClientSettings, ResilientClient};
pub use providers::{Provider, ProviderRegistry, UnknownProvider};
pub use transport::{HttpTransport, PreparedRequest, Transport, TransportResponse};
