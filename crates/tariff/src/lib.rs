//! Client for the authenticated tariff data service plus the HTTP exchange-rate source.

pub mod client;
pub mod document;
pub mod error;
pub mod fx;
pub mod store;
pub mod wire;

pub use client::TariffClient;
pub use document::DocumentFetcher;
pub use error::TariffClientError;
pub use fx::HttpJsonRateSource;
pub use store::{AuthSession, DetailCache, SessionStore};
