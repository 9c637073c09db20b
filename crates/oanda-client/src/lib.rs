//! Resilient client for the OANDA v20 API.
//!
//! The crate is organized as a pipeline:
//!
//! - [`config`]: environment selection, credentials, tunables
//! - [`request`]: logical call specs and URL/header assembly
//! - [`transport`]: one classified HTTP attempt
//! - [`dispatch`]: fail-over across pooled credentials plus retry with
//!   backoff for transient failures
//! - [`decode`]: camelCase to snake_case response normalization
//! - [`stream`]: self-healing newline-delimited JSON subscriptions
//! - [`api`]: the typed endpoint surface tying it all together
//!
//! Most callers only need [`OandaClient`]:
//!
//! ```no_run
//! use oanda_client::{ClientConfig, CredentialConfig, Environment, OandaClient};
//! use common::Secret;
//!
//! # async fn run() -> oanda_client::Result<()> {
//! let config = ClientConfig::new(
//!     Environment::Practice,
//!     "101-004-1234567-001",
//!     vec![CredentialConfig {
//!         identity: "primary".into(),
//!         key: Secret::new(std::env::var("OANDA_API_KEY").unwrap_or_default()),
//!     }],
//! );
//! let client = OandaClient::new(config)?;
//! let summary = client.account_summary().await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backoff;
pub mod config;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod request;
pub mod stream;
pub mod transport;

pub use api::OandaClient;
pub use config::{ClientConfig, CredentialConfig, Environment};
pub use error::{Error, FailureKind, Result};
pub use request::RequestSpec;
pub use stream::{PriceStream, StreamState};
