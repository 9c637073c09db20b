//! Typed endpoint surface
//!
//! [`OandaClient`] wires the pool, builder, dispatcher, and stream connector
//! together and exposes one method per v20 endpoint. Every REST method runs
//! through the dispatcher (fail-over and retry included) and returns the
//! decoded, snake_case body; `price_stream` opens a self-healing streaming
//! session instead.
//!
//! The account-scoped methods all target the configured account id. Request
//! data is passed as `serde_json::Value` in the shape the v20 API documents;
//! GET data lands in the query string, mutating data in the JSON body.

use std::path::Path;
use std::sync::Arc;

use oanda_pool::CredentialPool;
use serde_json::Value;
use tracing::info;

use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::request::{RequestBuilder, RequestSpec};
use crate::stream::{HttpStreamConnector, PriceStream, StreamConnector, StreamingSession};
use crate::transport::{HttpTransport, Transport};

pub struct OandaClient {
    config: ClientConfig,
    pool: Arc<CredentialPool>,
    builder: RequestBuilder,
    dispatcher: Dispatcher,
    stream_connector: Arc<dyn StreamConnector>,
}

impl OandaClient {
    /// Build a client with production HTTP transports.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
        let connector = Arc::new(HttpStreamConnector::new(config.request_timeout)?);
        Self::with_transports(config, transport, connector)
    }

    /// Build a client over caller-supplied transports. This is the seam tests
    /// and embedders use to substitute the network layer.
    pub fn with_transports(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        stream_connector: Arc<dyn StreamConnector>,
    ) -> Result<Self> {
        if config.credentials.is_empty() {
            return Err(Error::Config(
                "at least one credential must be configured".into(),
            ));
        }
        let pool = Arc::new(CredentialPool::new(
            config
                .credentials
                .iter()
                .map(|c| (c.identity.clone(), c.key.clone())),
        ));
        let builder = RequestBuilder::new(config.environment);
        let dispatcher = Dispatcher::new(Arc::clone(&pool), builder.clone(), transport, &config);
        info!(
            environment = ?config.environment,
            credentials = pool.len(),
            "client initialized"
        );
        Ok(Self {
            config,
            pool,
            builder,
            dispatcher,
            stream_connector,
        })
    }

    /// Load configuration from a TOML file and build a client.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config = ClientConfig::load(path).map_err(|e| Error::Config(e.to_string()))?;
        Self::new(config)
    }

    pub fn account_id(&self) -> &str {
        &self.config.account_id
    }

    /// Run one logical call through the retry pipeline.
    pub async fn execute(&self, spec: RequestSpec) -> Result<Value> {
        self.dispatcher.execute(&spec).await
    }

    fn account_path(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("/v3/accounts/{}", self.config.account_id)
        } else {
            format!("/v3/accounts/{}/{suffix}", self.config.account_id)
        }
    }

    // Accounts

    /// List the accounts the credentials can see.
    pub async fn accounts(&self) -> Result<Value> {
        self.execute(RequestSpec::get("/v3/accounts")).await
    }

    /// Full details of the configured account.
    pub async fn account(&self) -> Result<Value> {
        self.execute(RequestSpec::get(self.account_path(""))).await
    }

    pub async fn account_summary(&self) -> Result<Value> {
        self.execute(RequestSpec::get(self.account_path("summary")))
            .await
    }

    /// Instruments tradeable on the configured account.
    pub async fn account_instruments(&self) -> Result<Value> {
        self.execute(RequestSpec::get(self.account_path("instruments")))
            .await
    }

    pub async fn update_account(&self, data: Value) -> Result<Value> {
        self.execute(RequestSpec::patch(self.account_path("configuration"), data))
            .await
    }

    /// Account state changes since a transaction id (`sinceTransactionID`).
    pub async fn account_changes(&self, data: Value) -> Result<Value> {
        self.execute(RequestSpec::get_with(self.account_path("changes"), data))
            .await
    }

    // Instruments

    pub async fn instrument_candles(&self, instrument: &str, data: Value) -> Result<Value> {
        self.execute(RequestSpec::get_with(
            format!("/v3/instruments/{instrument}/candles"),
            data,
        ))
        .await
    }

    // Orders

    pub async fn create_order(&self, data: Value) -> Result<Value> {
        self.execute(RequestSpec::post(self.account_path("orders"), data))
            .await
    }

    pub async fn orders(&self, data: Value) -> Result<Value> {
        self.execute(RequestSpec::get_with(self.account_path("orders"), data))
            .await
    }

    pub async fn pending_orders(&self) -> Result<Value> {
        self.execute(RequestSpec::get(self.account_path("pendingOrders")))
            .await
    }

    pub async fn order(&self, order_specifier: &str) -> Result<Value> {
        self.execute(RequestSpec::get(
            self.account_path(&format!("orders/{order_specifier}")),
        ))
        .await
    }

    pub async fn update_order(&self, order_specifier: &str, data: Value) -> Result<Value> {
        self.execute(RequestSpec::patch(
            self.account_path(&format!("orders/{order_specifier}")),
            data,
        ))
        .await
    }

    pub async fn cancel_order(&self, order_specifier: &str) -> Result<Value> {
        self.execute(RequestSpec::patch_empty(
            self.account_path(&format!("orders/{order_specifier}/cancel")),
        ))
        .await
    }

    pub async fn update_order_client_extensions(
        &self,
        order_specifier: &str,
        data: Value,
    ) -> Result<Value> {
        self.execute(RequestSpec::patch(
            self.account_path(&format!("orders/{order_specifier}/clientExtensions")),
            data,
        ))
        .await
    }

    // Trades

    pub async fn trades(&self, data: Value) -> Result<Value> {
        self.execute(RequestSpec::get_with(self.account_path("trades"), data))
            .await
    }

    pub async fn open_trades(&self) -> Result<Value> {
        self.execute(RequestSpec::get(self.account_path("openTrades")))
            .await
    }

    pub async fn trade(&self, trade_specifier: &str) -> Result<Value> {
        self.execute(RequestSpec::get(
            self.account_path(&format!("trades/{trade_specifier}")),
        ))
        .await
    }

    /// Close a trade partially or fully (`units` in the data).
    pub async fn close_trade(&self, trade_specifier: &str, data: Value) -> Result<Value> {
        self.execute(RequestSpec::patch(
            self.account_path(&format!("trades/{trade_specifier}/close")),
            data,
        ))
        .await
    }

    pub async fn update_trade_client_extensions(
        &self,
        trade_specifier: &str,
        data: Value,
    ) -> Result<Value> {
        self.execute(RequestSpec::patch(
            self.account_path(&format!("trades/{trade_specifier}/clientExtensions")),
            data,
        ))
        .await
    }

    /// Replace a trade's dependent orders (take profit, stop loss, trailing).
    pub async fn update_trade_orders(&self, trade_specifier: &str, data: Value) -> Result<Value> {
        self.execute(RequestSpec::patch(
            self.account_path(&format!("trades/{trade_specifier}/orders")),
            data,
        ))
        .await
    }

    // Positions

    pub async fn positions(&self) -> Result<Value> {
        self.execute(RequestSpec::get(self.account_path("positions")))
            .await
    }

    pub async fn open_positions(&self) -> Result<Value> {
        self.execute(RequestSpec::get(self.account_path("openPositions")))
            .await
    }

    pub async fn instrument_position(&self, instrument: &str) -> Result<Value> {
        self.execute(RequestSpec::get(
            self.account_path(&format!("positions/{instrument}")),
        ))
        .await
    }

    pub async fn close_position(&self, instrument: &str, data: Value) -> Result<Value> {
        self.execute(RequestSpec::patch(
            self.account_path(&format!("positions/{instrument}/close")),
            data,
        ))
        .await
    }

    // Transactions

    pub async fn transactions(&self, data: Value) -> Result<Value> {
        self.execute(RequestSpec::get_with(
            self.account_path("transactions"),
            data,
        ))
        .await
    }

    pub async fn transaction(&self, transaction_id: &str) -> Result<Value> {
        self.execute(RequestSpec::get(
            self.account_path(&format!("transactions/{transaction_id}")),
        ))
        .await
    }

    /// Transactions in an id range (`from`/`to` in the data).
    pub async fn transaction_range(&self, data: Value) -> Result<Value> {
        self.execute(RequestSpec::get_with(
            self.account_path("transactions/idrange"),
            data,
        ))
        .await
    }

    pub async fn transactions_since(&self, data: Value) -> Result<Value> {
        self.execute(RequestSpec::get_with(
            self.account_path("transactions/sinceid"),
            data,
        ))
        .await
    }

    // Pricing

    /// Current prices for a set of instruments.
    pub async fn pricing(&self, data: Value) -> Result<Value> {
        self.execute(RequestSpec::get_with(self.account_path("pricing"), data))
            .await
    }

    /// Open a streaming pricing subscription.
    ///
    /// The session reconnects on its own; drop the returned handle to end it.
    /// Must be called from within a tokio runtime.
    pub fn price_stream(&self, data: Value) -> PriceStream {
        let spec = RequestSpec::stream(self.account_path("pricing/stream"), data);
        StreamingSession::new(
            Arc::clone(&self.pool),
            self.builder.clone(),
            Arc::clone(&self.stream_connector),
            spec,
            &self.config,
        )
        .spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialConfig, Environment};
    use crate::request::PreparedRequest;
    use crate::stream::{ByteStream, ConnectError};
    use crate::transport::AttemptOutcome;
    use common::Secret;
    use reqwest::Method;
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// Transport that records every prepared request and answers 200 `{}`.
    #[derive(Default)]
    struct RecordingTransport {
        requests: Mutex<Vec<(Method, String, Option<String>)>>,
    }

    impl RecordingTransport {
        fn requests(&self) -> Vec<(Method, String, Option<String>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn send<'a>(
            &'a self,
            request: &'a PreparedRequest,
        ) -> Pin<Box<dyn Future<Output = AttemptOutcome> + Send + 'a>> {
            self.requests.lock().unwrap().push((
                request.method.clone(),
                request.url.to_string(),
                request.body.clone(),
            ));
            Box::pin(async {
                AttemptOutcome::Success {
                    body: "{}".into(),
                    status: 200,
                }
            })
        }
    }

    struct NoStream;

    impl StreamConnector for NoStream {
        fn connect<'a>(
            &'a self,
            _request: &'a PreparedRequest,
        ) -> Pin<
            Box<dyn Future<Output = std::result::Result<ByteStream, ConnectError>> + Send + 'a>,
        > {
            Box::pin(async {
                Err(ConnectError::Transient {
                    cause: "not wired in this test".into(),
                })
            })
        }
    }

    fn client() -> (OandaClient, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let config = ClientConfig::new(
            Environment::Practice,
            "101-004-1234567-001",
            vec![CredentialConfig {
                identity: "primary".into(),
                key: Secret::new("k".into()),
            }],
        );
        let client =
            OandaClient::with_transports(config, Arc::clone(&transport) as _, Arc::new(NoStream))
                .unwrap();
        (client, transport)
    }

    #[tokio::test]
    async fn account_scoped_get_targets_configured_account() {
        let (client, transport) = client();
        client.account_summary().await.unwrap();

        let (method, url, body) = transport.requests().remove(0);
        assert_eq!(method, Method::GET);
        assert_eq!(
            url,
            "https://api-fxpractice.oanda.com/v3/accounts/101-004-1234567-001/summary"
        );
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn create_order_posts_json_body() {
        let (client, transport) = client();
        client
            .create_order(json!({"order": {"instrument": "EUR_USD", "units": "100"}}))
            .await
            .unwrap();

        let (method, url, body) = transport.requests().remove(0);
        assert_eq!(method, Method::POST);
        assert!(url.ends_with("/v3/accounts/101-004-1234567-001/orders"));
        let body: Value = serde_json::from_str(&body.unwrap()).unwrap();
        assert_eq!(body["order"]["instrument"], "EUR_USD");
    }

    #[tokio::test]
    async fn cancel_order_patches_without_body() {
        let (client, transport) = client();
        client.cancel_order("42").await.unwrap();

        let (method, url, body) = transport.requests().remove(0);
        assert_eq!(method, Method::PATCH);
        assert!(url.ends_with("/orders/42/cancel"), "got: {url}");
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn candles_query_carries_data() {
        let (client, transport) = client();
        client
            .instrument_candles("EUR_USD", json!({"granularity": "M5", "count": 10}))
            .await
            .unwrap();

        let (_, url, _) = transport.requests().remove(0);
        assert!(url.contains("/v3/instruments/EUR_USD/candles?"), "got: {url}");
        assert!(url.contains("granularity=M5"), "got: {url}");
        assert!(url.contains("count=10"), "got: {url}");
    }

    #[tokio::test]
    async fn close_position_patches_units() {
        let (client, transport) = client();
        client
            .close_position("EUR_USD", json!({"longUnits": "ALL"}))
            .await
            .unwrap();

        let (method, url, body) = transport.requests().remove(0);
        assert_eq!(method, Method::PATCH);
        assert!(url.ends_with("/positions/EUR_USD/close"), "got: {url}");
        assert!(body.unwrap().contains("longUnits"));
    }

    #[tokio::test]
    async fn transaction_range_hits_idrange() {
        let (client, transport) = client();
        client
            .transaction_range(json!({"from": "6", "to": "10"}))
            .await
            .unwrap();

        let (_, url, _) = transport.requests().remove(0);
        assert!(url.contains("/transactions/idrange?"), "got: {url}");
        assert!(url.contains("from=6"), "got: {url}");
    }

    #[test]
    fn empty_credentials_rejected_at_construction() {
        let config = ClientConfig::new(Environment::Practice, "101", vec![]);
        let err = OandaClient::with_transports(
            config,
            Arc::new(RecordingTransport::default()),
            Arc::new(NoStream),
        )
        .err()
        .expect("construction must fail without credentials");
        assert!(matches!(err, Error::Config(_)), "got: {err}");
    }
}
