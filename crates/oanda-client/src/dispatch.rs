//! Retrying dispatcher
//!
//! Orchestrates pool, builder, and transport for one logical call. The retry
//! policy runs on two tracks:
//!
//! - auth failures exclude the rejected credential for the rest of the call
//!   and immediately try a different key without sleeping, since the failure
//!   is attributable to the key, not the network;
//! - rate limits, server errors, and transport failures back off and retry
//!   with the same exclusion set; the key stays eligible because the failure
//!   was not its fault.
//!
//! Decode failures and non-auth 4xx rejections surface immediately: the
//! payload is wrong and retrying will not fix it. Exclusions live only for
//! the duration of one logical call; a key rejected here is offered again to
//! the next call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use oanda_pool::CredentialPool;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::config::ClientConfig;
use crate::decode;
use crate::error::{Error, FailureKind, Result};
use crate::request::{RequestBuilder, RequestSpec};
use crate::transport::{AttemptOutcome, Transport};

pub struct Dispatcher {
    pool: Arc<CredentialPool>,
    builder: RequestBuilder,
    transport: Arc<dyn Transport>,
    retry_budget: u32,
    backoff_initial: Duration,
    backoff_ceiling: Duration,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<CredentialPool>,
        builder: RequestBuilder,
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            pool,
            builder,
            transport,
            retry_budget: config.retry_budget,
            backoff_initial: config.backoff_initial,
            backoff_ceiling: config.backoff_ceiling,
        }
    }

    /// Execute one logical call and return its decoded, key-normalized body.
    ///
    /// Attempt budget is pool size plus the configured retry budget. Each
    /// attempt acquires exactly one credential and releases it before any
    /// backoff wait; a credential is never held across attempts.
    #[instrument(skip_all, fields(method = %spec.method, path = %spec.path))]
    pub async fn execute(&self, spec: &RequestSpec) -> Result<Value> {
        let call_id = Uuid::new_v4();
        let max_attempts = self.pool.len() as u32 + self.retry_budget;
        let mut excluded: HashSet<String> = HashSet::new();
        let mut backoff = BackoffPolicy::new(self.backoff_initial, self.backoff_ceiling);
        let mut attempts = 0u32;
        let mut last: Option<FailureKind> = None;

        while attempts < max_attempts {
            let lease = match self.pool.acquire(&excluded) {
                Ok(lease) => lease,
                Err(oanda_pool::Error::PoolExhausted { total, .. }) => {
                    warn!(%call_id, attempts, total, "no eligible credential left");
                    break;
                }
            };
            let identity = lease.identity().to_string();
            let prepared = self.builder.build(spec, lease.secret())?;

            attempts += 1;
            debug!(%call_id, attempt = attempts, identity = %identity, "attempt started");
            let outcome = self.transport.send(&prepared).await;
            debug!(%call_id, attempt = attempts, outcome = outcome.label(), "attempt finished");
            // Release the credential before any sleep; leases never span
            // a backoff wait.
            drop(lease);

            match outcome {
                AttemptOutcome::Success { body, status } => {
                    debug!(%call_id, status, attempts, "call succeeded");
                    return decode::decode(&body);
                }
                AttemptOutcome::AuthFailure { status } => {
                    warn!(%call_id, status, identity = %identity, "credential rejected, rotating");
                    excluded.insert(identity);
                    last = Some(FailureKind::Auth { status });
                }
                // Backoff sleeps only happen when another attempt follows;
                // a spent budget surfaces its error immediately.
                AttemptOutcome::RateLimited {
                    status,
                    retry_after,
                } => {
                    last = Some(FailureKind::RateLimited { status });
                    if attempts < max_attempts {
                        let delay = retry_after
                            .unwrap_or_else(|| backoff.next_delay())
                            .min(self.backoff_ceiling);
                        info!(%call_id, status, delay_ms = delay.as_millis() as u64, "rate limited, retry scheduled");
                        tokio::time::sleep(delay).await;
                    }
                }
                AttemptOutcome::ServerError { status } => {
                    last = Some(FailureKind::Server { status });
                    if attempts < max_attempts {
                        let delay = backoff.next_delay();
                        info!(%call_id, status, delay_ms = delay.as_millis() as u64, "server error, retry scheduled");
                        tokio::time::sleep(delay).await;
                    }
                }
                AttemptOutcome::TransportFailure { cause } => {
                    last = Some(FailureKind::Transport { cause });
                    if attempts < max_attempts {
                        let delay = backoff.next_delay();
                        info!(%call_id, delay_ms = delay.as_millis() as u64, "transport failure, retry scheduled");
                        tokio::time::sleep(delay).await;
                    }
                }
                AttemptOutcome::ClientError { status, body } => {
                    warn!(%call_id, status, "request rejected by remote, not retrying");
                    return Err(Error::RejectedByRemote { status, body });
                }
            }
        }

        match last {
            Some(last) => {
                warn!(%call_id, attempts, last = %last, "retry budget exhausted");
                Err(Error::CallFailed { attempts, last })
            }
            // No attempt was ever made: the pool had nothing to offer.
            None => Err(Error::PoolExhausted),
        }
    }
}
