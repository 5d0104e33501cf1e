// LightningPayer backed by the node's router service. Transient
// transport trouble is retried here; only a terminal FAILED payment or
// exhausted retries surface as the permanent error the engine turns
// into a refund.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::time::sleep;

use crate::engine::{LightningPayer, PaymentOutcome};

use super::client::{LndClient, LndError};
use super::gen::lnrpc::payment::PaymentStatus;
use super::gen::lnrpc::PaymentFailureReason;

const PAYMENT_TIMEOUT: Duration = Duration::from_secs(120);
const PAYMENT_TIMEOUT_SECS: i32 = 60;
const SEND_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct LndPayer {
    client: Arc<LndClient>,
}

impl LndPayer {
    pub fn new(client: Arc<LndClient>) -> Arc<Self> {
        Arc::new(Self { client })
    }
}

#[async_trait]
impl LightningPayer for LndPayer {
    async fn pay_invoice(
        &self,
        payment_request: &str,
        amt_msats: Option<u64>,
        fee_limit_msats: u64,
    ) -> Result<PaymentOutcome, String> {
        let mut last_transport_error = String::new();
        for attempt in 1..=SEND_ATTEMPTS {
            let stream = match self
                .client
                .send_payment(
                    payment_request.to_string(),
                    amt_msats,
                    fee_limit_msats,
                    PAYMENT_TIMEOUT_SECS,
                )
                .await
            {
                Ok(stream) => stream,
                Err(LndError::Status(status))
                    if status.code() == tonic::Code::AlreadyExists =>
                {
                    // the node knows this payment; treat as in flight and track
                    return Err("payment already known to the node".to_string());
                }
                Err(e) => {
                    last_transport_error = e.to_string();
                    debug!("send_payment attempt {} failed: {}", attempt, e);
                    sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            let payment = match self
                .client
                .wait_for_payment_result(stream, PAYMENT_TIMEOUT)
                .await
            {
                Ok(Some(payment)) => payment,
                Ok(None) => return Err("payment stream ended without a result".to_string()),
                Err(e) => {
                    last_transport_error = e.to_string();
                    warn!("Payment tracking interrupted: {}", e);
                    sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            let status =
                PaymentStatus::try_from(payment.status).unwrap_or(PaymentStatus::Unknown);
            return match status {
                PaymentStatus::Succeeded => Ok(PaymentOutcome {
                    paid_msats: payment.value_msat.max(0) as u64,
                    fee_msats: payment.fee_msat.max(0) as u64,
                }),
                PaymentStatus::Failed => {
                    let reason = PaymentFailureReason::try_from(payment.failure_reason)
                        .unwrap_or(PaymentFailureReason::FailureReasonNone);
                    Err(reason.as_str_name().to_string())
                }
                other => Err(format!(
                    "payment left in non-terminal state {}",
                    other.as_str_name()
                )),
            };
        }
        Err(format!(
            "node unreachable after {} attempts: {}",
            SEND_ATTEMPTS, last_transport_error
        ))
    }
}
