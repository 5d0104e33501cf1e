// Thin wrapper around the node's gRPC surface: TLS channel, macaroon
// metadata on every call, per-call deadlines on unary calls. Streams
// carry no transport deadline; liveness is handled at the application
// level by the watcher.

use std::time::Duration;

use log::{debug, trace};
use thiserror::Error;
use tonic::codec::Streaming;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};

use v4vapp_common::config::LND_UNARY_TIMEOUT;

use super::gen::lnrpc;
use super::gen::lnrpc::lightning_client::LightningClient;
use super::gen::routerrpc;
use super::gen::routerrpc::router_client::RouterClient;

#[derive(Debug, Error)]
pub enum LndError {
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
    #[error(transparent)]
    Status(#[from] Status),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Macaroon is not valid metadata")]
    InvalidMacaroon,
    #[error("LN node call timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

#[derive(Clone)]
pub struct MacaroonInterceptor {
    macaroon: MetadataValue<Ascii>,
}

impl Interceptor for MacaroonInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request.metadata_mut().insert("macaroon", self.macaroon.clone());
        Ok(request)
    }
}

type InterceptedChannel = InterceptedService<Channel, MacaroonInterceptor>;

pub struct LndClient {
    lightning: LightningClient<InterceptedChannel>,
    router: RouterClient<InterceptedChannel>,
    node_alias: String,
}

impl LndClient {
    pub async fn connect(
        address: &str,
        tls_cert_path: &str,
        macaroon_path: &str,
    ) -> Result<Self, LndError> {
        let cert = tokio::fs::read(tls_cert_path).await?;
        let macaroon_bytes = tokio::fs::read(macaroon_path).await?;
        let macaroon: MetadataValue<Ascii> = hex::encode(macaroon_bytes)
            .parse()
            .map_err(|_| LndError::InvalidMacaroon)?;

        let tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(cert));
        let channel = Endpoint::from_shared(format!("https://{}", address))?
            .tls_config(tls)?
            .connect()
            .await?;

        let interceptor = MacaroonInterceptor { macaroon };
        let lightning =
            LightningClient::with_interceptor(channel.clone(), interceptor.clone());
        let router = RouterClient::with_interceptor(channel, interceptor);

        let mut client = Self {
            lightning,
            router,
            node_alias: String::new(),
        };
        let info = client.get_info().await?;
        debug!(
            "Connected to LN node {} running {}",
            info.alias, info.version
        );
        client.node_alias = info.alias;
        Ok(client)
    }

    pub fn node_alias(&self) -> &str {
        &self.node_alias
    }

    pub async fn get_info(&self) -> Result<lnrpc::GetInfoResponse, LndError> {
        trace!("lnd get_info");
        let mut lightning = self.lightning.clone();
        let response = tokio::time::timeout(
            LND_UNARY_TIMEOUT,
            lightning.get_info(lnrpc::GetInfoRequest {}),
        )
        .await??;
        Ok(response.into_inner())
    }

    pub async fn decode_pay_req(&self, pay_req: &str) -> Result<lnrpc::PayReq, LndError> {
        trace!("lnd decode_pay_req");
        let mut lightning = self.lightning.clone();
        let response = tokio::time::timeout(
            LND_UNARY_TIMEOUT,
            lightning.decode_pay_req(lnrpc::PayReqString {
                pay_req: pay_req.to_string(),
            }),
        )
        .await??;
        Ok(response.into_inner())
    }

    pub async fn add_invoice(
        &self,
        value_msat: u64,
        memo: String,
        expiry_secs: u64,
    ) -> Result<lnrpc::AddInvoiceResponse, LndError> {
        trace!("lnd add_invoice");
        let mut lightning = self.lightning.clone();
        let invoice = lnrpc::Invoice {
            memo,
            value_msat: value_msat as i64,
            expiry: expiry_secs as i64,
            ..Default::default()
        };
        let response =
            tokio::time::timeout(LND_UNARY_TIMEOUT, lightning.add_invoice(invoice)).await??;
        Ok(response.into_inner())
    }

    pub async fn list_payments(
        &self,
        index_offset: u64,
        max_payments: u64,
    ) -> Result<lnrpc::ListPaymentsResponse, LndError> {
        trace!("lnd list_payments from {}", index_offset);
        let mut lightning = self.lightning.clone();
        let response = tokio::time::timeout(
            LND_UNARY_TIMEOUT,
            lightning.list_payments(lnrpc::ListPaymentsRequest {
                include_incomplete: true,
                index_offset,
                max_payments,
                reversed: false,
            }),
        )
        .await??;
        Ok(response.into_inner())
    }

    pub async fn forwarding_history(
        &self,
        start_time_secs: u64,
        num_max_events: u32,
    ) -> Result<lnrpc::ForwardingHistoryResponse, LndError> {
        trace!("lnd forwarding_history from {}", start_time_secs);
        let mut lightning = self.lightning.clone();
        let response = tokio::time::timeout(
            LND_UNARY_TIMEOUT,
            lightning.forwarding_history(lnrpc::ForwardingHistoryRequest {
                start_time: start_time_secs,
                end_time: 0,
                index_offset: 0,
                num_max_events,
            }),
        )
        .await??;
        Ok(response.into_inner())
    }

    // Resumable invoice stream; the node replays everything above the
    // given indices before switching to live updates
    pub async fn subscribe_invoices(
        &self,
        add_index: u64,
        settle_index: u64,
    ) -> Result<Streaming<lnrpc::Invoice>, LndError> {
        trace!("lnd subscribe_invoices from add {}", add_index);
        let mut lightning = self.lightning.clone();
        let response = lightning
            .subscribe_invoices(lnrpc::InvoiceSubscription {
                add_index,
                settle_index,
            })
            .await?;
        Ok(response.into_inner())
    }

    // Pay a BOLT-11 invoice; only the terminal update is streamed back
    pub async fn send_payment(
        &self,
        payment_request: String,
        amt_msat: Option<u64>,
        fee_limit_msat: u64,
        timeout_seconds: i32,
    ) -> Result<Streaming<lnrpc::Payment>, LndError> {
        debug!("lnd send_payment fee limit {} msats", fee_limit_msat);
        let mut router = self.router.clone();
        let response = router
            .send_payment_v2(routerrpc::SendPaymentRequest {
                payment_request,
                timeout_seconds,
                amt_msat: amt_msat.map(|v| v as i64).unwrap_or(0),
                fee_limit_msat: fee_limit_msat as i64,
                no_inflight_updates: true,
            })
            .await?;
        Ok(response.into_inner())
    }

    pub async fn track_payments(&self) -> Result<Streaming<lnrpc::Payment>, LndError> {
        trace!("lnd track_payments");
        let mut router = self.router.clone();
        let response = router
            .track_payments(routerrpc::TrackPaymentsRequest {
                no_inflight_updates: true,
            })
            .await?;
        Ok(response.into_inner())
    }

    pub async fn subscribe_htlc_events(
        &self,
    ) -> Result<Streaming<routerrpc::HtlcEvent>, LndError> {
        trace!("lnd subscribe_htlc_events");
        let mut router = self.router.clone();
        let response = router
            .subscribe_htlc_events(routerrpc::SubscribeHtlcEventsRequest {})
            .await?;
        Ok(response.into_inner())
    }

    pub async fn wait_for_payment_result(
        &self,
        mut stream: Streaming<lnrpc::Payment>,
        deadline: Duration,
    ) -> Result<Option<lnrpc::Payment>, LndError> {
        let result = tokio::time::timeout(deadline, async {
            let mut last = None;
            while let Some(payment) = stream.message().await? {
                let status = payment.status;
                last = Some(payment);
                if status == lnrpc::payment::PaymentStatus::Succeeded as i32
                    || status == lnrpc::payment::PaymentStatus::Failed as i32
                {
                    break;
                }
            }
            Ok::<_, Status>(last)
        })
        .await??;
        Ok(result)
    }
}
