// Lightning-address resolution: turn user@host into a BOLT-11 invoice
// via the target's LNURL-pay well-known endpoint before paying.

use std::time::Duration;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LnAddressError {
    #[error("'{0}' is not a lightning address")]
    InvalidAddress(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Pay endpoint rejected the request: {0}")]
    Rejected(String),
    #[error("Amount {amount_msats} msats outside [{min_msats}, {max_msats}]")]
    AmountOutOfRange {
        amount_msats: u64,
        min_msats: u64,
        max_msats: u64,
    },
}

#[derive(Debug, Deserialize)]
struct PayParams {
    callback: String,
    #[serde(rename = "minSendable")]
    min_sendable: u64,
    #[serde(rename = "maxSendable")]
    max_sendable: u64,
}

#[derive(Debug, Deserialize)]
struct CallbackResponse {
    pr: Option<String>,
    status: Option<String>,
    reason: Option<String>,
}

pub fn is_lightning_address(candidate: &str) -> bool {
    split_address(candidate).is_some()
}

fn split_address(candidate: &str) -> Option<(&str, &str)> {
    let (user, host) = candidate.trim().split_once('@')?;
    if user.is_empty() || host.is_empty() || !host.contains('.') || host.contains('/') {
        return None;
    }
    if !user
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return None;
    }
    Some((user, host))
}

pub struct LnAddressResolver {
    http: reqwest::Client,
}

impl LnAddressResolver {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    // Resolve an address to a BOLT-11 payment request for the given amount
    pub async fn resolve(
        &self,
        address: &str,
        amount_msats: u64,
    ) -> Result<String, LnAddressError> {
        let (user, host) = split_address(address)
            .ok_or_else(|| LnAddressError::InvalidAddress(address.to_string()))?;

        let url = format!("https://{}/.well-known/lnurlp/{}", host, user);
        debug!("Resolving lightning address via {}", url);
        let params: PayParams = self.http.get(&url).send().await?.json().await?;

        if amount_msats < params.min_sendable || amount_msats > params.max_sendable {
            return Err(LnAddressError::AmountOutOfRange {
                amount_msats,
                min_msats: params.min_sendable,
                max_msats: params.max_sendable,
            });
        }

        let separator = if params.callback.contains('?') { '&' } else { '?' };
        let callback = format!("{}{}amount={}", params.callback, separator, amount_msats);
        let response: CallbackResponse = self.http.get(&callback).send().await?.json().await?;

        if let Some(pr) = response.pr {
            return Ok(pr);
        }
        Err(LnAddressError::Rejected(
            response
                .reason
                .or(response.status)
                .unwrap_or_else(|| "no payment request returned".to_string()),
        ))
    }
}
