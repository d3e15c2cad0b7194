//! Solana RPC client and the [`ChainDataProvider`] implementation on top of it
//!
//! The client is built with an explicit reqwest client so system proxy
//! detection (which can panic on some macOS setups) is skipped when no proxy
//! is configured.

use async_trait::async_trait;
use serde_json::json;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::{RpcError, RpcRequest};
use solana_commitment_config::CommitmentConfig;
use solana_rpc_client::http_sender::HttpSender;
use solana_rpc_client::rpc_client::RpcClientConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use std::env;
use std::str::FromStr;
use tracing::warn;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{ChainDataProvider, SignatureRecord, TransactionDetails};

/// Build a nonblocking RpcClient, with system proxy disabled when none is configured.
pub fn new_rpc_client(url: &str, commitment: CommitmentConfig) -> RpcClient {
    let mut builder = reqwest_012::Client::builder();

    if should_disable_proxy() {
        builder = builder.no_proxy();
    }

    let client = builder.build().unwrap_or_else(|err| {
        warn!(error = %err, "Failed to build custom RPC client; falling back to default client");
        reqwest_012::Client::new()
    });
    let sender = HttpSender::new_with_client(url.to_string(), client);
    RpcClient::new_sender(sender, RpcClientConfig::with_commitment(commitment))
}

fn should_disable_proxy() -> bool {
    if !cfg!(target_os = "macos") {
        return false;
    }

    if env::var_os("WALLET_HISTORY_NO_PROXY").is_some() {
        return true;
    }

    if env::var_os("WALLET_HISTORY_USE_PROXY").is_some() {
        return false;
    }

    let proxy_env_vars = [
        "HTTP_PROXY",
        "HTTPS_PROXY",
        "ALL_PROXY",
        "http_proxy",
        "https_proxy",
        "all_proxy",
    ];

    !proxy_env_vars.iter().any(|key| env::var_os(key).is_some())
}

// =============================================================================
// Provider
// =============================================================================

/// Chain data provider backed by Solana JSON-RPC
pub struct SolanaRpcProvider {
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl SolanaRpcProvider {
    pub fn new(url: &str) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            client: new_rpc_client(url, commitment),
            commitment,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }
}

#[async_trait]
impl ChainDataProvider for SolanaRpcProvider {
    async fn signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        before: Option<&str>,
    ) -> ProviderResult<Vec<SignatureRecord>> {
        let pubkey = Pubkey::from_str(address).map_err(|e| ProviderError::InvalidAddress(format!("{}: {}", address, e)))?;
        let before = before
            .map(|s| Signature::from_str(s).map_err(|e| ProviderError::InvalidSignature(format!("{}: {}", s, e))))
            .transpose()?;

        let statuses = self
            .client
            .get_signatures_for_address_with_config(
                &pubkey,
                GetConfirmedSignaturesForAddress2Config {
                    before,
                    until: None,
                    limit: Some(limit),
                    commitment: Some(self.commitment),
                },
            )
            .await
            .map_err(classify_client_error)?;

        Ok(statuses
            .into_iter()
            .map(|s| SignatureRecord {
                signature: s.signature,
                block_time: s.block_time,
            })
            .collect())
    }

    async fn transaction(&self, signature: &str) -> ProviderResult<Option<TransactionDetails>> {
        let sig = Signature::from_str(signature)
            .map_err(|e| ProviderError::InvalidSignature(format!("{}: {}", signature, e)))?;

        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };

        // getTransaction answers `null` for unknown signatures
        let response: Option<EncodedConfirmedTransactionWithStatusMeta> = self
            .client
            .send(RpcRequest::GetTransaction, json!([sig.to_string(), config]))
            .await
            .map_err(classify_client_error)?;

        let Some(confirmed) = response else {
            return Ok(None);
        };

        decode_transaction(confirmed)
    }
}

/// Flatten an encoded transaction into index-aligned keys and balances.
/// `Ok(None)` when the transaction carries no status metadata.
fn decode_transaction(
    confirmed: EncodedConfirmedTransactionWithStatusMeta,
) -> ProviderResult<Option<TransactionDetails>> {
    let block_time = confirmed.block_time;
    let encoded = confirmed.transaction;

    let Some(meta) = encoded.meta else {
        return Ok(None);
    };

    let versioned = encoded
        .transaction
        .decode()
        .ok_or_else(|| ProviderError::Decode("undecodable transaction payload".to_string()))?;

    // Balance arrays cover static keys, then lookup-table writable, then readonly
    let mut account_keys: Vec<String> = versioned
        .message
        .static_account_keys()
        .iter()
        .map(|k| k.to_string())
        .collect();
    if let OptionSerializer::Some(loaded) = &meta.loaded_addresses {
        account_keys.extend(loaded.writable.iter().cloned());
        account_keys.extend(loaded.readonly.iter().cloned());
    }

    Ok(Some(TransactionDetails {
        account_keys,
        pre_balances: meta.pre_balances,
        post_balances: meta.post_balances,
        block_time,
    }))
}

/// Map client errors onto the provider taxonomy, singling out rate limiting.
fn classify_client_error(err: ClientError) -> ProviderError {
    let message = err.to_string();

    let rate_limited = match err.kind() {
        ClientErrorKind::Reqwest(e) => e.status().is_some_and(|s| s.as_u16() == 429),
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. }) => *code == 429,
        _ => false,
    } || is_rate_limit_message(&message);

    if rate_limited {
        return ProviderError::RateLimited(message);
    }

    match err.kind() {
        ClientErrorKind::SerdeJson(_) => ProviderError::Decode(message),
        _ => ProviderError::Rpc(message),
    }
}

/// Whether an error message is a "429 Too Many Requests" style rejection
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("too many requests") || lower.contains("rate limit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::message::Message;
    #[allow(deprecated)]
    use solana_sdk::transaction::Transaction;
    use solana_transaction_status::{EncodedTransactionWithStatusMeta, Encodable, UiTransactionStatusMeta};

    const WRITABLE: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const READONLY: &str = "Df9nkXFqWJsm1pjjjfZ1R7uFKkwoSBcAvEYyjy36pVjz";

    /// A one-key legacy transaction in base64, as getTransaction returns it
    fn confirmed(payer: &Pubkey, meta: Option<UiTransactionStatusMeta>) -> EncodedConfirmedTransactionWithStatusMeta {
        #[allow(deprecated)]
        let tx = Transaction::new_unsigned(Message::new(&[], Some(payer)));
        EncodedConfirmedTransactionWithStatusMeta {
            slot: 42,
            transaction: EncodedTransactionWithStatusMeta {
                transaction: tx.encode(UiTransactionEncoding::Base64),
                meta,
                version: None,
            },
            block_time: Some(1_700_000_000),
        }
    }

    fn meta_with_loaded_addresses() -> UiTransactionStatusMeta {
        serde_json::from_value(json!({
            "err": null,
            "status": { "Ok": null },
            "fee": 5000,
            "preBalances": [1_000_000, 200, 300],
            "postBalances": [995_000, 5_200, 300],
            "loadedAddresses": { "writable": [WRITABLE], "readonly": [READONLY] }
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_orders_static_then_writable_then_readonly_keys() {
        let payer = Pubkey::new_unique();
        let details = decode_transaction(confirmed(&payer, Some(meta_with_loaded_addresses())))
            .unwrap()
            .unwrap();

        assert_eq!(details.account_keys, vec![payer.to_string(), WRITABLE.to_string(), READONLY.to_string()]);
        assert_eq!(details.pre_balances, vec![1_000_000, 200, 300]);
        assert_eq!(details.post_balances, vec![995_000, 5_200, 300]);
        assert_eq!(details.block_time, Some(1_700_000_000));
    }

    #[test]
    fn test_decode_without_meta_is_none() {
        let payer = Pubkey::new_unique();
        assert_eq!(decode_transaction(confirmed(&payer, None)).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_unreadable_payload() {
        let payer = Pubkey::new_unique();
        let mut tx = confirmed(&payer, Some(meta_with_loaded_addresses()));
        tx.transaction.transaction =
            solana_transaction_status::EncodedTransaction::LegacyBinary("not base58 at all!".to_string());
        assert!(matches!(decode_transaction(tx), Err(ProviderError::Decode(_))));
    }

    #[test]
    fn test_rate_limit_messages() {
        assert!(is_rate_limit_message(
            "HTTP status client error (429 Too Many Requests) for url (https://api.mainnet-beta.solana.com/)"
        ));
        assert!(is_rate_limit_message("Server responded with 429 too many requests"));
        assert!(is_rate_limit_message("RPC response error -32005: rate limit exceeded"));
        assert!(!is_rate_limit_message("error sending request: connection refused"));
    }

    #[test]
    fn test_custom_client_error_classification() {
        let err = ClientError::from(ClientErrorKind::Custom("429 Too Many Requests".to_string()));
        assert!(classify_client_error(err).is_rate_limited());

        let err = ClientError::from(ClientErrorKind::Custom("node is behind".to_string()));
        assert!(matches!(classify_client_error(err), ProviderError::Rpc(_)));
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_network() {
        let provider = SolanaRpcProvider::new("http://127.0.0.1:1");
        let err = provider
            .signatures_for_address("not-a-pubkey", 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected_before_network() {
        let provider = SolanaRpcProvider::new("http://127.0.0.1:1");
        let err = provider.transaction("bogus").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidSignature(_)));
    }
}
