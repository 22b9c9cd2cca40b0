//! `ChainRpc` over the Esplora REST API (blockstream.info, mempool.space).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chain_btc::types::{parse_txid, txid_to_hex, Input, Outpoint, Output, Transaction, Txid};
use chain_btc::BtcNetwork;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::rpc::{ChainRpc, RpcError, RpcResult};

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraPrevout {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraVin {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub prevout: Option<EsploraPrevout>,
    #[serde(default)]
    pub is_coinbase: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraVout {
    pub scriptpubkey: String,
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTx {
    pub txid: String,
    pub version: u32,
    pub locktime: u32,
    pub vin: Vec<EsploraVin>,
    pub vout: Vec<EsploraVout>,
    pub status: EsploraStatus,
}

impl EsploraTx {
    /// Convert to the ledger's transaction model. Coinbase inputs are
    /// dropped; they spend nothing a wallet can own.
    pub fn into_transaction(self) -> RpcResult<Transaction> {
        let txid = parse_txid(&self.txid).map_err(|e| RpcError::new(e.to_string()))?;

        let mut vin = Vec::with_capacity(self.vin.len());
        for input in self.vin.into_iter().filter(|i| !i.is_coinbase) {
            let spent = parse_txid(&input.txid).map_err(|e| RpcError::new(e.to_string()))?;
            vin.push(Input {
                outpoint: Outpoint::new(spent, input.vout),
                scriptpubkey_address: input
                    .prevout
                    .and_then(|p| p.scriptpubkey_address)
                    .unwrap_or_default(),
            });
        }

        let mut vout = Vec::with_capacity(self.vout.len());
        for (index, output) in self.vout.into_iter().enumerate() {
            vout.push(Output {
                outpoint: Outpoint::new(txid, index as u32),
                value: output.value,
                scriptpubkey_address: output.scriptpubkey_address.unwrap_or_default(),
                scriptpubkey: hex::decode(&output.scriptpubkey)
                    .map_err(|e| RpcError::new(format!("bad scriptpubkey in {}: {e}", self.txid)))?,
            });
        }

        Ok(Transaction {
            txid,
            version: self.version,
            locktime: self.locktime,
            vin,
            vout,
            block_height: self.status.block_height.filter(|_| self.status.confirmed),
        })
    }
}

pub fn tip_height_url(base: &str) -> String {
    format!("{base}/blocks/tip/height")
}

/// Confirmed history, newest first, 25 per page.
pub fn address_txs_url(base: &str, address: &str, last_seen_txid: Option<&Txid>) -> String {
    match last_seen_txid {
        Some(txid) => format!("{base}/address/{address}/txs/chain/{}", txid_to_hex(txid)),
        None => format!("{base}/address/{address}/txs/chain"),
    }
}

pub fn post_tx_url(base: &str) -> String {
    format!("{base}/tx")
}

pub fn tx_status_url(base: &str, txid: &str) -> String {
    format!("{base}/tx/{txid}/status")
}

pub struct EsploraRpc {
    client: Client,
    base_urls: BTreeMap<BtcNetwork, String>,
}

impl EsploraRpc {
    pub fn new(config: &WalletConfig) -> Result<Self, WalletError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| WalletError::InvalidConfig(format!("failed to create HTTP client: {e}")))?;
        let base_urls = BtcNetwork::ALL
            .into_iter()
            .map(|network| (network, config.rpc_url(network).to_string()))
            .collect();
        Ok(Self { client, base_urls })
    }

    fn base_url(&self, network: BtcNetwork) -> RpcResult<&str> {
        self.base_urls
            .get(&network)
            .map(String::as_str)
            .ok_or_else(|| RpcError::new(format!("no rpc url for {network}")))
    }

    async fn get_text(&self, url: &str) -> RpcResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RpcError::new(format!("HTTP request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RpcError::new(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(RpcError::new(format!("HTTP error {status}: {body}")));
        }
        Ok(body)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> RpcResult<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| RpcError::new(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl ChainRpc for EsploraRpc {
    async fn chain_height(&self, network: BtcNetwork) -> RpcResult<u32> {
        let body = self.get_text(&tip_height_url(self.base_url(network)?)).await?;
        body.trim()
            .parse()
            .map_err(|e| RpcError::new(format!("bad tip height {body:?}: {e}")))
    }

    async fn address_history(
        &self,
        network: BtcNetwork,
        address: &str,
        max_height: u32,
        last_seen_txid: Option<Txid>,
    ) -> RpcResult<Vec<Transaction>> {
        let base = self.base_url(network)?;
        let mut cursor = last_seen_txid;
        loop {
            let page: Vec<EsploraTx> = self
                .get_json(&address_txs_url(base, address, cursor.as_ref()))
                .await?;
            let Some(last) = page.last() else {
                return Ok(Vec::new());
            };
            let last_txid = parse_txid(&last.txid).map_err(|e| RpcError::new(e.to_string()))?;

            let txs = page
                .into_iter()
                .map(EsploraTx::into_transaction)
                .filter(|tx| {
                    tx.as_ref()
                        .map_or(true, |tx| tx.block_height.is_some_and(|h| h <= max_height))
                })
                .collect::<RpcResult<Vec<_>>>()?;
            if !txs.is_empty() {
                return Ok(txs);
            }
            // Whole page is above `max_height`; older history follows.
            debug!(%address, max_height, "skipping history page above max height");
            cursor = Some(last_txid);
        }
    }

    async fn post_transaction(&self, network: BtcNetwork, raw_tx: &[u8]) -> RpcResult<String> {
        let response = self
            .client
            .post(post_tx_url(self.base_url(network)?))
            .body(hex::encode(raw_tx))
            .send()
            .await
            .map_err(|e| RpcError::new(format!("HTTP request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RpcError::new(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            // Esplora returns the node's rejection reason as the body.
            return Err(RpcError::new(body.trim()));
        }
        Ok(body.trim().to_string())
    }

    async fn transaction_status(&self, network: BtcNetwork, txid: &str) -> RpcResult<bool> {
        let status: EsploraStatus = self
            .get_json(&tx_status_url(self.base_url(network)?, txid))
            .await?;
        Ok(status.confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TX_JSON: &str = r#"{
        "txid": "0101010101010101010101010101010101010101010101010101010101010101",
        "version": 2,
        "locktime": 799999,
        "vin": [{
            "txid": "0202020202020202020202020202020202020202020202020202020202020202",
            "vout": 1,
            "prevout": {
                "scriptpubkey": "0014751e76e8199196d454941c45d1b3a323f1433bd6",
                "scriptpubkey_address": "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
                "value": 20000
            },
            "is_coinbase": false,
            "sequence": 4294967293
        }],
        "vout": [
            {
                "scriptpubkey": "0014751e76e8199196d454941c45d1b3a323f1433bd6",
                "scriptpubkey_address": "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
                "value": 15000
            },
            { "scriptpubkey": "6a0568656c6c6f", "value": 0 }
        ],
        "status": { "confirmed": true, "block_height": 800000, "block_hash": "00" }
    }"#;

    #[test]
    fn converts_esplora_transaction() {
        let tx: EsploraTx = serde_json::from_str(TX_JSON).unwrap();
        let tx = tx.into_transaction().unwrap();

        assert_eq!(tx.txid, [1; 32]);
        assert_eq!(tx.locktime, 799_999);
        assert_eq!(tx.block_height, Some(800_000));
        assert_eq!(tx.vin[0].outpoint, Outpoint::new([2; 32], 1));
        assert_eq!(tx.vin[0].scriptpubkey_address, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");
        assert_eq!(tx.vout.len(), 2);
        assert_eq!(tx.vout[0].outpoint, Outpoint::new([1; 32], 0));
        assert_eq!(tx.vout[0].value, 15_000);
        assert_eq!(tx.vout[0].scriptpubkey.len(), 22);
        assert_eq!(tx.vout[1].scriptpubkey_address, "");
    }

    #[test]
    fn coinbase_inputs_are_dropped() {
        let json = r#"{
            "txid": "0303030303030303030303030303030303030303030303030303030303030303",
            "version": 1,
            "locktime": 0,
            "vin": [{
                "txid": "0000000000000000000000000000000000000000000000000000000000000000",
                "vout": 4294967295,
                "prevout": null,
                "is_coinbase": true
            }],
            "vout": [{ "scriptpubkey": "51", "value": 625000000 }],
            "status": { "confirmed": true, "block_height": 10 }
        }"#;
        let tx: EsploraTx = serde_json::from_str(json).unwrap();
        let tx = tx.into_transaction().unwrap();
        assert!(tx.vin.is_empty());
        assert_eq!(tx.vout[0].value, 625_000_000);
    }

    #[test]
    fn unconfirmed_has_no_height() {
        let json = TX_JSON.replace(
            r#"{ "confirmed": true, "block_height": 800000, "block_hash": "00" }"#,
            r#"{ "confirmed": false }"#,
        );
        let tx: EsploraTx = serde_json::from_str(&json).unwrap();
        assert_eq!(tx.into_transaction().unwrap().block_height, None);
    }

    #[test]
    fn bad_txid_is_rpc_error() {
        let json = TX_JSON.replacen("0101010101010101010101010101010101010101010101010101010101010101", "xyz", 1);
        let tx: EsploraTx = serde_json::from_str(&json).unwrap();
        assert!(tx.into_transaction().is_err());
    }

    #[test]
    fn builds_urls() {
        let base = "https://blockstream.info/testnet/api";
        assert_eq!(tip_height_url(base), format!("{base}/blocks/tip/height"));
        assert_eq!(
            address_txs_url(base, "tb1qxyz", None),
            format!("{base}/address/tb1qxyz/txs/chain")
        );
        assert_eq!(
            address_txs_url(base, "tb1qxyz", Some(&[0xab; 32])),
            format!("{base}/address/tb1qxyz/txs/chain/{}", "ab".repeat(32))
        );
        assert_eq!(post_tx_url(base), format!("{base}/tx"));
        assert_eq!(tx_status_url(base, "ff"), format!("{base}/tx/ff/status"));
    }

    #[test]
    fn client_uses_configured_urls() {
        let config =
            WalletConfig::from_json(r#"{ "mainnet_rpc_url": "http://localhost:3000/" }"#).unwrap();
        let rpc = EsploraRpc::new(&config).unwrap();
        assert_eq!(rpc.base_url(BtcNetwork::Mainnet).unwrap(), "http://localhost:3000");
        assert_eq!(
            rpc.base_url(BtcNetwork::Testnet).unwrap(),
            chain_btc::network::TESTNET_RPC
        );
    }
}
