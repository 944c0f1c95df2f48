//! Local RTGS peer
//!
//! Hosts the configured channels, installs the settlement chaincode on every
//! channel but the funding channel and the funding chaincode on that one,
//! then executes proposals read from stdin, one JSON object per line:
//!
//! ```text
//! {"channel":"bilateralchannel","chaincode":"bilateralchannel_cc","caller":"regulator","function":"initLedger"}
//! ```
//!
//! Each result is written to stdout as one JSON line.

use anyhow::Context;
use ledger_core::{spawn_peer_actor, Network, Proposal};
use settlement::{FundingContract, SettlementContract};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let peer_config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => ledger_core::Config::from_file(&path)
            .with_context(|| format!("loading peer config {}", path))?,
        Err(_) => ledger_core::Config::from_env().context("reading peer config from env")?,
    };
    let chaincode_config = match std::env::var("RTGS_CONFIG") {
        Ok(path) => settlement::Config::from_file(&path)
            .with_context(|| format!("loading chaincode config {}", path))?,
        Err(_) => settlement::Config::from_env().context("reading chaincode config from env")?,
    };

    tracing::info!(
        service = %peer_config.service_name,
        version = %peer_config.service_version,
        "Starting RTGS peer"
    );

    let network = Network::from_config(&peer_config)?;
    let funding_channel = chaincode_config.funding_channel();
    let settlement_cc = Arc::new(SettlementContract::new(chaincode_config.clone())?);
    let funding_cc = Arc::new(FundingContract::new(chaincode_config.clone()));
    for channel in &peer_config.channels {
        if channel == &funding_channel {
            network.install(channel, chaincode_config.funding_chaincode_name.clone(), funding_cc.clone())?;
        } else {
            network.install(channel, chaincode_config.bilateral_chaincode_name.clone(), settlement_cc.clone())?;
        }
    }

    let peer = spawn_peer_actor(Arc::new(network), peer_config.mailbox_capacity);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let proposal: Proposal = match serde_json::from_str(&line) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed proposal");
                continue;
            }
        };
        let result = peer.submit(proposal).await?;
        let mut out = serde_json::to_vec(&result)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    peer.shutdown().await?;
    tracing::info!("Shutting down RTGS peer");
    Ok(())
}
