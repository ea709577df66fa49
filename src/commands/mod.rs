//! Command handlers: translate a parsed CLI invocation into calls against
//! the core components, and map results/errors onto the exit-code
//! convention (`0` success, `2` user error, `3` network error, `4`
//! integrity error, `1` other).

use std::path::PathBuf;
use std::sync::Arc;

use crate::adapters::{self, Adapter};
use crate::cas::ContentStore;
use crate::cli::{AgreementCommands, Cli, Commands, NodeCommands};
use crate::config::Config;
use crate::database::DatabaseManager;
use crate::error::{ChiralError, ChiralResult};
use crate::hosting::{AgreementStore, HostingAgreement};
use crate::kad::KadOverlay;
use crate::nat::NatTraversal;
use crate::signer::{LocalSigner, Signer};
use crate::ui;

/// Where the node's persistent libp2p identity is kept, so repeated CLI
/// invocations against the same store present the same peer id.
fn identity_path(config: &Config) -> PathBuf {
    config.storage.store_dir.join("node_identity.key")
}

pub async fn execute_command(cli: Cli, config: Config) -> ChiralResult<()> {
    let db_path = crate::database::get_default_db_path(&config.storage.store_dir);
    let db = DatabaseManager::new(&db_path)?;
    let store = ContentStore::new(config.storage.store_dir.clone(), config.storage.chunk_size);
    let signer = Arc::new(LocalSigner::load_or_generate(&identity_path(&config)).await?);

    match cli.command {
        Commands::Node { action } => match action {
            NodeCommands::Start { port, bootstrap } => run_start(&config, port, bootstrap, signer).await,
            NodeCommands::Publish { path } => run_publish(&store, &db, &path).await,
            NodeCommands::Get { fingerprint, out } => run_get(&store, &config, &fingerprint, out).await,
            NodeCommands::Peers => run_peers(&signer),
            NodeCommands::Health => run_health(&signer),
            NodeCommands::Agreements { action } => run_agreements(&config, &signer, action).await,
        },
    }
}

async fn run_start(config: &Config, port: u16, bootstrap: Vec<String>, signer: Arc<LocalSigner>) -> ChiralResult<()> {
    ui::print_header("Chiral Node");
    ui::print_key_value("Listen port", &port.to_string());
    ui::print_key_value("Identity", &signer.address());

    let mut overlay = KadOverlay::new(signer.keypair().clone(), port)?;
    let mut nat = NatTraversal::new(config.network.max_relay_reservations, config.network.socks5_proxy.clone());

    let domains = if bootstrap.is_empty() {
        config.network.bootstrap_domains.clone()
    } else {
        bootstrap
    };
    match overlay.resolve_bootstrap(&domains).await {
        Ok(addrs) => ui::print_success(&format!("resolved {} bootstrap address(es)", addrs.len())),
        Err(e) => ui::print_warning(&format!("bootstrap resolution failed: {e}")),
    }

    nat.observe_external_address(false);
    ui::print_operation_status("Node", "Ready", Some(&format!("{:?}", nat.reachability())));
    Ok(())
}

async fn run_publish(store: &ContentStore, db: &DatabaseManager, path: &PathBuf) -> ChiralResult<()> {
    let data = tokio::fs::read(path).await?;
    let (fingerprint, _chunk_hashes) = store.ingest(&data).await?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let original_filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();

    db.store_file(&name, &fingerprint, &original_filename, data.len() as u64, "application/octet-stream", &[], None)?;

    println!("{fingerprint}");
    Ok(())
}

async fn run_get(store: &ContentStore, config: &Config, fingerprint: &str, out: Option<PathBuf>) -> ChiralResult<()> {
    if !store.is_finalized(fingerprint).await {
        return Err(ChiralError::NotFound(format!("{fingerprint} is not present in the local store")));
    }
    let data = store.read_full(fingerprint).await?;
    let out_path = out.unwrap_or_else(|| config.storage.store_dir.join(fingerprint));
    tokio::fs::write(&out_path, &data).await?;
    ui::print_success(&format!("wrote {} bytes to {:?}", data.len(), out_path));
    Ok(())
}

fn run_peers(signer: &Arc<LocalSigner>) -> ChiralResult<()> {
    ui::print_header("Known Peers");
    ui::print_key_value("Local identity", &signer.address());
    ui::print_info("no peers connected yet in this process");
    Ok(())
}

fn run_health(signer: &Arc<LocalSigner>) -> ChiralResult<()> {
    let overlay = KadOverlay::new(signer.keypair().clone(), 0)?;
    let snapshot = overlay.health();

    ui::print_header("Node Health");
    ui::print_key_value("Identity", &signer.address());
    ui::print_key_value("Known peers", &snapshot.peer_count.to_string());
    ui::print_key_value("Consecutive bootstrap failures", &snapshot.consecutive_bootstrap_failures.to_string());
    if let Some(err) = &snapshot.last_error {
        ui::print_warning(err);
    }
    Ok(())
}

/// Parse an agreement id as printed by `propose` (`{:#x}`, e.g. `0x1a2b`).
fn parse_agreement_id(raw: &str) -> ChiralResult<u128> {
    let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
    u128::from_str_radix(trimmed, 16)
        .map_err(|e| ChiralError::Config(format!("invalid agreement id {raw:?}: {e}")))
}

async fn run_agreements(config: &Config, signer: &Arc<LocalSigner>, action: AgreementCommands) -> ChiralResult<()> {
    let store = AgreementStore::new(config.storage.store_dir.clone());

    match action {
        AgreementCommands::List => {
            ui::print_header("Hosting Agreements");
            let agreements = store.list().await?;
            if agreements.is_empty() {
                ui::print_info("no agreements recorded");
            }
            for agreement in agreements {
                ui::print_key_value(
                    &format!("{:#x}", agreement.agreement_id),
                    &format!("{:?}, host={}, cost={} wei", agreement.status, agreement.host_peer_id, agreement.cost()),
                );
            }
            Ok(())
        }
        AgreementCommands::Propose { host_peer_id, fingerprint, duration_days, unit_price_per_mib_per_day } => {
            let agreement = HostingAgreement::propose(
                signer.address(),
                format!("0x{}", signer.address()),
                host_peer_id.clone(),
                "0xhost".to_string(),
                vec![fingerprint],
                0,
                std::time::Duration::from_secs(duration_days * 86400),
                unit_price_per_mib_per_day,
                rand::random::<u128>(),
            );
            crate::hosting::sign_proposal(signer.as_ref(), &agreement)?;
            store.save(&agreement).await?;
            ui::print_success(&format!(
                "proposed agreement {:#x} to {} for {} wei",
                agreement.agreement_id,
                host_peer_id,
                agreement.cost()
            ));
            Ok(())
        }
        AgreementCommands::Accept { agreement_id } => {
            let id = parse_agreement_id(&agreement_id)?;
            let mut agreement = store.load(id).await?;
            agreement.accept()?;
            store.save(&agreement).await?;
            ui::print_success(&format!("accepted agreement {:#x}", agreement.agreement_id));
            Ok(())
        }
        AgreementCommands::Reject { agreement_id } => {
            let id = parse_agreement_id(&agreement_id)?;
            let mut agreement = store.load(id).await?;
            agreement.reject()?;
            store.save(&agreement).await?;
            ui::print_success(&format!("rejected agreement {:#x}", agreement.agreement_id));
            Ok(())
        }
        AgreementCommands::Cancel { agreement_id } => {
            let id = parse_agreement_id(&agreement_id)?;
            let mut agreement = store.load(id).await?;
            agreement.request_cancel()?;
            store.save(&agreement).await?;
            ui::print_success(&format!("requested cancellation of agreement {:#x}", agreement.agreement_id));
            Ok(())
        }
    }
}

/// Build the default adapter set used by a running node.
pub fn default_adapters(store: Arc<ContentStore>) -> Vec<Adapter> {
    vec![
        Adapter::WebRtc(adapters::webrtc::WebRtcAdapter::new(store.clone())),
        Adapter::BitTorrent(adapters::bittorrent::BitTorrentAdapter::new(store.clone())),
        Adapter::Http(adapters::http::HttpAdapter::new(store.clone())),
        Adapter::Ftp(adapters::ftp::FtpAdapter::new(store.clone())),
        Adapter::Ed2k(adapters::ed2k::Ed2kAdapter::new(store)),
    ]
}
