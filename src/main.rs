use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use freight_market::{
    app::{
        self,
        AppSettings,
    },
    backend::{
        fuel::{
            FuelMarket,
            KeystoreExtension,
            SignerRegistry,
        },
        simulated::{
            SimulatedMarket,
            SimulatedWallet,
        },
    },
    chain::ChainClient,
    config::{
        self,
        AppConfig,
        BackendMode,
        MarketConfig,
        NetworkTarget,
        WalletConfig,
    },
    deployment::{
        self,
        DeploymentEnv,
        DeploymentStore,
    },
    market::Address,
    session::SessionStore,
    view::MarketView,
    wallets,
};
use fuels::prelude::{
    ContractId,
    Provider,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

/// Whole units each simulated account starts with.
const SIMULATED_FUNDING: u64 = 10;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Run against an in-process market and wallet
    #[arg(long, conflicts_with_all = ["local", "devnet", "testnet"])]
    simulated: bool,

    /// Connect to a local Fuel node
    #[arg(long, conflicts_with_all = ["devnet", "testnet"])]
    local: bool,

    /// Connect to Fuel devnet
    #[arg(long, conflicts_with = "testnet")]
    devnet: bool,

    /// Connect to Fuel testnet
    #[arg(long)]
    testnet: bool,

    /// Override the RPC URL for the selected network
    #[arg(long)]
    rpc_url: Option<String>,

    /// Market contract id; defaults to the latest compatible deployment record
    #[arg(long)]
    contract_id: Option<String>,

    /// Chain the wallet must be on; defaults to the node's chain id
    #[arg(long)]
    chain_id: Option<u64>,

    /// forc-wallet profile used for signing
    #[arg(long)]
    wallet: Option<String>,

    /// forc-wallet directory (defaults to ~/.fuel/wallets)
    #[arg(long)]
    wallet_dir: Option<String>,

    #[arg(long, default_value_t = config::DEFAULT_REFRESH_SECS)]
    refresh_secs: u64,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a deployed market contract for the selected network
    Register {
        #[arg(long)]
        contract_id: String,
    },
}

fn network_from_cli(cli: &Cli) -> Option<NetworkTarget> {
    let url = |default: &str| cli.rpc_url.clone().unwrap_or_else(|| default.to_string());
    if cli.local {
        Some(NetworkTarget::LocalNode {
            url: url(config::DEFAULT_LOCAL_RPC_URL),
        })
    } else if cli.devnet {
        Some(NetworkTarget::Devnet {
            url: url(config::DEFAULT_DEVNET_RPC_URL),
        })
    } else if cli.testnet {
        Some(NetworkTarget::Testnet {
            url: url(config::DEFAULT_TESTNET_RPC_URL),
        })
    } else {
        None
    }
}

fn parse_cli_args(cli: &Cli) -> Result<AppConfig> {
    let backend = if cli.simulated {
        if cli.rpc_url.is_some() || cli.contract_id.is_some() {
            return Err(eyre!(
                "--rpc-url and --contract-id only apply to a live network"
            ));
        }
        BackendMode::Simulated
    } else {
        let network = network_from_cli(cli).ok_or_else(|| {
            eyre!("Select a backend with --simulated, --local, --devnet or --testnet")
        })?;
        let owner = cli.wallet.clone().ok_or_else(|| {
            eyre!("Specify --wallet <name> to select a forc-wallet profile")
        })?;
        let dir = wallets::resolve_wallet_dir(cli.wallet_dir.as_deref())?;
        BackendMode::Live {
            network,
            wallet: WalletConfig::ForcKeystore { owner, dir },
            contract_id: cli.contract_id.clone(),
        }
    };

    let market = MarketConfig {
        chain_id: cli.chain_id.unwrap_or(config::DEFAULT_CHAIN_ID),
        refresh_interval: Duration::from_secs(cli.refresh_secs),
        ..MarketConfig::default()
    };
    market.validate()?;

    Ok(AppConfig {
        backend,
        market,
        chain_id_override: cli.chain_id,
        log_dir: cli.log_dir.clone(),
    })
}

fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let appender = rolling::daily(log_dir, "freight-market.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {e}"))?;
    Ok(guard)
}

fn parse_contract_id(raw: &str) -> Result<ContractId> {
    let cleaned = raw.trim().trim_start_matches("fuel");
    ContractId::from_str(cleaned).map_err(|e| eyre!("Failed to parse contract id '{raw}': {e:?}"))
}

async fn node_chain_id(provider: &Provider) -> Result<u64> {
    let params = provider
        .consensus_parameters()
        .await
        .wrap_err("Failed to fetch consensus parameters")?;
    Ok(u64::from(params.chain_id()))
}

fn resolve_contract_id(network: &NetworkTarget, explicit: Option<&str>) -> Result<ContractId> {
    if let Some(raw) = explicit {
        return parse_contract_id(raw);
    }
    let store = DeploymentStore::new(DeploymentEnv::from(network))?;
    let abi_hash = deployment::compute_abi_hash(deployment::ABI_PATH)?;
    match store.latest_compatible(&abi_hash)? {
        Some(record) => {
            tracing::info!(
                contract_id = %record.contract_id,
                deployed_at = %record.deployed_at,
                "using recorded deployment"
            );
            parse_contract_id(&record.contract_id)
        }
        None => {
            let records = store.load()?;
            Err(eyre!(deployment::format_deployment_summary(
                &store,
                network.url(),
                &records,
                &abi_hash,
            )))
        }
    }
}

async fn register(network: &NetworkTarget, contract_id: &str) -> Result<()> {
    parse_contract_id(contract_id)?;
    let provider = Provider::connect(network.url())
        .await
        .wrap_err_with(|| format!("Failed to connect to {}", network.url()))?;
    let chain_id = node_chain_id(&provider).await?;
    let store = DeploymentStore::new(DeploymentEnv::from(network))?;
    let abi_hash = deployment::compute_abi_hash(deployment::ABI_PATH)?;
    store.append(deployment::new_record(
        contract_id,
        &abi_hash,
        network.url(),
        Some(chain_id),
    ))?;
    println!(
        "Recorded {contract_id} for {} in {}",
        store.env(),
        store.path().display()
    );
    Ok(())
}

fn settings(config: &AppConfig, release_terminal_for_wallet: bool) -> AppSettings {
    AppSettings {
        title: config.market.title.clone(),
        resolution: config.market.resolution.clone(),
        backend_label: config.backend.label(),
        refresh_interval: config.market.refresh_interval,
        release_terminal_for_wallet,
    }
}

async fn run_simulated(config: AppConfig) -> Result<()> {
    let accounts = vec![Address::new([0xA1; 32]), Address::new([0xB2; 32])];
    let decimals = config.market.decimals;
    let market = SimulatedMarket::seeded(decimals);
    let funding = 10u64
        .checked_pow(decimals)
        .and_then(|unit| unit.checked_mul(SIMULATED_FUNDING))
        .ok_or_else(|| eyre!("simulated funding overflows at {decimals} decimals"))?;
    for account in &accounts {
        market.fund(*account, funding);
    }
    let wallet = SimulatedWallet::new(accounts, config.market.chain_id);

    let client = ChainClient::new(Some(Arc::new(wallet)), Arc::new(market), &config.market);
    let store = Arc::new(SessionStore::new(Arc::new(client)));
    let view = Arc::new(MarketView::new(store));
    app::run_app(view, settings(&config, false)).await
}

async fn run_live(mut config: AppConfig) -> Result<()> {
    let BackendMode::Live {
        network,
        wallet: WalletConfig::ForcKeystore { owner, dir },
        contract_id,
    } = config.backend.clone()
    else {
        return Err(eyre!("live backend requires a network"));
    };

    let provider = Provider::connect(network.url())
        .await
        .wrap_err_with(|| format!("Failed to connect to {}", network.url()))?;
    let node_chain_id = node_chain_id(&provider).await?;
    config.market.chain_id = config.effective_chain_id(node_chain_id);
    if config.market.chain_id != node_chain_id {
        tracing::warn!(
            expected = config.market.chain_id,
            node = node_chain_id,
            "requested chain id differs from the node's"
        );
    }
    let contract_id = resolve_contract_id(&network, contract_id.as_deref())?;
    tracing::info!(%contract_id, url = %network.url(), "connecting to market");

    let signers = SignerRegistry::default();
    let extension = KeystoreExtension::new(dir, owner, provider.clone(), signers.clone());
    let market = FuelMarket::connect(&provider, contract_id, signers).await?;

    let client = ChainClient::new(Some(Arc::new(extension)), Arc::new(market), &config.market);
    let store = Arc::new(SessionStore::new(Arc::new(client)));
    let view = Arc::new(MarketView::new(store));
    app::run_app(view, settings(&config, true)).await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    if let Some(Command::Register { contract_id }) = &cli.command {
        let network = network_from_cli(&cli)
            .ok_or_else(|| eyre!("register needs --local, --devnet or --testnet"))?;
        deployment::ensure_structure(Path::new(deployment::DEPLOYMENTS_ROOT))?;
        return register(&network, contract_id).await;
    }

    let app_config = parse_cli_args(&cli)?;
    let _guard = init_tracing(&app_config.log_dir)?;
    tracing::info!(backend = %app_config.backend.label(), "starting freight-market");

    match app_config.backend {
        BackendMode::Simulated => run_simulated(app_config).await,
        BackendMode::Live { .. } => run_live(app_config).await,
    }
}
