mod loopback;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use connected_accounts::config::STORE_SECRET_ENV;
use connected_accounts::store::crypto::generate_secret;
use connected_accounts::{
    AccountBroker, Config, EncryptedFileStore, MemorySession, ProviderRegistry, ReqwestHttpClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use loopback::CallbackServer;

#[derive(Parser, Debug)]
#[command(name = "connected-accounts", version, about = "Link third-party accounts over OAuth")]
struct Args {
    /// Config file (defaults to ~/.connected-accounts/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List providers with consumer credentials configured
    Providers,
    /// Connect an account through the browser
    Connect {
        provider: String,
        /// Extra scope to request on top of the provider's defaults
        #[arg(long = "scope")]
        scope: Vec<String>,
        /// Extra authorize parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Seconds to wait for the provider's callback
        #[arg(long, default_value_t = 120)]
        timeout: u64,
        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// List connected accounts
    Accounts { provider: Option<String> },
    /// Print an API token, refreshing it first if it is about to expire
    Token { provider: String, uid: String },
    /// Force a token refresh
    Refresh { provider: String, uid: String },
    /// Forget a connected account
    Remove { provider: String, uid: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config)?;

    let registry = Arc::new(ProviderRegistry::with_builtin(&config));
    let http = Arc::new(ReqwestHttpClient::with_timeout(config.http_timeout_secs)?);
    let secret = config
        .store_secret
        .as_deref()
        .context("no store secret configured")?;
    let store = Arc::new(EncryptedFileStore::open(config.store_dir()?, secret)?);
    let broker = AccountBroker::new(registry, http, store);

    match args.command {
        Command::Providers => {
            let choices = broker.list_enabled_providers();
            if choices.is_empty() {
                warn!("No provider has consumer credentials configured");
            }
            for choice in choices {
                println!("{}\t{}", choice.id, choice.name);
            }
        }
        Command::Connect {
            provider,
            scope,
            params,
            timeout,
            no_browser,
        } => {
            let server = CallbackServer::bind().await?;
            let mut session = MemorySession::new();
            let url = broker
                .redirect_target(&provider, &mut session, server.callback_url(), &scope, &params)
                .await?;

            if no_browser {
                println!("Open this URL to continue:\n{}", url);
            } else if let Err(e) = open::that(&url) {
                warn!("Failed to open browser automatically: {}", e);
                println!("Open this URL to continue:\n{}", url);
            }

            let callback = server.wait(timeout).await?;
            let (record, created) = broker.handle_callback(&provider, &mut session, &callback).await?;

            let profile = broker
                .registry()
                .by_id(&provider)
                .context("provider disappeared from registry")?;
            info!(
                "{} {}",
                if created { "Connected" } else { "Updated" },
                record.display_name(&profile)
            );
            println!("{}", serde_json::to_string_pretty(&record.common_data(&profile))?);
        }
        Command::Accounts { provider } => {
            for account in broker.accounts(provider.as_deref()).await? {
                let profile = broker.registry().by_id(&account.provider_id);
                let label = match (profile, broker.account(&account.provider_id, &account.uid).await) {
                    (Some(profile), Ok(record)) => record.display_name(&profile),
                    _ => String::from("?"),
                };
                println!(
                    "{}\t{}\t{}\t{}",
                    account.provider_id,
                    account.uid,
                    label,
                    account.last_login.to_rfc3339()
                );
            }
        }
        Command::Token { provider, uid } => {
            println!("{}", broker.access_token(&provider, &uid).await?);
        }
        Command::Refresh { provider, uid } => {
            let record = broker.refresh_account(&provider, &uid).await?;
            match record.token.expires_at {
                Some(expiry) => println!("Refreshed; expires at {}", expiry.to_rfc3339()),
                None => println!("Refreshed"),
            }
        }
        Command::Remove { provider, uid } => {
            broker.remove_account(&provider, &uid).await?;
            println!("Removed {}:{}", provider, uid);
        }
    }

    Ok(())
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Load the config, generating and persisting a store secret on first use.
fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path,
        None => connected_accounts::config::config_path()?,
    };
    if path.is_dir() {
        bail!("{:?} is a directory, expected a config file", path);
    }

    let mut config = Config::load(&path)?;

    // Environment overrides are applied after saving and never written to disk
    if config.store_secret.is_none() && std::env::var(STORE_SECRET_ENV).is_err() {
        info!("Generating a new account store secret in {:?}", path);
        config.store_secret = Some(generate_secret());
        config.save(&path)?;
    }

    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}
