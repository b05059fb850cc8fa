use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use autocert::{
    responder, CertManager, CertManagerConfig, ChallengeResponder, Decision, MaterialStore,
    MaterialStoreApi, RemainingDays,
};
use clap::Parser;
use documented::DocumentedFields;
use fs_err as fs;
use rocket::{Build, Rocket};
use serde::{Deserialize, Serialize};
use toml_edit::ser::to_document;
use tracing::info;

#[derive(Parser)]
enum Command {
    /// Serve HTTP-01 challenges, obtain a certificate and keep it renewed
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "autocert.toml")]
        config: PathBuf,
    },
    /// Renew the certificate once if it is missing or close to expiration
    Renew {
        /// Path to the configuration file
        #[arg(short, long, default_value = "autocert.toml")]
        config: PathBuf,
        /// Renew even if the current certificate is still valid
        #[arg(long)]
        force: bool,
    },
    /// Show whether the stored certificate needs renewal
    Check {
        /// Path to the configuration file
        #[arg(short, long, default_value = "autocert.toml")]
        config: PathBuf,
    },
    /// Generate configuration template
    Cfg {
        /// Write to file
        #[arg(short, long)]
        write_to: Option<PathBuf>,
    },
}

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Deserialize, Serialize, DocumentedFields)]
struct Config {
    /// Domain to issue the certificate for
    domain: String,
    /// Use the Let's Encrypt staging environment
    staging: bool,
    /// Address the challenge server listens on
    address: IpAddr,
    /// Port the challenge server listens on
    port: u16,
    /// Renew timeout in seconds
    renew_timeout: u64,
    /// How the days left before expiration are counted.
    /// One of "day_count" or "calendar_months".
    #[serde(default)]
    remaining_days: RemainingDays,
    /// Where the key, certificate and ACME account are stored.
    /// Either { kind = "local", workdir = "<dir>" } or
    /// { kind = "remote", endpoint = "<url>", app = "<name>", seed = "<seed>" }
    storage: Storage,
    /// ACME directory URL, defaults to Let's Encrypt for the environment
    #[serde(default)]
    acme_url: Option<String>,
    /// Command to run after renewal
    #[serde(default)]
    renewed_hook: Option<String>,
}

#[derive(Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Storage {
    Local {
        workdir: PathBuf,
    },
    Remote {
        endpoint: String,
        app: String,
        seed: String,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: "example.com".into(),
            staging: true,
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 80,
            renew_timeout: 600,
            remaining_days: RemainingDays::default(),
            storage: Storage::Local {
                workdir: "/etc/autocert".into(),
            },
            acme_url: None,
            renewed_hook: None,
        }
    }
}

impl Config {
    fn to_commented_toml(&self) -> Result<String> {
        let mut doc = to_document(self)?;

        for (mut key, _value) in doc.iter_mut() {
            let Ok(docstring) = Self::get_field_docs(key.get()) else {
                continue;
            };
            let decor = key.leaf_decor_mut();

            let mut comment = String::new();
            for line in docstring.lines() {
                let line = if line.is_empty() {
                    String::from("#\n")
                } else {
                    format!("# {line}\n")
                };
                comment.push_str(&line);
            }
            decor.set_prefix(comment);
        }
        Ok(doc.to_string())
    }

    fn manager_config(&self) -> CertManagerConfig {
        CertManagerConfig::builder()
            .domain(self.domain.clone())
            .staging(self.staging)
            .maybe_acme_url(self.acme_url.clone())
            .renew_timeout(Duration::from_secs(self.renew_timeout))
            .remaining_days(self.remaining_days)
            .maybe_renewed_hook(self.renewed_hook.clone())
            .build()
    }

    fn store(&self) -> Result<MaterialStore> {
        match &self.storage {
            Storage::Local { workdir } => Ok(MaterialStore::local(workdir)),
            Storage::Remote {
                endpoint,
                app,
                seed,
            } => MaterialStore::remote(endpoint.clone(), app, seed),
        }
    }

    fn challenge_server(&self, responder: Arc<ChallengeResponder>) -> Rocket<Build> {
        let figment = rocket::Config::figment()
            .merge(("address", self.address))
            .merge(("port", self.port));
        rocket::custom(figment)
            .mount("/", responder::routes())
            .manage(responder)
    }
}

fn load_config(config: &Path) -> Result<Config> {
    let config = toml_edit::de::from_str(&fs::read_to_string(config)?)?;
    Ok(config)
}

/// Start the challenge server and build the manager.
///
/// The server keeps running in the background until the process exits.
async fn start(config: &Path) -> Result<Arc<CertManager>> {
    let config = load_config(config).context("Failed to load configuration")?;
    let responder = Arc::new(ChallengeResponder::new());
    let rocket = config
        .challenge_server(responder.clone())
        .ignite()
        .await
        .map_err(|err| anyhow!(err.to_string()))
        .context("Failed to start challenge server")?;
    tokio::spawn(async move {
        if let Err(err) = rocket.launch().await {
            tracing::error!("challenge server stopped: {err}");
        }
    });
    let store = config.store().context("Failed to set up storage")?;
    let manager = CertManager::build(config.manager_config(), store, responder)
        .await
        .context("Failed to build certificate manager")?;
    Ok(Arc::new(manager))
}

async fn run(config: &Path) -> Result<()> {
    let manager = start(config).await?;
    manager
        .boot()
        .await
        .context("Failed to obtain a certificate")?;
    if let Some(live) = manager.active().current() {
        info!(
            common_name = live.common_name(),
            not_after = %live.not_after(),
            "serving certificate"
        );
    }
    manager.run().await;
    Ok(())
}

async fn renew(config: &Path, force: bool) -> Result<()> {
    let manager = start(config).await?;
    if force {
        let material = manager.renew().await?;
        info!(not_after = %material.not_after(), "renewed certificate");
        return Ok(());
    }
    manager.load_stored().await;
    let outcome = manager.check().await?;
    info!(?outcome, "certificate check finished");
    Ok(())
}

async fn check(config: &Path) -> Result<()> {
    let config = load_config(config).context("Failed to load configuration")?;
    let material = config.store()?.load_certificate().await;
    let decision = config.manager_config().evaluate(material.as_ref());
    match &material {
        Some(material) => println!(
            "{}: issued by {}, expires {}",
            material.common_name(),
            material.issuer_common_name(),
            material.not_after()
        ),
        None => println!("no usable certificate stored"),
    }
    match decision {
        Decision::Valid => println!("valid"),
        Decision::MustRenew(reason) => bail!("renewal needed: {reason:?}"),
    }
    Ok(())
}

#[rocket::main]
async fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).init();
    }
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let args = Args::parse();
    match args.command {
        Command::Run { config } => run(&config).await?,
        Command::Renew { config, force } => renew(&config, force).await?,
        Command::Check { config } => check(&config).await?,
        Command::Cfg { write_to } => {
            let toml_str = Config::default().to_commented_toml()?;
            match write_to {
                Some(path) => fs::write(path, toml_str)?,
                None => println!("{}", toml_str),
            }
        }
    }
    Ok(())
}
