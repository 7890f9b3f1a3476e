// CLASSIFICATION: COMMUNITY
// Filename: quotaswap.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::LevelFilter;

use quotaswap::clock::{now_secs, process_id};
use quotaswap::codec::CredentialRecord;
use quotaswap::config::{BlobKind, Config, DataPaths};
use quotaswap::coord::{FileMutex, LeaderLease, StateFile};
use quotaswap::daemon::{Cadence, Daemon, Shutdown};
use quotaswap::host::LogHost;
use quotaswap::identity::{
    import_batch, parse_refresh_secrets, Credential, Identity, IdentityStore,
};
use quotaswap::quota::{format_reset, refresh_identity};
use quotaswap::remote::{HttpRemote, TokenExchange};
use quotaswap::switch::{
    record_switch, BlobStore, DecisionContext, DecisionLoop, DecisionPolicy, FileBlobStore,
    SqliteBlobStore, SwitchExecutor,
};

#[derive(Debug, Parser)]
#[command(name = "quotaswap", version, about = "Quota-aware identity pool")]
struct Cli {
    /// Data directory (defaults to $QUOTASWAP_HOME or ~/.quotaswap).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Configuration file (defaults to $QUOTASWAP_CONFIG or <home>/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the heartbeat, monitor and decision timers.
    Run {
        /// One heartbeat, refresh and tick, then exit.
        #[arg(long)]
        once: bool,
    },
    /// Leader, last switch and the active identity's quota.
    Status,
    /// All identities with their last known quota.
    List,
    /// Make an identity active now.
    Switch { id: String },
    /// Add an identity from a refresh secret, or the one the host is signed in as.
    Import {
        #[arg(required_unless_present = "from_host")]
        refresh_secret: Option<String>,
        #[arg(long)]
        label: Option<String>,
        /// Take the credential installed in the host blob.
        #[arg(long, conflicts_with = "refresh_secret")]
        from_host: bool,
    },
    /// Add identities from a JSON array or a list of refresh secrets.
    ImportBatch {
        /// Input file, `-` for stdin.
        source: PathBuf,
    },
    /// Print labels and refresh secrets as JSON.
    Export {
        /// Identities to export; all when omitted.
        ids: Vec<String>,
        /// Write to a file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete an identity.
    Remove { id: String },
    /// Clear a forbidden flag and fetch quota again.
    Retry { id: String },
    /// Exclude an identity from automatic switching.
    Disable { id: String },
    /// Include an identity in automatic switching again.
    Enable { id: String },
    /// Decode the credential installed in the host blob.
    Inspect,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn mask(secret: &str) -> String {
    if secret.len() <= 8 {
        return "*".repeat(secret.len());
    }
    let head: String = secret.chars().take(6).collect();
    format!("{head}...")
}

fn quota_line(identity: &Identity) -> String {
    match &identity.quota {
        None => "no data".into(),
        Some(q) if q.forbidden => "forbidden".into(),
        Some(q) => q
            .resources
            .iter()
            .map(|r| {
                format!(
                    "{} {}% (reset {})",
                    r.name,
                    r.remaining_percent,
                    format_reset(&r.reset_at, Utc::now())
                )
            })
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Collaborators shared by every subcommand.
struct Pool {
    cfg: Config,
    mutex: FileMutex,
    store: IdentityStore,
    state: StateFile,
    lease: LeaderLease,
    remote: HttpRemote,
    blob_path: PathBuf,
    blobs: Box<dyn BlobStore>,
    host: LogHost,
}

impl Pool {
    fn load(cli: &Cli) -> Result<Self> {
        let paths = match &cli.home {
            Some(home) => DataPaths::new(home),
            None => DataPaths::from_env()?,
        };
        paths
            .ensure()
            .with_context(|| format!("creating {}", paths.root.display()))?;
        let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
        let cfg = Config::load(&config_path)?;
        let mutex = FileMutex::new(&paths.lock, process_id())
            .with_timeout(cfg.tuning.lock_timeout())
            .with_stale_after(cfg.tuning.lock_stale());
        let store = IdentityStore::new(&paths.identities, mutex.clone())
            .with_cache_ttl(cfg.tuning.cache_ttl());
        let state = StateFile::new(&paths.state);
        let lease = LeaderLease::new(process_id(), state.clone(), mutex.clone())
            .with_ttl(cfg.tuning.lease_ttl());
        let remote = HttpRemote::new(cfg.remote.clone());
        let blob_path = cfg.blob_path(&paths);
        let blobs: Box<dyn BlobStore> = match cfg.blob.kind() {
            BlobKind::Sqlite => Box::new(SqliteBlobStore::new(&blob_path, cfg.blob.key())),
            BlobKind::Json => Box::new(FileBlobStore::new(&blob_path, cfg.blob.key())),
        };
        log::debug!("host store {}", blob_path.display());
        // No operator is attached to the CLI; proposals are approved and logged.
        Ok(Self {
            mutex,
            store,
            state,
            lease,
            remote,
            blob_path,
            blobs,
            host: LogHost::new(true).with_notify(cfg.auto_switch.notify_on_switch),
            cfg,
        })
    }

    fn executor(&self) -> SwitchExecutor<'_> {
        SwitchExecutor::new(&self.store, self.blobs.as_ref(), &self.remote, &self.host, &self.mutex)
            .with_bootstrap(self.cfg.blob.bootstrap_path.clone())
    }
}

fn run(pool: &Pool, once: bool) -> Result<()> {
    let ctx = DecisionContext {
        store: &pool.store,
        tokens: &pool.remote,
        quotas: &pool.remote,
        host: &pool.host,
        lease: &pool.lease,
        state: &pool.state,
        mutex: &pool.mutex,
    };
    let decision = DecisionLoop::new(ctx, pool.executor(), DecisionPolicy::from(&pool.cfg));
    let mut daemon = Daemon::new(&pool.lease, &pool.store, decision, Cadence::from_config(&pool.cfg));
    if once {
        let outcome = daemon.run_once();
        println!("{outcome:?}");
        if pool.lease.is_leader() {
            pool.lease.resign()?;
        }
        return Ok(());
    }
    let shutdown = Shutdown::new();
    for sig in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register(*sig, shutdown.flag())
            .context("installing signal handler")?;
    }
    daemon.run(&shutdown);
    Ok(())
}

fn status(pool: &Pool) -> Result<()> {
    match pool.lease.current() {
        Some(lease) => println!(
            "leader: {} (since {}, expires {})",
            lease.holder_id,
            Utc.timestamp_millis_opt(lease.acquired_at)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            Utc.timestamp_millis_opt(lease.expires_at)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        ),
        None => println!("leader: none"),
    }
    match pool.state.read().switch_record() {
        Some(record) => println!(
            "last switch: {} at {}",
            record.target_id,
            Utc.timestamp_millis_opt(record.at_millis)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        ),
        None => println!("last switch: never"),
    }
    match pool.executor().active_identity()? {
        Some(active) => println!("active: {} [{}] {}", active.label, active.id, quota_line(&active)),
        None => println!("active: none"),
    }
    Ok(())
}

fn list(pool: &Pool) -> Result<()> {
    let mut identities = pool.store.list()?;
    identities.sort_by_key(|i| i.priority);
    if identities.is_empty() {
        println!("no identities");
    }
    for identity in identities {
        println!(
            "{:<16} {:<32} {:<9} {}",
            identity.id,
            identity.label,
            if identity.disabled { "disabled" } else { "enabled" },
            quota_line(&identity)
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let pool = Pool::load(&cli)?;
    match &cli.command {
        Commands::Run { once } => run(&pool, *once)?,
        Commands::Status => status(&pool)?,
        Commands::List => list(&pool)?,
        Commands::Switch { id } => {
            let identity = pool.executor().switch_to(id)?;
            record_switch(&pool.state, &pool.mutex, &identity.id)?;
            println!("switched to {} [{}]", identity.label, identity.id);
        }
        Commands::Import {
            refresh_secret,
            label,
            from_host,
        } => {
            let identity = if *from_host {
                pool.executor()
                    .import_installed(label.as_deref().unwrap_or("host"))?
                    .ok_or_else(|| {
                        anyhow!("{} holds no refresh secret", pool.blob_path.display())
                    })?
            } else {
                let secret = refresh_secret
                    .as_deref()
                    .ok_or_else(|| anyhow!("a refresh secret or --from-host is required"))?;
                let grant = pool.remote.refresh(secret)?;
                let credential = grant.apply(&Credential::new("", secret, 0), now_secs());
                pool.store
                    .import(credential, label.as_deref().unwrap_or_default())?
            };
            if let Err(err) =
                refresh_identity(&pool.store, &pool.remote, &pool.remote, &identity, now_secs())
            {
                log::warn!("initial quota fetch failed: {err}");
            }
            println!("imported {} [{}]", identity.label, identity.id);
        }
        Commands::ImportBatch { source } => {
            let input = if source.as_os_str() == "-" {
                let mut text = String::new();
                io::stdin().read_to_string(&mut text)?;
                text
            } else {
                fs::read_to_string(source)
                    .with_context(|| format!("reading {}", source.display()))?
            };
            let entries = parse_refresh_secrets(&input);
            if entries.is_empty() {
                bail!("no refresh secrets found in {}", source.display());
            }
            let report = import_batch(&pool.store, &pool.remote, &entries, now_secs());
            for identity in &report.imported {
                println!("imported {} [{}]", identity.label, identity.id);
            }
            for (secret, reason) in &report.failed {
                println!("failed {secret}: {reason}");
            }
            println!(
                "{} imported, {} failed",
                report.imported.len(),
                report.failed.len()
            );
        }
        Commands::Export { ids, out } => {
            let exported = serde_json::to_string_pretty(&pool.store.export(ids)?)?;
            match out {
                Some(path) => {
                    fs::write(path, exported)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("exported to {}", path.display());
                }
                None => println!("{exported}"),
            }
        }
        Commands::Remove { id } => {
            if !pool.store.remove(id)? {
                bail!("unknown identity {id}");
            }
            println!("removed {id}");
        }
        Commands::Retry { id } => {
            let identity = pool.store.clear_forbidden(id)?;
            let snapshot =
                refresh_identity(&pool.store, &pool.remote, &pool.remote, &identity, now_secs())?;
            println!(
                "{}: {}",
                identity.label,
                if snapshot.forbidden { "still forbidden" } else { "ok" }
            );
        }
        Commands::Disable { id } | Commands::Enable { id } => {
            let disabled = matches!(cli.command, Commands::Disable { .. });
            pool.store.update(id, |i| i.disabled = disabled)?;
            println!("{id} {}", if disabled { "disabled" } else { "enabled" });
        }
        Commands::Inspect => {
            let blob = pool
                .blobs
                .read()?
                .ok_or_else(|| anyhow!("{} holds no credential blob", pool.blob_path.display()))?;
            match CredentialRecord::extract(&blob)? {
                Some(record) => {
                    println!("blob: {} bytes", blob.len());
                    println!("access:  {}", mask(&record.access_secret));
                    println!("type:    {}", record.token_type);
                    println!("refresh: {}", mask(&record.refresh_secret));
                    println!(
                        "expires: {}",
                        Utc.timestamp_opt(record.expires_at as i64, 0)
                            .single()
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_default()
                    );
                }
                None => println!("blob: {} bytes, no credential field", blob.len()),
            }
        }
    }
    Ok(())
}
