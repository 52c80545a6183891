use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dlgate::config::Config;
use dlgate::gate_from_config;
use dlgate::key::{Directive, RequestContext};
use dlgate::store::{self, RecordKind};
use dlgate::tiers::{Identity, Member};

#[derive(Parser)]
#[command(name = "dlgate")]
#[command(about = "Download keys and tier download quotas")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "DLGATE_CONFIG", default_value = "/etc/dlgate/config.toml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the download key for a file
    Key {
        #[arg(long)]
        file: String,
        /// ip-forever, universal or cache-compatible
        #[arg(long)]
        directive: Option<String>,
        #[arg(long, default_value = "")]
        ip: String,
        #[arg(long, default_value = "")]
        user_agent: String,
        /// Day the key is valid for (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show a member's quota and current usage
    Usage {
        #[arg(long)]
        member: i64,
        /// Assigned tier
        #[arg(long)]
        tier: u32,
        /// Tiers the member has access to (default 0..=tier)
        #[arg(long, value_delimiter = ',')]
        access: Vec<u32>,
        /// File not counted against the quota
        #[arg(long)]
        exclude: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Record a served download
    Record {
        #[arg(long)]
        member: i64,
        #[arg(long)]
        file: String,
    },
    /// Total and unique downloads of a file
    Totals {
        #[arg(long)]
        file: String,
        #[arg(long)]
        member: Option<i64>,
        /// Count the live log only
        #[arg(long)]
        no_archive: bool,
        #[arg(long)]
        json: bool,
    },
    /// Store a raw log or archive blob for a member
    Import {
        #[arg(long)]
        member: i64,
        /// log or archive
        #[arg(long)]
        kind: String,
        #[arg(long)]
        blob_file: String,
    },
    /// Bring the store schema up to date
    Migrate,
}

fn init_tracing(level: &str, json: bool) {
    let level: tracing::Level = level.parse().unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let cfg = Config::from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    tracing::debug!(config = ?cfg, "Loaded configuration");

    match cli.command {
        Commands::Key {
            file,
            directive,
            ip,
            user_agent,
            date,
        } => {
            let keys = cfg.key_deriver()?;
            let today = date.unwrap_or_else(|| Utc::now().date_naive());
            let ctx = RequestContext::new(ip, user_agent, today);
            let directive = Directive::parse(directive.as_deref());
            let Some(key) = keys.derive(&file, directive, &ctx) else {
                bail!("no key for an empty file name");
            };
            println!("{key}");
        }
        Commands::Usage {
            member,
            tier,
            access,
            exclude,
            json,
        } => {
            let gate = gate_from_config(&cfg).await?;
            let member = if access.is_empty() {
                Member::new(member, tier)
            } else {
                Member::with_tiers(member, tier, access)
            };
            let usage = gate
                .user_downloads(Some(&member as &dyn Identity), exclude.as_deref(), Utc::now())
                .await;
            if json {
                println!("{}", serde_json::to_string_pretty(&usage)?);
            } else {
                println!("allowed:   {} per {} days", usage.allowed, usage.allowed_days);
                println!("currently: {}", usage.currently);
                println!("remaining: {}", usage.remaining());
                println!("verdict:   {:?}", usage.check());
                println!("log:       {} entries", usage.log.len());
                println!("archive:   {} entries", usage.archive.len());
            }
        }
        Commands::Record { member, file } => {
            let gate = gate_from_config(&cfg).await?;
            gate.record_download(member, &file, Utc::now()).await?;
            tracing::info!(member, file = %file, "Download recorded");
        }
        Commands::Totals {
            file,
            member,
            no_archive,
            json,
        } => {
            let gate = gate_from_config(&cfg).await?;
            let totals = gate.aggregate(&file, member, !no_archive).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&totals)?);
            } else {
                println!("total:  {}", totals.total);
                println!("unique: {}", totals.unique);
            }
        }
        Commands::Import {
            member,
            kind,
            blob_file,
        } => {
            let kind: RecordKind = kind.parse()?;
            let blob = std::fs::read_to_string(&blob_file)
                .with_context(|| format!("reading {blob_file}"))?;
            let store = store::open(&cfg.db_path).await?;
            store.put_blob(member, kind, blob.trim()).await?;
            tracing::info!(member, %kind, "Imported download record");
        }
        Commands::Migrate => {
            store::open(&cfg.db_path).await?;
            tracing::info!(db_path = %cfg.db_path, "Store schema is up to date");
        }
    }

    Ok(())
}
