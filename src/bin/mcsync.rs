//! Command line front end for the synchronization engine.
//!
//! Credentials come from `MCSYNC_CLIENT_ID`, `MCSYNC_CLIENT_SECRET`,
//! `MCSYNC_AUTH_URL` and `MCSYNC_ACCOUNT_ID`; the business unit and file
//! root from the flags below or their `MCSYNC_*` variables.
//!
//! ```sh
//! mcsync --bu Marketing --mid 100200 retrieve query
//! mcsync --bu Marketing --mid 100200 deploy
//! mcsync --bu Marketing --mid 100200 template query markets/dev.json orders_dev
//! ```
//!
//! The exit code is 1 when any item or type failed.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use mcsync::auth::{BusinessUnit, McCredentials, TokenClient};
use mcsync::client::{self, ClientConfig, SoapAction, SoapPayload, SoapResponse, Transport};
use mcsync::metadata::{
    combo_insert, pipeline, resolve_dependencies, FilterRule, RetrieveFilter, SyncConfig, SyncContext,
    TemplateMap, TypeKeyCombo, TypeRegistry,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "mcsync", version, about = "Retrieve, deploy and template Marketing Cloud metadata")]
struct Cli {
    /// Root of the retrieve, deploy and template trees.
    #[arg(long, env = "MCSYNC_ROOT", default_value = ".")]
    root: PathBuf,

    /// Credential name, used as the first directory segment.
    #[arg(long, env = "MCSYNC_CREDENTIAL", default_value = "default")]
    credential: String,

    /// Business unit name.
    #[arg(long, env = "MCSYNC_BU_NAME")]
    bu: String,

    /// Business unit member id.
    #[arg(long, env = "MCSYNC_MID")]
    mid: String,

    /// Enterprise member id; defaults to the business unit's own.
    #[arg(long, env = "MCSYNC_PARENT_MID")]
    parent_mid: Option<String>,

    /// Maximum concurrent requests per batch.
    #[arg(long, env = "MCSYNC_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Stop a multi-type deploy at the first type that fails.
    #[arg(long)]
    stop_on_error: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Retrieve items of one type into the retrieve tree.
    Retrieve {
        metadata_type: String,
        keys: Vec<String>,
        /// Keep items matching the rule (`folder:<path>`, `<field>=<value>`, `<field>^=<prefix>`).
        #[arg(long)]
        include: Vec<FilterRule>,
        /// Drop items matching the rule.
        #[arg(long)]
        exclude: Vec<FilterRule>,
    },
    /// Deploy the deploy tree; all registered types when none are given.
    Deploy { types: Vec<String> },
    /// Turn retrieved items into templates for a market.
    Template {
        metadata_type: String,
        market: PathBuf,
        #[arg(required = true)]
        keys: Vec<String>,
        /// Fetch the items from the server instead of the retrieve tree.
        #[arg(long)]
        from_server: bool,
        /// Items are stored in a `<type>/<key>/` folder.
        #[arg(long)]
        nested: bool,
    },
    /// Resolve templates for a market into the deploy tree.
    Definition {
        metadata_type: String,
        market: PathBuf,
        #[arg(required = true)]
        keys: Vec<String>,
        #[arg(long)]
        nested: bool,
    },
    /// List what the given items depend on, transitively.
    Deps { metadata_type: String, keys: Vec<String> },
    /// Delete one item on the server and in the retrieve tree.
    Delete { metadata_type: String, key: String },
}

impl Command {
    /// Commands that only touch local files.
    fn is_offline(&self) -> bool {
        matches!(
            self,
            Command::Definition { .. } | Command::Deps { .. } | Command::Template { from_server: false, .. }
        )
    }
}

/// Stands in for the API on commands that never reach the server.
struct Offline;

impl Offline {
    fn refuse() -> client::Error {
        client::Error::new(client::ErrorKind::Config(
            "command runs offline and cannot reach the server".to_string(),
        ))
    }
}

#[async_trait]
impl Transport for Offline {
    async fn get(&self, _uri: &str) -> client::Result<Value> {
        Err(Self::refuse())
    }

    async fn post(&self, _uri: &str, _body: &Value) -> client::Result<Value> {
        Err(Self::refuse())
    }

    async fn patch(&self, _uri: &str, _body: &Value) -> client::Result<Value> {
        Err(Self::refuse())
    }

    async fn put(&self, _uri: &str, _body: &Value) -> client::Result<Value> {
        Err(Self::refuse())
    }

    async fn delete(&self, _uri: &str) -> client::Result<Value> {
        Err(Self::refuse())
    }

    async fn soap(&self, _object_type: &str, _action: SoapAction, _payload: SoapPayload) -> client::Result<SoapResponse> {
        Err(Self::refuse())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn connect(cli: &Cli) -> CliResult<Arc<dyn Transport>> {
    if cli.command.is_offline() {
        return Ok(Arc::new(Offline));
    }
    let credentials = McCredentials::from_env()?;
    let token = TokenClient::new(credentials).authenticate(Some(cli.mid.as_str())).await?;
    Ok(Arc::new(token.client(ClientConfig::default())?))
}

fn context(cli: &Cli, transport: Arc<dyn Transport>) -> CliResult<SyncContext> {
    let parent_mid = cli.parent_mid.clone().unwrap_or_else(|| cli.mid.clone());
    let bu = BusinessUnit::new(&cli.credential, &cli.bu, &cli.mid, parent_mid);

    let mut config = SyncConfig::builder()
        .with_root(&cli.root)
        .with_continue_on_error(!cli.stop_on_error);
    if let Some(limit) = cli.concurrency {
        config = config.with_concurrency(limit);
    }
    Ok(SyncContext::new(transport, bu, config.build())?)
}

/// Returns `false` when the command finished with item failures.
async fn run(cli: Cli) -> CliResult<bool> {
    let transport = connect(&cli).await?;
    let ctx = context(&cli, transport)?;
    let registry = TypeRegistry::standard();

    match cli.command {
        Command::Retrieve {
            metadata_type,
            keys,
            include,
            exclude,
        } => {
            let mtype = registry.require(&metadata_type)?;
            let mut filter = RetrieveFilter::new();
            for rule in include {
                filter = filter.include(rule);
            }
            for rule in exclude {
                filter = filter.exclude(rule);
            }
            let keys = (!keys.is_empty()).then_some(keys);
            let items = pipeline::retrieve(&ctx, mtype.as_ref(), keys.as_deref(), &filter).await?;
            println!("{metadata_type}: {} retrieved", items.len());
            Ok(true)
        }
        Command::Deploy { types } => {
            let types = if types.is_empty() { registry.names() } else { types };
            let report = pipeline::deploy(&ctx, &registry, &types).await?;
            for upsert in &report.reports {
                println!(
                    "{}: {} created, {} updated, {} unchanged, {} failed",
                    upsert.metadata_type,
                    upsert.created.len(),
                    upsert.updated.len(),
                    upsert.skipped.len(),
                    upsert.failed.len()
                );
                for (key, messages) in pipeline::failures_by_key(&upsert.failed) {
                    eprintln!("  {key}: {}", messages.join("; "));
                }
                if let Some(messages) = &upsert.post_deploy_error {
                    eprintln!("  post-deploy: {}", messages.join("; "));
                }
            }
            for failure in &report.fatal {
                eprintln!("{}: {}", failure.metadata_type, failure.messages.join("; "));
            }
            for name in &report.not_attempted {
                eprintln!("{name}: not attempted");
            }
            Ok(!report.has_errors())
        }
        Command::Template {
            metadata_type,
            market,
            keys,
            from_server,
            nested,
        } => {
            let mtype = registry.require(&metadata_type)?;
            let market = TemplateMap::load(&market).await?;
            let mut ok = true;
            for key in &keys {
                let written = if from_server {
                    pipeline::retrieve_as_template(&ctx, mtype.as_ref(), key, &market).await
                } else if nested {
                    pipeline::build_template_for_nested(&ctx, mtype.as_ref(), key, &market).await
                } else {
                    pipeline::build_template(&ctx, mtype.as_ref(), key, &market).await
                };
                ok &= report_written(key, written);
            }
            Ok(ok)
        }
        Command::Definition {
            metadata_type,
            market,
            keys,
            nested,
        } => {
            let mtype = registry.require(&metadata_type)?;
            let market = TemplateMap::load(&market).await?;
            let mut ok = true;
            for key in &keys {
                let written = if nested {
                    pipeline::build_definition_for_nested(&ctx, mtype.as_ref(), key, &market).await
                } else {
                    pipeline::build_definition(&ctx, mtype.as_ref(), key, &market).await
                };
                ok &= report_written(key, written);
            }
            Ok(ok)
        }
        Command::Deps { metadata_type, keys } => {
            let mut requested = TypeKeyCombo::new();
            requested.entry(metadata_type.clone()).or_default();
            for key in &keys {
                combo_insert(&mut requested, &metadata_type, key);
            }
            let closure = resolve_dependencies(&ctx, &registry, &requested).await?;
            for (name, keys) in &closure.combo {
                for key in keys {
                    let marker = if closure.added.get(name).is_some_and(|k| k.contains(key)) { "+" } else { " " };
                    println!("{marker} {name}/{key}");
                }
            }
            for (name, keys) in &closure.missing {
                for key in keys {
                    eprintln!("missing {name}/{key}");
                }
            }
            Ok(!closure.has_missing())
        }
        Command::Delete { metadata_type, key } => {
            let mtype = registry.require(&metadata_type)?;
            let removed = pipeline::delete_by_key(&ctx, mtype.as_ref(), &key).await?;
            println!("{metadata_type}/{key}: deleted, {removed} local files removed");
            Ok(true)
        }
    }
}

fn report_written(key: &str, written: mcsync::metadata::Result<PathBuf>) -> bool {
    match written {
        Ok(path) => {
            println!("{key}: {}", path.display());
            true
        }
        Err(e) => {
            eprintln!("{key}: {}", e.messages().join("; "));
            false
        }
    }
}
