use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use agro_admin::auth::{self, TokenStore};
use agro_admin::config::{self, Config};
use agro_admin::controller::{ListController, NoticeLevel, SaveOutcome};
use agro_admin::model::{Attachment, ListQuery};
use agro_admin::remote::{build_http_client, HttpCollection, RemoteCollection};
use agro_admin::resource::ResourceKind;
use agro_admin::AuthSession;

const PASSWORD_ENV: &str = "AGRO_ADMIN_PASSWORD";

#[derive(Debug, Parser)]
#[command(author, version, about = "Admin client for the agricultural commerce backend")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a sample config file
    InitConfig,
    /// Exchange admin credentials for a token and store it
    Login {
        #[arg(long)]
        email: String,
        /// Falls back to $AGRO_ADMIN_PASSWORD
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored token
    Logout,
    /// List a resource, filtered client-side
    List {
        resource: ResourceKind,
        #[command(flatten)]
        view: ViewArgs,
        /// Print record counts by status
        #[arg(long)]
        tally: bool,
    },
    /// Fetch one record
    Get { resource: ResourceKind, id: String },
    /// Create a record, or update one when --id is given
    Save {
        resource: ResourceKind,
        #[arg(long)]
        id: Option<String>,
        /// Field assignment, e.g. --set name=Urea
        #[arg(long = "set", value_parser = parse_pair)]
        fields: Vec<(String, String)>,
        /// Image to upload with the record
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Delete a record
    Delete { resource: ResourceKind, id: String },
    /// Write the filtered list to a JSON file
    Export {
        resource: ResourceKind,
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, clap::Args)]
struct ViewArgs {
    /// Client-side filter, e.g. --filter status=PENDING
    #[arg(long = "filter", value_parser = parse_pair)]
    filters: Vec<(String, String)>,
    /// Query parameter forwarded to the backend, e.g. --query from=2024-01-01
    #[arg(long = "query", value_parser = parse_pair)]
    query: Vec<(String, String)>,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::InitConfig = args.command {
        return init_config(&args.config).await;
    }

    let cfg = config::load(Some(args.config.as_path()))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;
    let store = TokenStore::new(cfg.token_path());

    match args.command {
        Command::InitConfig => Ok(()),
        Command::Login { email, password } => login(&cfg, &store, &email, password).await,
        Command::Logout => {
            store.remove()?;
            println!("Logged out.");
            Ok(())
        }
        Command::List {
            resource,
            view,
            tally,
        } => {
            let mut controller = mount(&cfg, &store, resource, &view).await?;
            for record in controller.visible() {
                println!("{}", Value::Object(record.clone()));
            }
            if tally {
                for (status, count) in controller.tally() {
                    println!("{}: {}", if status.is_empty() { "(none)" } else { status.as_str() }, count);
                }
            }
            info!(shown = controller.visible().len(), total = controller.records().len(), "listed");
            report_notices(&mut controller);
            Ok(())
        }
        Command::Get { resource, id } => {
            let session = require_session(&store)?;
            let collection = collection(&cfg, session, resource)?;
            let record = collection
                .get(&id)
                .await
                .with_context(|| format!("failed to get {} {}", resource, id))?;
            println!("{}", serde_json::to_string_pretty(&Value::Object(record))?);
            Ok(())
        }
        Command::Save {
            resource,
            id,
            fields,
            image,
        } => save(&cfg, &store, resource, id.as_deref(), &fields, image.as_deref()).await,
        Command::Delete { resource, id } => {
            let mut controller = mount(&cfg, &store, resource, &ViewArgs::empty()).await?;
            let before = controller.records().len();
            let removed = controller.remove(&id).await;
            report_notices(&mut controller);
            if !removed {
                bail!("delete of {} {} failed", resource, id);
            }
            println!("{} records -> {}", before, controller.records().len());
            Ok(())
        }
        Command::Export {
            resource,
            view,
            out,
        } => {
            let mut controller = mount(&cfg, &store, resource, &view).await?;
            let rows = controller.export_rows();
            let json = serde_json::to_string_pretty(&rows)?;
            tokio::fs::write(&out, json)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Exported {} {} to {}", rows.len(), resource, out.display());
            report_notices(&mut controller);
            Ok(())
        }
    }
}

impl ViewArgs {
    fn empty() -> Self {
        Self {
            filters: Vec::new(),
            query: Vec::new(),
        }
    }
}

async fn init_config(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path).await? {
        bail!("{} already exists", path.display());
    }
    tokio::fs::write(path, config::example()).await?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn login(cfg: &Config, store: &TokenStore, email: &str, password: Option<String>) -> Result<()> {
    let password = match password.or_else(|| std::env::var(PASSWORD_ENV).ok()) {
        Some(p) if !p.is_empty() => p,
        _ => bail!("Please enter both email and password (--password or ${}).", PASSWORD_ENV),
    };
    let http = build_http_client(&cfg.api.user_agent, cfg.timeout())?;
    let token = auth::login(&http, &cfg.base_url()?, email, &password)
        .await
        .context("login failed")?;
    store.save(&token)?;
    println!("Logged in; token stored at {}", store.path().display());
    Ok(())
}

fn require_session(store: &TokenStore) -> Result<AuthSession> {
    let session = store.session()?;
    if !session.is_authenticated() {
        bail!("not logged in; run `agro-admin login --email <EMAIL>` first");
    }
    Ok(session)
}

fn collection(cfg: &Config, session: AuthSession, kind: ResourceKind) -> Result<HttpCollection> {
    let http = build_http_client(&cfg.api.user_agent, cfg.timeout())?;
    Ok(HttpCollection::new(http, cfg.base_url()?, cfg.resource(kind), session))
}

async fn mount(
    cfg: &Config,
    store: &TokenStore,
    kind: ResourceKind,
    view: &ViewArgs,
) -> Result<ListController> {
    let session = require_session(store)?;
    let mut controller = ListController::new(Arc::new(collection(cfg, session.clone(), kind)?));
    if let Some(reference) = &cfg.resource(kind).reference {
        let source = collection(cfg, session, reference.source)?;
        controller = controller.with_reference_source(Arc::new(source));
    }
    let mut query = ListQuery::new();
    for (k, v) in &view.query {
        query.set(k, v);
    }
    controller.apply_query(query).await;
    for (k, v) in &view.filters {
        if !controller.spec().filter_keys().any(|key| key == k) {
            let known: Vec<&str> = controller.spec().filter_keys().collect();
            bail!("unknown filter '{}' for {}; expected one of {}", k, kind, known.join(", "));
        }
        controller.set_filter(k, v);
    }
    Ok(controller)
}

async fn save(
    cfg: &Config,
    store: &TokenStore,
    kind: ResourceKind,
    id: Option<&str>,
    fields: &[(String, String)],
    image: Option<&Path>,
) -> Result<()> {
    let mut controller = mount(cfg, store, kind, &ViewArgs::empty()).await?;
    match id {
        Some(id) => {
            controller
                .open_editor_for(id)
                .ok_or_else(|| anyhow!("{} {} not found", kind, id))?;
        }
        None => {
            controller.open_editor(None);
        }
    }

    for (key, raw) in fields {
        let value = field_value(&controller, key, raw);
        controller.edit_field(key, value);
    }

    if let Some(path) = image {
        controller.attach(read_attachment(path).await?);
    }

    let outcome = controller.save().await;
    report_notices(&mut controller);
    match outcome {
        SaveOutcome::Committed(report) if report.is_success() => {
            if let Some(record) = report.record() {
                println!("{}", serde_json::to_string_pretty(&Value::Object(record.clone()))?);
            }
            Ok(())
        }
        SaveOutcome::Committed(report) => {
            let failed: Vec<String> = report.failures().map(|(call, _)| call.to_string()).collect();
            bail!("save of {} incomplete; failed: {}", kind, failed.join(", "))
        }
        SaveOutcome::Invalid(_) => bail!("save of {} rejected by validation", kind),
        SaveOutcome::Failed(err) => Err(err).context(format!("save of {} failed", kind)),
        SaveOutcome::NoSession => bail!("no record open for editing"),
    }
}

/// Keep text for fields held as text (in the draft, or the resource's
/// template when the record lacks the field); otherwise accept JSON literals
/// such as numbers and booleans.
fn field_value(controller: &ListController, key: &str, raw: &str) -> Value {
    let current = controller
        .session()
        .and_then(|s| s.draft().get(key))
        .or_else(|| controller.spec().template.get(key));
    match current {
        Some(Value::String(_)) => Value::String(raw.to_string()),
        _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

async fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let mime_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(Attachment {
        field: "image".to_string(),
        file_name,
        mime_type: mime_type.to_string(),
        bytes,
    })
}

fn report_notices(controller: &mut ListController) {
    for notice in controller.take_notices() {
        match notice.level {
            NoticeLevel::Info => eprintln!("{}", notice),
            NoticeLevel::Error => eprintln!("error: {}", notice),
        }
    }
}
