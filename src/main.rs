use std::{path::Path, sync::Arc};

use bytes::Bytes;
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use mock_helper::{
    adapters::{FetchRequest, FileRuleStore, FileSlot, ReqwestTransport, control_api},
    config::{
        AppConfig, AppConfigValidator, Rule, RuleSnapshot, RuleTable, SnapshotValidator,
        load_app_config,
        loader::{load_snapshot_file, write_snapshot_file},
    },
    core::{
        DraftError, MOCK_MARKER_HEADER, PrefillSource, RuleDraft, apply_draft, delete_rule, resolve,
        suggest_pattern, synthesize, toggle_rule,
    },
    ports::snapshot_slot::SnapshotSlot,
    sync::{AuthoringService, Command, CommandResponse, PageContext, ReloadOutcome, SlotSubscriber},
    tracing_setup,
    utils::Shutdown,
};

/// Page URL used when publishing to page contexts outside this process.
const SHARED_PAGE_URL: &str = "http://localhost/";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Application config file (TOML, YAML or JSON)
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a rule snapshot file
    Validate {
        /// Snapshot file to validate
        file: String,
    },
    /// Write a sample rule snapshot file
    Init {
        /// Output path for the new snapshot
        #[clap(default_value = "mock-rules.json")]
        file: String,
        /// Overwrite an existing file
        #[clap(long)]
        force: bool,
    },
    /// Show which rule a URL resolves to and the response it would get
    Resolve {
        /// Snapshot file to resolve against
        file: String,
        /// Request URL
        url: String,
    },
    /// Issue a request through the interceptor using the published rules
    Fetch {
        url: String,
        #[clap(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request body
        #[clap(short, long)]
        data: Option<String>,
        /// Request header, `Name: value`
        #[clap(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Run a page context on the shared slot and log every reload
    Watch {
        #[clap(long, default_value = SHARED_PAGE_URL)]
        page_url: String,
    },
    /// Run the authoring service and its HTTP control API
    Serve,
    /// Add or update a rule in the authoring store
    Set {
        pattern: String,
        #[clap(long, default_value = "200")]
        status: String,
        #[clap(long, default_value = "0")]
        delay: String,
        /// Response body; JSON is stored as JSON, anything else as text
        #[clap(long)]
        response: Option<String>,
        /// Existing pattern being edited (renames the rule)
        #[clap(long)]
        editing: Option<String>,
    },
    /// Remove a rule from the authoring store
    Remove { pattern: String },
    /// Flip a rule's enabled flag
    Toggle { pattern: String },
    /// Turn mocking on globally
    Enable,
    /// Turn mocking off globally
    Disable,
    /// Suggest a pattern from selected text or a link
    Suggest {
        text: String,
        /// Treat `text` as a link target
        #[clap(long)]
        link: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config = load_app_config(args.config.as_deref())?;

    if args.command.uses_runtime_config() {
        AppConfigValidator::validate(&config).map_err(|e| eyre!("Invalid configuration: {}", e))?;
        tracing_setup::init_tracing_with_config(&config.logging)?;
    }

    match args.command {
        Commands::Validate { file } => validate_command(&file).await,
        Commands::Init { file, force } => init_command(&file, force).await,
        Commands::Resolve { file, url } => resolve_command(&file, &url).await,
        Commands::Suggest { text, link } => suggest_command(text, link),
        Commands::Fetch {
            url,
            method,
            data,
            headers,
        } => fetch_command(&config, url, &method, data, &headers).await,
        Commands::Watch { page_url } => watch_command(&config, page_url).await,
        Commands::Serve => serve_command(&config).await,
        Commands::Set {
            pattern,
            status,
            delay,
            response,
            editing,
        } => {
            let draft = RuleDraft {
                pattern,
                status,
                delay,
                response: response.unwrap_or_else(|| RuleDraft::blank("").response),
            };
            edit_command(&config, move |rules| {
                apply_draft(rules, editing.as_deref(), draft)
                    .map(|pattern| format!("Saved rule {pattern}"))
            })
            .await
        }
        Commands::Remove { pattern } => {
            edit_command(&config, move |rules| {
                delete_rule(rules, &pattern).map(|_| format!("Removed rule {pattern}"))
            })
            .await
        }
        Commands::Toggle { pattern } => {
            edit_command(&config, move |rules| {
                toggle_rule(rules, &pattern).map(|enabled| {
                    let state = if enabled { "enabled" } else { "disabled" };
                    format!("Rule {pattern} {state}")
                })
            })
            .await
        }
        Commands::Enable => set_enabled_command(&config, true).await,
        Commands::Disable => set_enabled_command(&config, false).await,
    }
}

impl Commands {
    /// Offline commands work on files given on the command line only.
    fn uses_runtime_config(&self) -> bool {
        !matches!(
            self,
            Commands::Validate { .. }
                | Commands::Init { .. }
                | Commands::Resolve { .. }
                | Commands::Suggest { .. }
        )
    }
}

/// Authoring service over the configured store, publishing into the slot
/// directory other processes watch.
async fn authoring_service(config: &AppConfig) -> Result<Arc<AuthoringService>> {
    let store = Arc::new(FileRuleStore::new(&config.store_path));
    let service = Arc::new(AuthoringService::new(store));
    let slot: Arc<dyn SnapshotSlot> =
        Arc::new(FileSlot::open(&config.slot_dir).context("Failed to open shared slot")?);
    service
        .register_page(SlotSubscriber::detached(
            SHARED_PAGE_URL,
            slot,
            &config.storage_key,
        ))
        .await;
    Ok(service)
}

fn ensure_acked(response: CommandResponse) -> Result<()> {
    match response {
        CommandResponse::Ack { success: true } => Ok(()),
        CommandResponse::Failed { error, .. } => Err(eyre!("Command failed: {error}")),
        other => Err(eyre!("Unexpected response: {other:?}")),
    }
}

async fn current_rules(service: &AuthoringService) -> Result<(RuleTable, bool)> {
    match service.handle(Command::GetRules).await {
        CommandResponse::Rules { rules, enabled } => Ok((rules, enabled)),
        CommandResponse::Failed { error, .. } => Err(eyre!("Failed to load rules: {error}")),
        other => Err(eyre!("Unexpected response: {other:?}")),
    }
}

async fn edit_command<F>(config: &AppConfig, edit: F) -> Result<()>
where
    F: FnOnce(&mut RuleTable) -> Result<String, DraftError>,
{
    let service = authoring_service(config).await?;
    let (mut rules, enabled) = current_rules(&service).await?;
    let message = edit(&mut rules)?;
    ensure_acked(service.handle(Command::SaveRules { rules, enabled }).await)?;
    println!("✅ {message}");
    Ok(())
}

async fn set_enabled_command(config: &AppConfig, enabled: bool) -> Result<()> {
    let service = authoring_service(config).await?;
    ensure_acked(service.handle(Command::SetEnabled { enabled }).await)?;
    println!(
        "✅ Mocking {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Validate a rule snapshot and exit
async fn validate_command(file: &str) -> Result<()> {
    println!("🔍 Validating rule snapshot: {file}");

    if !Path::new(file).exists() {
        eprintln!("❌ Error: Snapshot file '{file}' not found");
        std::process::exit(1);
    }

    let snapshot = match load_snapshot_file(file).await {
        Ok(snapshot) => {
            println!("✅ Snapshot parsing: OK");
            snapshot
        }
        Err(e) => {
            eprintln!("❌ Snapshot parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = SnapshotValidator::validate(&snapshot) {
        eprintln!("❌ Snapshot validation failed:");
        eprintln!("{e}");
        println!();
        println!("💡 Common fixes:");
        println!("   • Patterns must not be empty");
        println!("   • Status codes must be between 100 and 999");
        println!("   • Header names must be valid HTTP tokens");
        std::process::exit(1);
    }
    println!("✅ Snapshot validation: OK");

    let shadowed = SnapshotValidator::shadowed_rules(&snapshot);
    for s in &shadowed {
        println!(
            "⚠️  Rule '{}' can never match: '{}' comes first and matches it",
            s.pattern, s.shadowed_by
        );
    }

    println!();
    println!("📋 Snapshot Summary:");
    println!("   • Mocking Enabled: {}", snapshot.enabled);
    println!("   • Rules: {}", snapshot.rules.len());
    println!(
        "   • Active Rules: {}",
        snapshot.rules.values().filter(|r| r.is_enabled()).count()
    );
    println!("   • Shadowed Rules: {}", shadowed.len());
    Ok(())
}

/// Write a sample snapshot
async fn init_command(file: &str, force: bool) -> Result<()> {
    if Path::new(file).exists() && !force {
        eprintln!("❌ Error: Snapshot file '{file}' already exists (use --force to overwrite)");
        std::process::exit(1);
    }

    let mut rules = RuleTable::new();
    rules.insert(
        "/api/login".to_string(),
        Rule::new(serde_json::json!({"ok": true})).with_status(201),
    );
    rules.insert(
        "/api/users/*".to_string(),
        Rule::new(serde_json::json!({"code": 0, "message": "success", "data": {}}))
            .with_header("Cache-Control", "no-store")
            .with_delay(300),
    );
    rules.insert(
        "https://cdn.example.com/*.txt".to_string(),
        Rule::new("plain text body")
            .with_content_type("text/plain")
            .disabled(),
    );

    write_snapshot_file(file, &RuleSnapshot::new(rules, true)).await?;
    println!("✅ Created sample rule snapshot at: {file}");
    println!("   Run 'mock-helper validate {file}' to check it");
    Ok(())
}

/// Explain how a URL resolves
async fn resolve_command(file: &str, url: &str) -> Result<()> {
    let snapshot = load_snapshot_file(file).await?;
    if !snapshot.enabled {
        println!("⏸  Mocking is disabled: {url} passes through");
        return Ok(());
    }

    match resolve(&snapshot, url) {
        Some(hit) => {
            let response = synthesize(&hit.rule);
            println!("🎯 {url} -> rule '{}'", hit.pattern);
            if hit.rule.effective_delay() > 0 {
                println!("   delay: {} ms", hit.rule.effective_delay());
            }
            println!("   {} {}", response.status, response.status_text);
            for (name, value) in &response.headers {
                println!("   {}: {}", name, value.to_str().unwrap_or("<binary>"));
            }
            println!();
            println!("{}", response.body_text());
        }
        None => println!("➡️  {url} matches no rule and passes through"),
    }
    Ok(())
}

fn suggest_command(text: String, link: bool) -> Result<()> {
    let source = if link {
        PrefillSource::Link(text)
    } else {
        PrefillSource::Selection(text)
    };
    match suggest_pattern(&source) {
        Some(pattern) => println!("{pattern}"),
        None => return Err(eyre!("Nothing to suggest from the given input")),
    }
    Ok(())
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| eyre!("Header '{line}' is not in 'Name: value' form"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("Invalid header name in '{line}'"))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid header value in '{line}'"))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// One request through the promise-style adapter
async fn fetch_command(
    config: &AppConfig,
    url: String,
    method: &str,
    data: Option<String>,
    headers: &[String],
) -> Result<()> {
    let slot: Arc<dyn SnapshotSlot> =
        Arc::new(FileSlot::open(&config.slot_dir).context("Failed to open shared slot")?);
    let page = PageContext::new(SHARED_PAGE_URL, slot, &config.storage_key);
    if page.reload().await == ReloadOutcome::Missing {
        tracing::info!("no rules published yet, every request passes through");
    }

    let transport = ReqwestTransport::new(config.upstream_base.as_deref())?;
    let registry = page.interceptors(Arc::new(transport));

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| eyre!("Invalid HTTP method: {method}"))?;
    let mut request = FetchRequest::new(method, url);
    request.headers = parse_headers(headers)?;
    request.body = data.map(Bytes::from);

    let response = registry
        .fetch()
        .fetch(request, None)
        .await
        .context("Request failed")?;

    let origin = if response.headers().contains_key(MOCK_MARKER_HEADER) {
        "mocked"
    } else {
        "network"
    };
    println!("{} {} ({origin})", response.status(), response.status_text());
    for (name, value) in response.headers() {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!();
    println!("{}", response.text());
    Ok(())
}

/// Page context that follows the shared slot until interrupted
async fn watch_command(config: &AppConfig, page_url: String) -> Result<()> {
    let slot: Arc<dyn SnapshotSlot> =
        Arc::new(FileSlot::new(&config.slot_dir).context("Failed to watch shared slot")?);
    let page = PageContext::new(page_url, slot, &config.storage_key);
    let listener = page.start().await;
    let handle = page.debug_handle();
    let (rules, enabled) = (handle.rules().len(), handle.is_enabled());
    tracing::info!(
        slot_dir = %config.slot_dir,
        key = %config.storage_key,
        rules,
        enabled,
        "watching for rule changes"
    );

    let shutdown = Shutdown::new();
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.listen_for_signals().await })
    };
    let reason = shutdown.wait().await;
    tracing::info!(?reason, "stopping watch");

    listener.abort();
    signals.abort();
    Ok(())
}

/// Authoring service plus control API
async fn serve_command(config: &AppConfig) -> Result<()> {
    let service = authoring_service(config).await?;
    let report = service
        .publish()
        .await
        .context("Failed to publish the stored rules")?;
    tracing::info!(?report, "initial snapshot published");

    let (client, command_loop) = service.spawn();
    let app = control_api::router(client);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;
    tracing::info!("mock-helper control API listening on {}", config.listen_addr);
    println!("mock-helper control API listening on {}", config.listen_addr);

    let shutdown = Shutdown::new();
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.listen_for_signals().await })
    };

    let graceful = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = graceful.wait().await;
            tracing::info!(?reason, "shutdown signal received");
        })
        .await
        .context("Server error")?;

    signals.abort();
    command_loop.abort();
    tracing::info!("graceful shutdown completed");
    Ok(())
}
