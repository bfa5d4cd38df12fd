use std::error::Error;
use std::path::{Path, PathBuf};

use atty::Stream;
use clap::{Args, Parser, Subcommand};
use mm_reactions::catalog::{PAGE_SIZE, fetch_catalog};
use mm_reactions::config::{self, ConnectionOverrides, ReactOverrides};
use mm_reactions::search::{clamp_limit, clamp_offset, normalize_query};
use mm_reactions::telemetry::init_tracing;
use mm_reactions::tokens::parse_emoji_list;
use mm_reactions::{
    DispatchReport, EmojiMap, MattermostClient, PresetStore, ReactionOutcome, SearchResult,
    dispatch_with, resolve, search,
};
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing::warn;

const PRESETS_FILE: &str = "presets.json";

#[derive(Parser, Debug)]
#[command(
    name = "mm-reactions",
    about = "Bulk-add emoji reactions to Mattermost posts",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding config.json, local-config.json and the emoji map.
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// Preset file (defaults to presets.json in the config directory).
    #[arg(long, global = true)]
    presets: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a sequence of reactions to one post.
    React(ReactArgs),
    /// Rank the server's emoji catalog against a query.
    Search {
        /// Name fragment to look for; surrounding colons are ignored.
        query: String,
        /// Maximum number of matches to return.
        #[arg(short, long)]
        limit: Option<i64>,
        /// Number of ranked matches to skip.
        #[arg(long)]
        offset: Option<i64>,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Fetch the whole emoji catalog and report its size.
    Reindex {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Manage saved emoji lists.
    #[command(subcommand)]
    Preset(PresetCommand),
    /// Run the local web UI and API proxy.
    #[cfg(feature = "web")]
    Serve(ServeArgs),
}

#[derive(Args, Debug, Default)]
struct ConnectionArgs {
    /// Server base URL, e.g. https://chat.example.com.
    #[arg(long)]
    base: Option<String>,
    /// Personal access token.
    #[arg(long)]
    token: Option<String>,
    /// Browser session cookie ("MMAUTHTOKEN=...; MMCSRF=..."); preferred over --token.
    #[arg(long)]
    session_cookie: Option<String>,
}

impl ConnectionArgs {
    fn overrides(&self) -> ConnectionOverrides {
        ConnectionOverrides {
            base: self.base.clone(),
            token: self.token.clone(),
            session_cookie: self.session_cookie.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct ReactArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    /// Target post id.
    #[arg(long)]
    post: Option<String>,
    /// Character sequence; each character is one token (digits become their names).
    #[arg(long)]
    seq: Option<String>,
    /// Emoji list such as ":tada::heart:" or "tada, heart".
    #[arg(long)]
    emojis: Option<String>,
    /// File with one emoji per line (or colon groups).
    #[arg(long)]
    emojis_file: Option<PathBuf>,
    /// Pause between reactions in milliseconds.
    #[arg(long = "delay", visible_alias = "delay-ms")]
    delay_ms: Option<u64>,
    /// JSON map of token to emoji name.
    #[arg(long)]
    map_file: Option<PathBuf>,
}

impl ReactArgs {
    fn overrides(&self) -> ReactOverrides {
        ReactOverrides {
            base: self.connection.base.clone(),
            token: self.connection.token.clone(),
            session_cookie: self.connection.session_cookie.clone(),
            post: self.post.clone(),
            seq: self.seq.clone(),
            emojis: self.emojis.clone(),
            emojis_file: self.emojis_file.clone(),
            delay_ms: self.delay_ms,
            map_file: self.map_file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum PresetCommand {
    /// List saved presets with their sizes.
    List,
    /// Print the emoji in one preset.
    Show { name: String },
    /// Save (or replace) a preset.
    Save {
        name: String,
        /// Emoji names, colon groups, or comma-separated lists.
        #[arg(required = true)]
        emojis: Vec<String>,
    },
    /// Remove a preset.
    Delete { name: String },
}

#[cfg(feature = "web")]
#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen address (defaults to MM_WEB_ADDR or 127.0.0.1:$PORT, port 5174).
    #[arg(long)]
    addr: Option<std::net::SocketAddr>,
    /// Connection defaults offered to the UI.
    #[arg(long)]
    local_config: Option<PathBuf>,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let default_level = match &cli.command {
        #[cfg(feature = "web")]
        Command::Serve(_) => "info",
        _ => "warn",
    };
    init_tracing(default_level);

    let presets = PresetStore::new(
        cli.presets
            .clone()
            .unwrap_or_else(|| cli.config_dir.join(PRESETS_FILE)),
    );
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Command::React(args) => runtime.block_on(handle_react(args, &cli.config_dir, cli.json)),
        Command::Search {
            query,
            limit,
            offset,
            connection,
        } => runtime.block_on(handle_search(
            query,
            limit,
            offset,
            connection,
            &cli.config_dir,
            cli.json,
        )),
        Command::Reindex { connection } => {
            runtime.block_on(handle_reindex(connection, &cli.config_dir, cli.json))
        }
        Command::Preset(command) => handle_preset(command, &presets, cli.json),
        #[cfg(feature = "web")]
        Command::Serve(args) => runtime.block_on(handle_serve(args, &cli.config_dir, presets)),
    }
}

async fn handle_react(
    args: ReactArgs,
    config_dir: &Path,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let settings = config::load_react(&args.overrides(), config_dir)?;
    let overrides = EmojiMap::load(&settings.map_path);

    let mut names = Vec::new();
    for token in settings.source.items()? {
        let name = resolve(&token, &overrides);
        if name.is_empty() {
            warn!(token = %token, "token does not resolve to an emoji name; skipping");
            continue;
        }
        names.push(name);
    }
    if names.is_empty() {
        return Err("no resolvable emoji names to send".into());
    }

    let client = MattermostClient::new(&settings.base_url, settings.credentials.clone())?;
    let total = names.len();
    let mut seen = 0usize;
    let report = dispatch_with(
        &client,
        &settings.post_id,
        &names,
        settings.delay,
        |outcome| {
            seen += 1;
            if !as_json {
                print_progress(seen, total, outcome);
            }
        },
    )
    .await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report_summary(&report);
    }
    Ok(())
}

async fn handle_search(
    query: String,
    limit: Option<i64>,
    offset: Option<i64>,
    connection: ConnectionArgs,
    config_dir: &Path,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if normalize_query(&query).is_empty() {
        return Err("Search query cannot be empty".into());
    }
    let conn = config::load_connection(&connection.overrides(), config_dir)?;
    let client = MattermostClient::new(&conn.base_url, conn.credentials)?;
    let index = fetch_catalog(&client, PAGE_SIZE).await?;
    let result = search(&index, &query, clamp_limit(limit), clamp_offset(offset));

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_search_table(&query, &result);
    }
    Ok(())
}

async fn handle_reindex(
    connection: ConnectionArgs,
    config_dir: &Path,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let conn = config::load_connection(&connection.overrides(), config_dir)?;
    let client = MattermostClient::new(&conn.base_url, conn.credentials)?;
    let index = fetch_catalog(&client, PAGE_SIZE).await?;
    if as_json {
        let payload = json!({ "base": client.base_url(), "rebuilt": true, "count": index.len() });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{} emoji available on {}", index.len(), client.base_url());
    }
    Ok(())
}

fn handle_preset(
    command: PresetCommand,
    store: &PresetStore,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    match command {
        PresetCommand::List => {
            let presets = store.list()?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&json!({ "names": presets }))?);
            } else if presets.is_empty() {
                println!("No presets saved in {}.", store.path().display());
            } else {
                let width = presets
                    .iter()
                    .map(|preset| preset.name.len())
                    .max()
                    .unwrap_or(4)
                    .max("NAME".len());
                println!("{:<width$}  {}", "NAME", "COUNT", width = width);
                println!("{:-<width$}  {}", "", "-----", width = width);
                for preset in presets {
                    println!("{:<width$}  {}", preset.name, preset.count, width = width);
                }
            }
        }
        PresetCommand::Show { name } => {
            let preset = store.get(&name)?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&preset)?);
            } else {
                println!("Preset \"{}\" ({} emoji):", preset.name, preset.emojis.len());
                for (idx, emoji) in preset.emojis.iter().enumerate() {
                    println!("{:>4}. :{emoji}:", idx + 1);
                }
            }
        }
        PresetCommand::Save { name, emojis } => {
            let names: Vec<String> = emojis
                .iter()
                .flat_map(|raw| parse_emoji_list(raw))
                .collect();
            let saved = store.put(&name, &names)?;
            if as_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(
                        &json!({ "ok": true, "name": saved.name, "count": saved.count })
                    )?
                );
            } else {
                println!("Saved preset \"{}\" with {} emoji.", saved.name, saved.count);
            }
        }
        PresetCommand::Delete { name } => {
            store.delete(&name)?;
            if as_json {
                println!("{}", json!({ "ok": true }));
            } else {
                println!("Deleted preset \"{}\".", name.trim());
            }
        }
    }
    Ok(())
}

#[cfg(feature = "web")]
async fn handle_serve(
    args: ServeArgs,
    config_dir: &Path,
    presets: PresetStore,
) -> Result<(), Box<dyn Error>> {
    use mm_reactions::web::{WebConfig, serve};

    let addr = match args.addr {
        Some(addr) => addr,
        None => config::default_web_addr(&config::process_env)?,
    };
    let config = WebConfig {
        addr,
        presets_path: presets.path().to_path_buf(),
        local_config_path: args
            .local_config
            .unwrap_or_else(|| config_dir.join(config::LOCAL_CONFIG_FILE)),
    };
    serve(config).await?;
    Ok(())
}

fn print_progress(index: usize, total: usize, outcome: &ReactionOutcome) {
    let state = match (outcome.ok, outcome.skipped) {
        (true, false) => "ok",
        (true, true) => "skipped",
        (false, _) => "FAILED",
    };
    let detail = match (&outcome.message, outcome.ok) {
        (Some(message), false) => format!(" {} {message}", outcome.status),
        _ => String::new(),
    };
    println!("[{index}/{total}] :{}: {state}{detail}", outcome.emoji);
}

fn print_report_summary(report: &DispatchReport) {
    let mut text = format!(
        "| total | added | already present | failed |\n|-|-|-|-|\n| {} | {} | {} | {} |\n",
        report.total, report.success, report.skipped, report.failed
    );
    let failures: Vec<_> = report.results.iter().filter(|r| !r.ok).collect();
    if !failures.is_empty() {
        text.push_str("\n**Failures**\n\n");
        for failure in failures {
            text.push_str(&format!(
                "* `:{}:` {} {}\n",
                failure.emoji,
                failure.status,
                failure.message.as_deref().unwrap_or_default()
            ));
        }
    }
    render_markdown_block("Summary", &text);
}

fn print_search_table(query: &str, result: &SearchResult) {
    if result.items.is_empty() {
        println!("No emoji matched \"{query}\".");
        return;
    }
    let width = result
        .items
        .iter()
        .map(|item| item.name.len())
        .max()
        .unwrap_or(4)
        .max("NAME".len());
    println!(
        "Matches for \"{}\" ({}-{} of {}{}):",
        normalize_query(query),
        result.offset + 1,
        result.offset + result.items.len(),
        result.total,
        if result.truncated { ", more available" } else { "" }
    );
    println!("{:<width$}  {}", "NAME", "ID", width = width);
    println!("{:-<width$}  {}", "", "----------", width = width);
    for item in &result.items {
        println!("{:<width$}  {}", item.name, item.id, width = width);
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown_block(title: &str, body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    println!("\n{title}:");
    if stdout_is_tty() {
        let skin = MadSkin::default();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
