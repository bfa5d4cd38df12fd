use crate::client::{Credentials, normalize_base_url};
use crate::error::{Error, Result};
use crate::tokens::{clean_emoji_name, parse_emoji_list, read_emoji_file, split_sequence};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "config.json";
pub const LOCAL_CONFIG_FILE: &str = "local-config.json";
pub const DEFAULT_MAP_FILE: &str = "emoji-map.json";
pub const DEFAULT_CLI_DELAY_MS: u64 = 120;
pub const DEFAULT_WEB_DELAY_MS: u64 = 300;
pub const DEFAULT_WEB_PORT: u16 = 5174;

pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads a process environment variable, treating empty values as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Shared `config.json` next to the tool.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub base: Option<String>,
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub session_cookie: Option<String>,
    pub post_id: Option<String>,
    pub seq: Option<String>,
    pub emojis: Option<Vec<String>>,
    pub emojis_arg: Option<String>,
    pub emojis_file: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub delay_ms: Option<String>,
    pub map_file: Option<String>,
}

/// Personal, uncommitted `local-config.json`; outranks the environment.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub session_cookie: Option<String>,
    pub post_id: Option<String>,
}

fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Parses a JSON config file. A missing file is silently absent; an unreadable or invalid
/// one is logged and treated as absent.
pub fn read_json_file<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read config file");
            return T::default();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "ignoring invalid config file");
        T::default()
    })
}

/// Values given on the command line for `react`; each one outranks every other source.
#[derive(Debug, Default, Clone)]
pub struct ReactOverrides {
    pub base: Option<String>,
    pub token: Option<String>,
    pub session_cookie: Option<String>,
    pub post: Option<String>,
    pub seq: Option<String>,
    pub emojis: Option<String>,
    pub emojis_file: Option<PathBuf>,
    pub delay_ms: Option<u64>,
    pub map_file: Option<PathBuf>,
}

/// Where the list of reactions comes from, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    Configured(Vec<String>),
    File(PathBuf),
    List(String),
    Sequence(String),
}

impl ItemSource {
    pub fn items(&self) -> Result<Vec<String>> {
        let items = match self {
            ItemSource::Configured(names) => names
                .iter()
                .map(|name| clean_emoji_name(name))
                .filter(|name| !name.is_empty())
                .collect(),
            ItemSource::File(path) => read_emoji_file(path)?,
            ItemSource::List(list) => parse_emoji_list(list),
            ItemSource::Sequence(seq) => split_sequence(seq),
        };
        if items.is_empty() {
            return Err(Error::config(
                "no emojis to add; provide --seq, --emojis, --emojis-file, or config emojis",
            ));
        }
        Ok(items)
    }
}

/// Command-line connection values shared by every command that talks to the server.
#[derive(Debug, Default, Clone)]
pub struct ConnectionOverrides {
    pub base: Option<String>,
    pub token: Option<String>,
    pub session_cookie: Option<String>,
}

impl ReactOverrides {
    pub fn connection(&self) -> ConnectionOverrides {
        ConnectionOverrides {
            base: self.base.clone(),
            token: self.token.clone(),
            session_cookie: self.session_cookie.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub base_url: String,
    pub credentials: Credentials,
}

#[derive(Debug, Clone)]
pub struct ReactSettings {
    pub base_url: String,
    pub credentials: Credentials,
    pub post_id: String,
    pub delay: Duration,
    pub map_path: PathBuf,
    pub source: ItemSource,
}

fn pick(candidates: &[Option<&str>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn relative_to(dir: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Base URL and credentials with the same precedence as [`resolve_react`].
pub fn resolve_connection(
    args: &ConnectionOverrides,
    local: &LocalConfig,
    file: &FileConfig,
    env: EnvLookup<'_>,
) -> Result<Connection> {
    let env_base = env("MM_BASE_URL");
    let env_token = env("MM_TOKEN");
    let env_cookie = env("MM_SESSION_COOKIE");

    let base_url = pick(&[
        args.base.as_deref(),
        local.base_url.as_deref(),
        env_base.as_deref(),
        file.base.as_deref(),
        file.base_url.as_deref(),
    ])
    .map(|base| normalize_base_url(&base))
    .filter(|base| !base.is_empty())
    .ok_or_else(|| Error::config("a base URL is required (--base)"))?;
    let token = pick(&[
        args.token.as_deref(),
        local.token.as_deref(),
        env_token.as_deref(),
        file.token.as_deref(),
    ]);
    let session_cookie = pick(&[
        args.session_cookie.as_deref(),
        local.session_cookie.as_deref(),
        env_cookie.as_deref(),
        file.session_cookie.as_deref(),
    ]);
    let credentials = Credentials::from_parts(session_cookie.as_deref(), token.as_deref())?;
    Ok(Connection {
        base_url,
        credentials,
    })
}

/// Resolves `react` settings from, highest first: command line, `local-config.json`,
/// environment, `config.json`.
pub fn resolve_react(
    args: &ReactOverrides,
    local: &LocalConfig,
    file: &FileConfig,
    env: EnvLookup<'_>,
    config_dir: &Path,
) -> Result<ReactSettings> {
    let Connection {
        base_url,
        credentials,
    } = resolve_connection(&args.connection(), local, file, env)?;
    let env_post = env("MM_POST_ID");
    let post_id = pick(&[
        args.post.as_deref(),
        local.post_id.as_deref(),
        env_post.as_deref(),
        file.post_id.as_deref(),
    ]);

    let post_id = post_id.ok_or_else(|| Error::config("a target post id is required (--post)"))?;

    let delay_ms = match args.delay_ms {
        Some(ms) => ms,
        None => match pick(&[env("MM_DELAY_MS").as_deref(), file.delay_ms.as_deref()]) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| Error::config(format!("invalid delay {raw:?}")))?,
            None => DEFAULT_CLI_DELAY_MS,
        },
    };

    let map_path = match &args.map_file {
        Some(path) => relative_to(config_dir, path),
        None => relative_to(
            config_dir,
            pick(&[env("MAP_FILE").as_deref(), file.map_file.as_deref()])
                .unwrap_or_else(|| DEFAULT_MAP_FILE.to_string()),
        ),
    };

    let configured = file
        .emojis
        .as_ref()
        .filter(|names| !names.is_empty())
        .cloned();
    let emojis_file = args
        .emojis_file
        .clone()
        .or_else(|| {
            pick(&[env("EMOJIS_FILE").as_deref(), file.emojis_file.as_deref()]).map(PathBuf::from)
        })
        .map(|path| relative_to(config_dir, path));
    let emojis = pick(&[
        args.emojis.as_deref(),
        env("EMOJIS").as_deref(),
        file.emojis_arg.as_deref(),
    ]);
    let seq = pick(&[args.seq.as_deref(), env("SEQ").as_deref(), file.seq.as_deref()]);

    let source = if let Some(names) = configured {
        ItemSource::Configured(names)
    } else if let Some(path) = emojis_file {
        ItemSource::File(path)
    } else if let Some(list) = emojis {
        ItemSource::List(list)
    } else if let Some(seq) = seq {
        ItemSource::Sequence(seq)
    } else {
        return Err(Error::config(
            "no emojis to add; provide --seq, --emojis, --emojis-file, or config emojis",
        ));
    };

    Ok(ReactSettings {
        base_url,
        credentials,
        post_id,
        delay: Duration::from_millis(delay_ms),
        map_path,
        source,
    })
}

/// Loads `config.json` and `local-config.json` from `config_dir` and resolves the server
/// connection against the process environment.
pub fn load_connection(args: &ConnectionOverrides, config_dir: &Path) -> Result<Connection> {
    let file: FileConfig = read_json_file(&config_dir.join(CONFIG_FILE));
    let local: LocalConfig = read_json_file(&config_dir.join(LOCAL_CONFIG_FILE));
    resolve_connection(args, &local, &file, &process_env)
}

/// Loads `config.json` and `local-config.json` from `config_dir` and resolves `react`
/// settings against the process environment.
pub fn load_react(args: &ReactOverrides, config_dir: &Path) -> Result<ReactSettings> {
    let file: FileConfig = read_json_file(&config_dir.join(CONFIG_FILE));
    let local: LocalConfig = read_json_file(&config_dir.join(LOCAL_CONFIG_FILE));
    let settings = resolve_react(args, &local, &file, &process_env, config_dir)?;
    info!(
        base = %settings.base_url,
        post = %settings.post_id,
        delay_ms = settings.delay.as_millis() as u64,
        map = %settings.map_path.display(),
        auth = settings.credentials.mode(),
        "react settings resolved"
    );
    Ok(settings)
}

/// Connection defaults the web UI pre-fills: environment first, then `local-config.json`
/// values where present.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDefaults {
    pub base_url: String,
    pub session_cookie: String,
}

pub fn local_defaults(local_config: &Path, env: EnvLookup<'_>) -> LocalDefaults {
    let local: LocalConfig = read_json_file(local_config);
    LocalDefaults {
        base_url: pick(&[local.base_url.as_deref(), env("MM_BASE_URL").as_deref()])
            .unwrap_or_default(),
        session_cookie: pick(&[
            local.session_cookie.as_deref(),
            env("MM_SESSION_COOKIE").as_deref(),
        ])
        .unwrap_or_default(),
    }
}

/// `MM_WEB_ADDR` if set, else loopback on `PORT` (default 5174).
pub fn default_web_addr(env: EnvLookup<'_>) -> Result<SocketAddr> {
    if let Some(addr) = env("MM_WEB_ADDR") {
        return addr
            .parse()
            .map_err(|_| Error::config(format!("invalid MM_WEB_ADDR {addr:?}")));
    }
    let port = match env("PORT") {
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|_| Error::config(format!("invalid PORT {raw:?}")))?,
        None => DEFAULT_WEB_PORT,
    };
    Ok(SocketAddr::from(([127, 0, 0, 1], port)))
}
