//! Bulk emoji reactions for Mattermost posts.
//!
//! The library holds the pieces shared by the `mm-reactions` CLI and its local web UI:
//! token resolution, the per-server emoji index with ranked search, the sequential
//! reaction dispatcher, and the preset file.

pub mod catalog;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod presets;
pub mod search;
pub mod tokens;

#[cfg(any(feature = "cli", feature = "web"))]
pub mod telemetry;
#[cfg(feature = "web")]
pub mod web;

pub use catalog::CatalogCache;
pub use client::{Credentials, MattermostApi, MattermostClient};
pub use dispatch::{DispatchReport, ReactionOutcome, dispatch, dispatch_with};
pub use error::{Error, Result};
pub use presets::{Preset, PresetStore, PresetSummary};
pub use search::{EmojiRecord, IndexedEmoji, SearchResult, search};
pub use tokens::{EmojiMap, resolve};
