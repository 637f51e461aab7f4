//! # rustlibkey
//!
//! LibKey discovery add-on engine: decides which Third Iron, BrowZine,
//! Unpaywall and host links to show for a search record.
//!
//! ## Modules
//!
//! - [`host`] - Proxy over the host component's record and view model
//! - [`store`] - Selection store and its JSON-backed implementation
//! - [`selection`] - Resolves the active record from store and host feeds
//! - [`config`] - Module settings with multi-campus prefixing
//! - [`libkey`] - Third Iron public API client
//! - [`unpaywall`] - Unpaywall fallback client and action picker
//! - [`waterfall`] - Display decision for one record
//! - [`links`] - Host and combined link stacks
//! - [`enhancer`] - Reactive button and cover pipelines
//! - [`session`] - One-shot resolution used by the CLI and server
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustlibkey::config::{ConfigResolver, Settings};
//! use rustlibkey::libkey::ThirdIronClient;
//! use rustlibkey::unpaywall::UnpaywallHttpClient;
//! use rustlibkey::waterfall::DisplayWaterfall;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load("settings.json".as_ref())?;
//!     let config = Arc::new(ConfigResolver::single_campus(settings));
//!     let api = Arc::new(ThirdIronClient::new(config.clone())?);
//!     let unpaywall = Arc::new(UnpaywallHttpClient::new(config.unpaywall_email())?);
//!     let waterfall = DisplayWaterfall::new(config, api, unpaywall);
//!     let decision = waterfall.decide(None);
//!     println!("{:?}", decision.main_button_type);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod enhancer;
pub mod error;
pub mod host;
pub mod libkey;
pub mod links;
pub mod search_entity;
pub mod selection;
pub mod session;
pub mod store;
pub mod streams;
pub mod translation;
pub mod unpaywall;
pub mod waterfall;

#[cfg(test)]
pub(crate) mod test_server;

pub use error::{LibKeyError, Result};
