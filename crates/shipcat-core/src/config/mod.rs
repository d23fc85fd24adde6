//! Configuration for the shipcat service.
//!
//! Everything lives in one `shipcat.toml`: git credentials and storage, the
//! hosting organization, watcher intervals, collaborator settings and the
//! list of deploy projects.

pub mod parser;
pub mod schema;
pub mod store;

pub use parser::{parse_shipcat_toml, parse_shipcat_toml_str};
pub use schema::{
    ApplySettings, GitHubSettings, GitSettings, NotifySettings, RegistrySettings, ShipcatConfig,
    WatchSettings,
};
pub use store::ConfigStore;
