pub mod config;
pub mod profile;
pub mod script;
pub mod status;

pub use config::{ParseError, ParsedConfig, PeerEntry, ServerRecord};
pub use profile::ProfileLocator;
pub use script::{ScriptOperation, Timeouts, WgScript};
pub use status::{LiveStatus, StatusError, Transfer, WgShow};
