//! IOC Reputation Agent for Zentinel.
//!
//! Keeps an in-memory store of malicious IP addresses harvested from
//! threat intelligence feeds and answers "is this IP known-bad?" lookups.
//!
//! # Features
//!
//! - **Feed Ingestion** - Periodically fetch plain-text and JSON IP feeds
//! - **Canonical Dedup** - Every address is normalized before it is stored
//! - **Refresh and Prune** - Records are refreshed per sighting and expire
//!   once no feed has reported them for the configured age
//! - **Failure Isolation** - A broken feed only loses its own contribution
//! - **Fail-Open Lookups** - Anything that is not a listed IP is `benign`
//!
//! # Example Configuration
//!
//! ```yaml
//! ingestion:
//!   interval_seconds: 900
//!
//! pruning:
//!   max_age_seconds: 86400
//!
//! feeds:
//!   - name: "log4j-blocklist"
//!     endpoint: "https://thanksforallthefish.nl/log4j_blocklist.txt"
//!     format:
//!       type: plain
//! ```

pub mod config;
pub mod error;
pub mod feeds;
pub mod lookup;
pub mod normalize;
pub mod rpc;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use lookup::{LookupService, Verdict};
pub use scheduler::IngestionScheduler;
pub use store::ReputationStore;
