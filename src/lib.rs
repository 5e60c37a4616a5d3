#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or
)]

//! Settings and navigation firewall core for a browser automation agent.
//!
//! All state lives in a versioned [`ledger::Ledger`]. Typed stores
//! ([`settings::SettingsStore`], [`firewall::FirewallPolicyStore`]) read and
//! update it, publish changes on a [`bus::ChangeBus`], and the pure
//! [`firewall::decide`] answers admission questions from a policy snapshot.

pub mod attachments;
pub mod bus;
pub mod config;
pub mod error;
pub mod firewall;
pub mod ledger;
pub mod settings;
pub mod stores;

pub use config::Config;
pub use error::{StoreError, StoreResult};
pub use stores::Stores;
