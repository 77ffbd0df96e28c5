//! Shared utilities.

pub mod alias;
pub mod clock;
pub mod hash;
pub mod interval;
pub mod itemkey;
pub mod keyaccess;
pub mod telemetry;

pub use alias::AliasManager;
pub use clock::*;
pub use hash::name_seed;
pub use interval::parse_seconds;
pub use itemkey::parse_key;
pub use keyaccess::{AccessRules, KeyAccessRule, Permission};
pub use telemetry::*;
