//! HTTP middleware components.

pub mod account;

pub use account::{ACCOUNT_HEADER, INVENTORY_GROUPS_HEADER, resolve_account};
