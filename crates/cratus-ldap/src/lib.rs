//! LDAP users, groups and nested group membership.
//!
//! This crate turns logical lookups ("the group named `admins`", "every group `jdoe` belongs
//! to, directly or through nesting") into directory searches, using the attribute mapping
//! from [`cratus_core::SchemaConfig`] so the same code runs against directories that name
//! their attributes differently.

#![deny(missing_docs)]

mod client;
mod directory;
mod dn;
mod entry;
mod group;
mod membership;
mod user;

#[cfg(test)]
mod testing;

pub use client::{DirectoryConnection, SearchOptions, SearchScope};
pub use directory::{Directory, DirectoryObject};
pub use dn::{DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use entry::DirectoryEntry;
pub use group::Group;
pub use membership::Membership;
pub use user::{AccountControl, UnlockOutcome, User, WINDOWS_EPOCH_OFFSET_TICKS};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = cratus_core::Result<T>;
