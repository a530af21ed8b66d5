//! dirsync LDAP sync -- reconciles directory users, groups and group
//! memberships with the local store.
//!
//! Every pass funnels records through the same normalize, resolve and apply
//! steps, whether it enumerates the whole directory or looks up one user.

pub mod auth;
pub mod client;
pub mod groups;
pub mod job;
pub mod lock;
pub mod normalize;
pub mod record;
pub mod resolve;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;
