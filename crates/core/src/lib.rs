//! dirsync core: configuration, domain models, directory collaborator trait,
//! and the local store.

pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod models;
