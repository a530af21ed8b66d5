//! dirsync SAML -- assertion consumer service and service provider metadata.
//!
//! The consumer identifies members by the same stable identifier the
//! directory sync uses, so a SAML login and a later sync land on one row.

pub mod acs;
pub mod metadata;
pub mod provider;
pub mod redirect;
pub mod response;
pub mod routes;

#[cfg(test)]
pub(crate) mod testing;
