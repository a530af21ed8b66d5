//! The federation provider seam: what the assertion consumer needs to know
//! about a processed SAML response.

use std::collections::HashMap;

use async_trait::async_trait;
use dirsync_core::error::Result;

/// Read-only view of a processed assertion.
pub trait FederationProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Set when processing the response failed; takes precedence over
    /// `is_authenticated`.
    fn last_error_reason(&self) -> Option<String>;

    /// Base64 form of the subject's name identifier.
    fn name_identifier(&self) -> Option<String>;

    /// Claim URI to values.
    fn attributes(&self) -> &HashMap<String, Vec<String>>;

    fn session_index(&self) -> Option<String>;

    /// First non-empty value of a claim.
    fn first_attribute(&self, claim: &str) -> Option<&str> {
        self.attributes()
            .get(claim)?
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

/// Plain assertion data, filled in by whatever validated the response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedAssertion {
    pub authenticated: bool,
    pub error_reason: Option<String>,
    pub name_id: Option<String>,
    pub attributes: HashMap<String, Vec<String>>,
    pub session_index: Option<String>,
}

impl ProcessedAssertion {
    /// A failed response with the given reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

impl FederationProvider for ProcessedAssertion {
    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn last_error_reason(&self) -> Option<String> {
        self.error_reason.clone().filter(|r| !r.trim().is_empty())
    }

    fn name_identifier(&self) -> Option<String> {
        self.name_id.clone()
    }

    fn attributes(&self) -> &HashMap<String, Vec<String>> {
        &self.attributes
    }

    fn session_index(&self) -> Option<String> {
        self.session_index.clone()
    }
}

/// Turns the `SAMLResponse` form field posted to the ACS into an assertion.
#[async_trait]
pub trait AssertionProcessor: Send + Sync {
    async fn process(&self, saml_response: &str) -> Result<ProcessedAssertion>;
}
