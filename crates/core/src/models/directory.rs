//! Raw and normalized directory records.

use std::collections::BTreeMap;

use super::identifier::StableIdentifier;
use super::member::ProfilePatch;

/// A directory attribute value. Attributes are always multi-valued on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Text(Vec<String>),
    Binary(Vec<Vec<u8>>),
}

/// One directory entry as an attribute map keyed by lower-case attribute name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub dn: String,
    attrs: BTreeMap<String, AttributeValue>,
}

impl RawEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// Set a text attribute, replacing any previous value.
    pub fn set_text<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs.insert(
            name.to_ascii_lowercase(),
            AttributeValue::Text(values.into_iter().map(Into::into).collect()),
        );
    }

    /// Set a binary attribute, replacing any previous value.
    pub fn set_binary(&mut self, name: &str, values: Vec<Vec<u8>>) {
        self.attrs
            .insert(name.to_ascii_lowercase(), AttributeValue::Binary(values));
    }

    /// Builder form of [`RawEntry::set_text`] for a single value.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_text(name, [value.into()]);
        self
    }

    /// Builder form of [`RawEntry::set_binary`] for a single value.
    pub fn with_binary(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.set_binary(name, vec![value.into()]);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attrs.get(&name.to_ascii_lowercase())
    }

    /// First value of a text attribute; binary values are decoded lossily.
    pub fn first_text(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            AttributeValue::Text(values) => values.first().cloned(),
            AttributeValue::Binary(values) => values
                .first()
                .map(|v| String::from_utf8_lossy(v).into_owned()),
        }
    }

    /// All values of a text attribute, empty when absent.
    pub fn all_text(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(AttributeValue::Text(values)) => values.clone(),
            Some(AttributeValue::Binary(values)) => values
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }
}

/// Normalized view of a remote user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub identifier: StableIdentifier,
    pub dn: String,
    pub common_name: Option<String>,
    pub account_name: Option<String>,
    pub email: Option<String>,
    /// Remote group DNs from `memberof`.
    pub member_of: Vec<String>,
    pub profile: ProfilePatch,
}

/// Normalized view of a remote group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub identifier: StableIdentifier,
    pub dn: String,
    pub name: Option<String>,
    pub account_name: Option<String>,
    pub description: Option<String>,
}
