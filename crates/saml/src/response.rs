//! Reads the subject, status and attribute statement out of a posted
//! `SAMLResponse`.
//!
//! This does not check XML signatures. It is meant for deployments that
//! terminate SAML at a trusted proxy, and is only wired into the server when
//! `saml.allow_unsigned_assertions` is set.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use dirsync_core::error::{DirsyncError, Result};

use crate::provider::{AssertionProcessor, ProcessedAssertion};

/// Largest encoded response accepted before decoding.
const MAX_ENCODED_SIZE: usize = 512 * 1024;

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Parses posted responses without signature validation.
#[derive(Debug, Default, Clone)]
pub struct UnsignedResponseParser;

#[async_trait]
impl AssertionProcessor for UnsignedResponseParser {
    async fn process(&self, saml_response: &str) -> Result<ProcessedAssertion> {
        parse_posted_response(saml_response)
    }
}

/// Decode the HTTP-POST binding form value and parse it.
pub fn parse_posted_response(encoded: &str) -> Result<ProcessedAssertion> {
    if encoded.len() > MAX_ENCODED_SIZE {
        return Err(DirsyncError::AssertionRejected(format!(
            "SAMLResponse exceeds {MAX_ENCODED_SIZE} bytes"
        )));
    }
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let xml = STANDARD
        .decode(compact)
        .map_err(|e| DirsyncError::AssertionRejected(format!("SAMLResponse is not base64: {e}")))?;
    let xml = String::from_utf8(xml)
        .map_err(|e| DirsyncError::AssertionRejected(format!("SAMLResponse is not UTF-8: {e}")))?;
    parse_response_xml(&xml)
}

#[derive(Clone, Copy, PartialEq)]
enum TextTarget {
    None,
    NameId,
    AttributeValue,
}

/// Parse decoded response XML.
pub fn parse_response_xml(xml: &str) -> Result<ProcessedAssertion> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut status: Option<String> = None;
    let mut name_id: Option<String> = None;
    let mut session_index: Option<String> = None;
    let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
    let mut current_attribute: Option<String> = None;
    let mut target = TextTarget::None;
    let mut saw_assertion = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                match local_name(&e).as_str() {
                    "StatusCode" if status.is_none() => status = attribute(&e, "Value"),
                    "Assertion" => saw_assertion = true,
                    "NameID" => target = TextTarget::NameId,
                    "AuthnStatement" => session_index = attribute(&e, "SessionIndex"),
                    "Attribute" => current_attribute = attribute(&e, "Name"),
                    "AttributeValue" if current_attribute.is_some() => {
                        target = TextTarget::AttributeValue
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => match local_name(&e).as_str() {
                "StatusCode" if status.is_none() => status = attribute(&e, "Value"),
                "AuthnStatement" => session_index = attribute(&e, "SessionIndex"),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| DirsyncError::AssertionRejected(format!("bad XML text: {e}")))?
                    .to_string();
                match target {
                    TextTarget::NameId => name_id = Some(text),
                    TextTarget::AttributeValue => {
                        if let Some(name) = &current_attribute {
                            attributes.entry(name.clone()).or_default().push(text);
                        }
                    }
                    TextTarget::None => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"NameID" | b"AttributeValue" => target = TextTarget::None,
                    b"Attribute" => current_attribute = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DirsyncError::AssertionRejected(format!(
                    "XML parse error: {e}"
                )))
            }
            _ => {}
        }
    }

    let status = status.unwrap_or_default();
    if status != STATUS_SUCCESS {
        let reason = if status.is_empty() {
            "response has no status".to_string()
        } else {
            format!("identity provider returned status {status}")
        };
        return Ok(ProcessedAssertion::failed(reason));
    }
    if !saw_assertion {
        return Ok(ProcessedAssertion::failed("response carries no assertion"));
    }

    Ok(ProcessedAssertion {
        authenticated: name_id.is_some(),
        error_reason: None,
        name_id,
        attributes,
        session_index,
    })
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FederationProvider;

    fn response(status: &str, body: &str) -> String {
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_r1" Version="2.0">
  <samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>
  {body}
</samlp:Response>"#
        )
    }

    const ASSERTION: &str = r#"<saml:Assertion ID="_a1">
    <saml:Subject><saml:NameID>q83vAYCBgoOQkZKToKGiqw==</saml:NameID></saml:Subject>
    <saml:AuthnStatement SessionIndex="_session42"/>
    <saml:AttributeStatement>
      <saml:Attribute Name="http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname">
        <saml:AttributeValue>Joe</saml:AttributeValue>
      </saml:Attribute>
      <saml:Attribute Name="http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress">
        <saml:AttributeValue>joe@bloggs.com</saml:AttributeValue>
        <saml:AttributeValue>joe.bloggs@example.com</saml:AttributeValue>
      </saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>"#;

    #[test]
    fn successful_response_is_parsed() {
        let xml = response(STATUS_SUCCESS, ASSERTION);
        let parsed = parse_response_xml(&xml).unwrap();
        assert!(parsed.is_authenticated());
        assert_eq!(parsed.name_identifier().as_deref(), Some("q83vAYCBgoOQkZKToKGiqw=="));
        assert_eq!(parsed.session_index().as_deref(), Some("_session42"));
        assert_eq!(
            parsed.first_attribute("http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname"),
            Some("Joe")
        );
        assert_eq!(
            parsed.attributes()
                ["http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress"]
                .len(),
            2
        );
    }

    #[test]
    fn failed_status_sets_error_reason() {
        let xml = response("urn:oasis:names:tc:SAML:2.0:status:Requester", "");
        let parsed = parse_response_xml(&xml).unwrap();
        assert!(!parsed.is_authenticated());
        assert!(parsed
            .last_error_reason()
            .unwrap()
            .contains("status:Requester"));
    }

    #[test]
    fn missing_assertion_is_an_error_reason() {
        let parsed = parse_response_xml(&response(STATUS_SUCCESS, "")).unwrap();
        assert_eq!(
            parsed.last_error_reason().as_deref(),
            Some("response carries no assertion")
        );
    }

    #[test]
    fn posted_form_value_is_base64_decoded() {
        let encoded = STANDARD.encode(response(STATUS_SUCCESS, ASSERTION));
        let parsed = parse_posted_response(&encoded).unwrap();
        assert!(parsed.is_authenticated());
    }

    #[test]
    fn non_base64_post_is_rejected() {
        let err = parse_posted_response("not base64!").unwrap_err();
        assert!(matches!(err, DirsyncError::AssertionRejected(_)));
    }

    #[test]
    fn malformed_xml_is_rejected() {
        let err = parse_response_xml("<samlp:Response><a></b>").unwrap_err();
        assert!(matches!(err, DirsyncError::AssertionRejected(_)));
    }
}
