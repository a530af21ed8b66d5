//! Service provider metadata.

/// SAML 2.0 SP metadata advertising the assertion consumer endpoint.
pub fn generate_sp_metadata(entity_id: &str, acs_url: &str) -> String {
    let entity_id = xml_escape(entity_id);
    let acs_url = xml_escape(acs_url);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"
                     entityID="{entity_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="true"
                      protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:NameIDFormat>urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified</md:NameIDFormat>
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"
                                 Location="{acs_url}"
                                 index="1"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#
    )
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_names_entity_and_acs() {
        let xml = generate_sp_metadata(
            "https://www.example.com/saml/metadata",
            "https://www.example.com/saml/acs",
        );
        assert!(xml.contains(r#"entityID="https://www.example.com/saml/metadata""#));
        assert!(xml.contains(r#"Location="https://www.example.com/saml/acs""#));
        assert!(xml.contains("SPSSODescriptor"));
        assert!(xml.contains("HTTP-POST"));
    }

    #[test]
    fn attribute_values_are_escaped() {
        let xml = generate_sp_metadata("urn:a&b", "https://x/acs?a=1&b=\"2\"");
        assert!(xml.contains("urn:a&amp;b"));
        assert!(xml.contains("a=1&amp;b=&quot;2&quot;"));
    }
}
