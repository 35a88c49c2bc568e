//! # Canonical XML
//!
//! Order-preserving canonicalization of XML documents, used to decide whether
//! a declared policy document differs semantically from the remote copy.
//!
//! The Graph API reformats stored policies on the way back out (whitespace,
//! re-declared namespaces), so naive string comparison reports a diff on
//! every read-after-write. Canonicalization drops the noise at the token
//! level instead of regex-stripping raw text, which would corrupt
//! significant whitespace inside character data.

use crate::models::ValidationError;
use anyhow::{anyhow, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

/// Test two XML documents for semantic equivalence.
///
/// Fails closed: if either document cannot be canonicalized, the pair is
/// reported as not equivalent so that a caller using this as a diff gate
/// falls through to an update. Sibling order is significant; documents with
/// the same elements in a different order are not equivalent.
pub fn equivalent(a: &str, b: &str) -> bool {
    match (canonicalize(a), canonicalize(b)) {
        (Ok(left), Ok(right)) => left == right,
        (Err(e), _) | (_, Err(e)) => {
            debug!("treating documents as different, canonicalization failed: {e}");
            false
        }
    }
}

/// Reduce a document to its canonical serialized form.
///
/// Comments, processing instructions, the XML declaration, DOCTYPE, and
/// whitespace-only character data are dropped; retained character data is
/// trimmed; empty-element tags are expanded so `<a/>` and `<a></a>`
/// canonicalize identically. Tags are rebuilt from their parsed names and
/// attributes, so intra-tag formatting (spacing between attributes, quote
/// style, entity spelling inside values) also normalizes away. The
/// surviving tokens are re-serialized with single-space indentation, so
/// two equivalent documents produce byte-identical output.
pub fn canonicalize(document: &str) -> Result<String> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().expand_empty_elements = true;

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 1);
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Decl(_) | Event::DocType(_) | Event::PI(_) | Event::Comment(_) => {}
            Event::Start(start) => {
                depth += 1;
                writer.write_event(Event::Start(rebuild_tag(&start)?))?;
            }
            Event::End(end) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| anyhow!("unexpected closing tag"))?;
                let name = std::str::from_utf8(end.name().as_ref())?.to_string();
                writer.write_event(Event::End(BytesEnd::new(name)))?;
            }
            Event::Text(text) => {
                let raw = text.into_inner();
                let content = std::str::from_utf8(&raw)?.trim();
                if !content.is_empty() {
                    // Already escaped, write through verbatim.
                    writer.write_event(Event::Text(BytesText::from_escaped(content)))?;
                }
            }
            Event::CData(cdata) => {
                let raw = cdata.into_inner();
                let content = std::str::from_utf8(&raw)?.trim();
                if !content.is_empty() {
                    // CDATA carries the same character data, escape it on write.
                    writer.write_event(Event::Text(BytesText::new(content)))?;
                }
            }
            // Not emitted while empty-element expansion is on; kept so the
            // canonical form stays stable if the reader config ever changes.
            Event::Empty(start) => {
                let rebuilt = rebuild_tag(&start)?;
                let end = rebuilt.to_end().into_owned();
                writer.write_event(Event::Start(rebuilt))?;
                writer.write_event(Event::End(end))?;
            }
        }
    }

    if depth != 0 {
        return Err(anyhow!("document ended with {depth} unclosed element(s)"));
    }

    Ok(String::from_utf8(writer.into_inner())?)
}

/// Rebuild a start tag from its parsed name and attributes.
///
/// Writing the raw tag bytes back out would keep whatever spacing and
/// quote style the source used between attributes; re-emitting from the
/// parsed form leaves a single uniform rendering. Attribute values are
/// unescaped and re-escaped so equivalent entity spellings converge too.
fn rebuild_tag(start: &BytesStart<'_>) -> Result<BytesStart<'static>> {
    let name = std::str::from_utf8(start.name().as_ref())?.to_string();
    let mut rebuilt = BytesStart::new(name);
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = std::str::from_utf8(attribute.key.as_ref())?;
        let value = attribute.unescape_value()?;
        rebuilt.push_attribute((key, value.as_ref()));
    }
    Ok(rebuilt)
}

/// Strict spec-acceptance gate for policy documents.
///
/// Walks the token stream once and rejects malformed XML, processing
/// instructions other than the XML declaration, and declarations whose
/// `version` is anything but `"1.0"`. This gate never contributes to the
/// equivalence decision made by [`equivalent`].
pub fn validate_policy_document(field: &str, document: &str) -> Result<(), Vec<ValidationError>> {
    let mut reader = Reader::from_str(document);
    let mut errors = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Decl(decl)) => match decl.version() {
                Ok(version) if version.as_ref() == b"1.0" => {}
                Ok(version) => {
                    errors.push(ValidationError::new(
                        field,
                        format!(
                            "only xml version 1.0 is supported, declaration stated version={}",
                            String::from_utf8_lossy(&version)
                        ),
                    ));
                    break;
                }
                Err(e) => {
                    errors.push(ValidationError::new(
                        field,
                        format!("could not parse the xml declaration: {e}"),
                    ));
                    break;
                }
            },
            Ok(Event::PI(pi)) => {
                errors.push(ValidationError::new(
                    field,
                    format!(
                        "only the xml declaration is supported, found processing instruction '{}'",
                        String::from_utf8_lossy(pi.target())
                    ),
                ));
                break;
            }
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                let Some(next) = depth.checked_sub(1) else {
                    errors.push(ValidationError::new(field, "unexpected closing tag"));
                    break;
                };
                depth = next;
            }
            Ok(_) => {}
            Err(e) => {
                errors.push(ValidationError::new(field, format!("invalid policy xml: {e}")));
                break;
            }
        }
    }

    if errors.is_empty() && depth != 0 {
        errors.push(ValidationError::new(
            field,
            format!("document ended with {depth} unclosed element(s)"),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<TrustFrameworkPolicy PolicySchemaVersion="0.3.0.0" PolicyId="B2C_1A_Base">
  <BasePolicy>
    <PolicyId>B2C_1A_TrustFrameworkExtensions</PolicyId>
  </BasePolicy>
  <RelyingParty>
    <DefaultUserJourney ReferenceId="SignUpOrSignIn" />
  </RelyingParty>
</TrustFrameworkPolicy>"#;

    #[test]
    fn test_equivalence_is_reflexive() {
        assert!(equivalent(POLICY, POLICY));
    }

    #[test]
    fn test_whitespace_comments_and_pis_are_ignored() {
        let reformatted = r#"<?xml version="1.0"?>
<!-- re-exported by the remote side -->
<TrustFrameworkPolicy PolicySchemaVersion="0.3.0.0" PolicyId="B2C_1A_Base">
        <?formatter hint?>
        <BasePolicy><PolicyId>B2C_1A_TrustFrameworkExtensions</PolicyId></BasePolicy>


        <RelyingParty>
                <DefaultUserJourney ReferenceId="SignUpOrSignIn"/>
        </RelyingParty>
</TrustFrameworkPolicy>"#;

        assert!(equivalent(POLICY, reformatted));
    }

    #[test]
    fn test_attribute_spacing_is_not_a_difference() {
        assert!(equivalent(
            r#"<root><a x="1"/></root>"#,
            r#"<root><a  x="1"/></root>"#
        ));
        assert!(equivalent(
            r#"<root a="1" b="2"/>"#,
            "<root  a=\"1\"\tb=\"2\" />"
        ));
    }

    #[test]
    fn test_attribute_quote_style_is_not_a_difference() {
        assert!(equivalent(r#"<root><a x="1"/></root>"#, "<root><a x='1'/></root>"));
    }

    #[test]
    fn test_attribute_entity_spellings_converge() {
        assert!(equivalent(r#"<a x="&amp;"/>"#, r#"<a x="&#38;"/>"#));
    }

    #[test]
    fn test_attribute_value_changes_are_a_difference() {
        assert!(!equivalent(r#"<a x="1"/>"#, r#"<a x="2"/>"#));
        assert!(!equivalent(r#"<a x="1"/>"#, r#"<a y="1"/>"#));
    }

    #[test]
    fn test_sibling_reorder_is_a_difference() {
        let a = "<root><first/><second/></root>";
        let b = "<root><second/><first/></root>";
        assert!(equivalent(a, a));
        assert!(!equivalent(a, b));
    }

    #[test]
    fn test_character_data_changes_are_a_difference() {
        let a = "<root><item>one</item></root>";
        let b = "<root><item>two</item></root>";
        assert!(!equivalent(a, b));
    }

    #[test]
    fn test_significant_whitespace_inside_text_survives() {
        let a = "<root><item>one two</item></root>";
        let b = "<root><item>one  two</item></root>";
        assert!(!equivalent(a, b));
    }

    #[test]
    fn test_empty_element_forms_are_equivalent() {
        assert!(equivalent("<root><a/></root>", "<root><a></a></root>"));
    }

    #[test]
    fn test_cdata_matches_plain_character_data() {
        assert!(equivalent(
            "<root><![CDATA[value]]></root>",
            "<root>value</root>"
        ));
    }

    #[test]
    fn test_malformed_input_fails_closed() {
        assert!(!equivalent("<a>", "<a></a>"));
        assert!(!equivalent("<a>", "<a>"));
        assert!(!equivalent("<a><b></a></b>", "<a><b></b></a>"));
    }

    #[test]
    fn test_canonicalize_rejects_unclosed_document() {
        assert!(canonicalize("<a><b></b>").is_err());
    }

    #[test]
    fn test_gate_accepts_declared_version_1_0() {
        assert!(validate_policy_document("policy", POLICY).is_ok());
    }

    #[test]
    fn test_gate_accepts_document_without_declaration() {
        assert!(validate_policy_document("policy", "<root/>").is_ok());
    }

    #[test]
    fn test_gate_rejects_other_versions() {
        let doc = r#"<?xml version="1.1"?><root/>"#;
        let errors = validate_policy_document("policy", doc).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "policy");
        assert!(errors[0].message.contains("version=1.1"));
    }

    #[test]
    fn test_gate_rejects_foreign_processing_instructions() {
        let doc = r#"<?xml version="1.0"?><root><?php echo; ?></root>"#;
        let errors = validate_policy_document("policy", doc).unwrap_err();
        assert!(errors[0].message.contains("php"));
    }

    #[test]
    fn test_gate_rejects_malformed_documents() {
        assert!(validate_policy_document("policy", "<a><b></a>").is_err());
        assert!(validate_policy_document("policy", "<a>").is_err());
    }
}
