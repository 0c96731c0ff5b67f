//! Deterministic, schema-exact serialization of fiscal documents.
//!
//! The canonical form produced here is the signing contract: stable element
//! order, stable attribute order, no insignificant whitespace, no XML
//! declaration. Re-serializing the same draft must reproduce the same
//! bytes, or every signature this pipeline ever produced stops verifying.
//!
//! Element vocabulary follows the authority's published layout: `ide` for
//! identification, `emit`/`dest` for the parties, `det`/`prod` for line
//! items, `total`/`ICMSTot` for the money summary, `infAdic` for free text
//! and pass-through fields.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::document::types::{format_cents, format_milli, FiscalDocumentDraft, Party};
use crate::sign::signer::SignatureBlock;
use crate::xml::XmlError;

/// Canonical bytes of the identified element, exactly as digested by the
/// signer. A subtree, not a document: no declaration, no enclosing root.
pub fn canonical_inf_node(draft: &FiscalDocumentDraft) -> Result<Vec<u8>, XmlError> {
    let mut writer = Writer::new(Vec::new());
    write_inf_node(&mut writer, draft)?;
    Ok(writer.into_inner())
}

/// The complete document before signing: root element wrapping the
/// identified element.
pub fn unsigned_document(draft: &FiscalDocumentDraft) -> Result<String, XmlError> {
    let mut writer = Writer::new(Vec::new());
    write_root_start(&mut writer, draft)?;
    write_inf_node(&mut writer, draft)?;
    writer.write_event(Event::End(BytesEnd::new(draft.kind.root_tag())))?;
    into_string(writer)
}

/// The complete signed document: root element wrapping the identified
/// element plus the enveloped signature.
pub fn signed_document(
    draft: &FiscalDocumentDraft,
    signature: &SignatureBlock,
) -> Result<String, XmlError> {
    let mut writer = Writer::new(Vec::new());
    write_root_start(&mut writer, draft)?;
    write_inf_node(&mut writer, draft)?;
    write_signature(&mut writer, signature)?;
    writer.write_event(Event::End(BytesEnd::new(draft.kind.root_tag())))?;
    into_string(writer)
}

// ---------------------------------------------------------------------------
// Document body
// ---------------------------------------------------------------------------

fn write_root_start(
    writer: &mut Writer<Vec<u8>>,
    draft: &FiscalDocumentDraft,
) -> Result<(), XmlError> {
    let mut root = BytesStart::new(draft.kind.root_tag());
    root.push_attribute(("xmlns", draft.kind.namespace()));
    writer.write_event(Event::Start(root))?;
    Ok(())
}

fn write_inf_node(
    writer: &mut Writer<Vec<u8>>,
    draft: &FiscalDocumentDraft,
) -> Result<(), XmlError> {
    let id = draft.document_id();
    let mut inf = BytesStart::new(draft.kind.inf_tag());
    inf.push_attribute(("Id", id.as_str()));
    inf.push_attribute(("versao", draft.schema_version.as_str()));
    writer.write_event(Event::Start(inf))?;

    write_ide(writer, draft)?;
    write_party(writer, "emit", &draft.issuer)?;
    write_party(writer, "dest", &draft.recipient)?;
    for (index, item) in draft.items.iter().enumerate() {
        write_item(writer, index + 1, item)?;
    }
    write_totals(writer, draft)?;
    write_additional(writer, draft)?;

    writer.write_event(Event::End(BytesEnd::new(draft.kind.inf_tag())))?;
    Ok(())
}

fn write_ide(writer: &mut Writer<Vec<u8>>, draft: &FiscalDocumentDraft) -> Result<(), XmlError> {
    // The identification fields echo the access key layout; the slices
    // below read the already validated 44-digit key.
    let key = draft.access_key.as_str();
    writer.write_event(Event::Start(BytesStart::new("ide")))?;
    text_element(writer, "cUF", &key[0..2])?;
    text_element(writer, "cNF", &key[35..43])?;
    text_element(writer, "mod", draft.kind.model_code())?;
    text_element(writer, "serie", &draft.numbering.series.to_string())?;
    text_element(writer, "nNF", &draft.numbering.number.to_string())?;
    text_element(
        writer,
        "dhEmi",
        &draft
            .issued_at
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    )?;
    text_element(writer, "tpAmb", draft.environment.wire_code())?;
    text_element(writer, "tpEmis", &key[34..35])?;
    text_element(writer, "cDV", &key[43..44])?;
    writer.write_event(Event::End(BytesEnd::new("ide")))?;
    Ok(())
}

fn write_party(writer: &mut Writer<Vec<u8>>, tag: &str, party: &Party) -> Result<(), XmlError> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    let id_tag = if party.tax_id.len() == 11 { "CPF" } else { "CNPJ" };
    text_element(writer, id_tag, &party.tax_id)?;
    text_element(writer, "xNome", &party.name)?;
    optional_element(writer, "IE", party.state_registration.as_deref())?;

    let has_address = party.street.is_some()
        || party.municipality.is_some()
        || party.region.is_some()
        || party.postal_code.is_some();
    if has_address {
        let address_tag = format!("ender{}", capitalize(tag));
        writer.write_event(Event::Start(BytesStart::new(address_tag.as_str())))?;
        optional_element(writer, "xLgr", party.street.as_deref())?;
        optional_element(writer, "xMun", party.municipality.as_deref())?;
        optional_element(writer, "UF", party.region.as_deref())?;
        optional_element(writer, "CEP", party.postal_code.as_deref())?;
        writer.write_event(Event::End(BytesEnd::new(address_tag.as_str())))?;
    }

    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_item(
    writer: &mut Writer<Vec<u8>>,
    position: usize,
    item: &crate::document::types::LineItem,
) -> Result<(), XmlError> {
    let n_item = position.to_string();
    let mut det = BytesStart::new("det");
    det.push_attribute(("nItem", n_item.as_str()));
    writer.write_event(Event::Start(det))?;

    writer.write_event(Event::Start(BytesStart::new("prod")))?;
    text_element(writer, "cProd", &item.code)?;
    text_element(writer, "xProd", &item.description)?;
    text_element(writer, "uCom", &item.unit)?;
    text_element(writer, "qCom", &format_milli(item.quantity_milli))?;
    text_element(writer, "vUnCom", &format_cents(item.unit_value_cents))?;
    text_element(writer, "vProd", &format_cents(item.total_cents))?;
    writer.write_event(Event::End(BytesEnd::new("prod")))?;

    writer.write_event(Event::End(BytesEnd::new("det")))?;
    Ok(())
}

fn write_totals(writer: &mut Writer<Vec<u8>>, draft: &FiscalDocumentDraft) -> Result<(), XmlError> {
    writer.write_event(Event::Start(BytesStart::new("total")))?;
    writer.write_event(Event::Start(BytesStart::new("ICMSTot")))?;
    text_element(writer, "vBC", &format_cents(draft.totals.tax_base_cents))?;
    text_element(writer, "vICMS", &format_cents(draft.totals.tax_cents))?;
    text_element(writer, "vFrete", &format_cents(draft.totals.freight_cents))?;
    text_element(writer, "vDesc", &format_cents(draft.totals.discount_cents))?;
    text_element(writer, "vOutro", &format_cents(draft.totals.other_cents))?;
    text_element(writer, "vNF", &format_cents(draft.totals.total_cents))?;
    writer.write_event(Event::End(BytesEnd::new("ICMSTot")))?;
    writer.write_event(Event::End(BytesEnd::new("total")))?;
    Ok(())
}

fn write_additional(
    writer: &mut Writer<Vec<u8>>,
    draft: &FiscalDocumentDraft,
) -> Result<(), XmlError> {
    if draft.additional_info.is_none() && draft.extras.is_empty() {
        return Ok(());
    }
    writer.write_event(Event::Start(BytesStart::new("infAdic")))?;
    optional_element(writer, "infCpl", draft.additional_info.as_deref())?;
    // Pass-through fields ride in contributor observations, the layout's
    // designated extension point. BTreeMap iteration keeps them ordered.
    for (key, value) in &draft.extras {
        let mut obs = BytesStart::new("obsCont");
        obs.push_attribute(("xCampo", key.as_str()));
        writer.write_event(Event::Start(obs))?;
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text_element(writer, "xTexto", &rendered)?;
        writer.write_event(Event::End(BytesEnd::new("obsCont")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("infAdic")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Signature block
// ---------------------------------------------------------------------------

fn write_signature(
    writer: &mut Writer<Vec<u8>>,
    signature: &SignatureBlock,
) -> Result<(), XmlError> {
    writer.write_event(Event::Start(BytesStart::new("Signature")))?;

    writer.write_event(Event::Start(BytesStart::new("SignedInfo")))?;
    let mut reference = BytesStart::new("Reference");
    reference.push_attribute(("URI", signature.reference.as_str()));
    writer.write_event(Event::Start(reference))?;
    let mut digest_method = BytesStart::new("DigestMethod");
    digest_method.push_attribute(("Algorithm", signature.digest_algorithm.as_str()));
    writer.write_event(Event::Empty(digest_method))?;
    text_element(writer, "DigestValue", &signature.digest_hex)?;
    writer.write_event(Event::End(BytesEnd::new("Reference")))?;
    let mut signature_method = BytesStart::new("SignatureMethod");
    signature_method.push_attribute(("Algorithm", signature.signature_algorithm.as_str()));
    writer.write_event(Event::Empty(signature_method))?;
    writer.write_event(Event::End(BytesEnd::new("SignedInfo")))?;

    text_element(writer, "SignatureValue", &signature.signature_hex)?;

    writer.write_event(Event::Start(BytesStart::new("KeyInfo")))?;
    writer.write_event(Event::Start(BytesStart::new("X509Data")))?;
    text_element(writer, "X509Certificate", &signature.certificate_hex)?;
    writer.write_event(Event::End(BytesEnd::new("X509Data")))?;
    writer.write_event(Event::End(BytesEnd::new("KeyInfo")))?;

    writer.write_event(Event::End(BytesEnd::new("Signature")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn text_element(writer: &mut Writer<Vec<u8>>, tag: &str, value: &str) -> Result<(), XmlError> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn optional_element(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    value: Option<&str>,
) -> Result<(), XmlError> {
    match value {
        Some(v) if !v.is_empty() => text_element(writer, tag, v),
        _ => Ok(()),
    }
}

fn capitalize(tag: &str) -> String {
    let mut chars = tag.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn into_string(writer: Writer<Vec<u8>>) -> Result<String, XmlError> {
    String::from_utf8(writer.into_inner()).map_err(|_| XmlError::NonUtf8)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmitterConfig, Environment};
    use crate::document::builder::DraftBuilder;
    use crate::document::types::{DocumentKind, LineItemPayload};
    use crate::xml::XmlNode;
    use chrono::{TimeZone, Utc};

    fn test_config() -> EmitterConfig {
        EmitterConfig::new(
            Environment::Homologation,
            35,
            "12345678000195",
            "/tmp/key.sealed",
            "/tmp/cert.json",
            "passphrase",
        )
    }

    fn sample_draft() -> FiscalDocumentDraft {
        DraftBuilder::new(DocumentKind::Goods)
            .series(1)
            .number(101)
            .issued_at(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap())
            .issuer(Party {
                tax_id: "12345678000195".into(),
                name: "ACME LTDA".into(),
                state_registration: Some("123456789".into()),
                street: Some("Rua das Flores, 100".into()),
                municipality: Some("São Paulo".into()),
                region: Some("SP".into()),
                postal_code: Some("01310100".into()),
            })
            .recipient(Party {
                tax_id: "98765432000109".into(),
                name: "Cliente & Filhos SA".into(),
                ..Party::default()
            })
            .item(LineItemPayload {
                code: "P1".into(),
                description: "Widget <premium>".into(),
                unit: "UN".into(),
                quantity_milli: 2000,
                unit_value_cents: 1550,
            })
            .additional_info("Pedido 554")
            .extra("fleet_tag", serde_json::json!("truck-7"))
            .build(&test_config())
            .unwrap()
    }

    #[test]
    fn canonical_bytes_are_stable() {
        let draft = sample_draft();
        let a = canonical_inf_node(&draft).unwrap();
        let b = canonical_inf_node(&draft).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn canonical_node_has_no_declaration_and_no_indent() {
        let draft = sample_draft();
        let bytes = canonical_inf_node(&draft).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("<infNFe "));
        assert!(!text.contains('\n'));
        assert!(!text.contains("<?xml"));
    }

    #[test]
    fn unsigned_document_parses_back() {
        let draft = sample_draft();
        let xml = unsigned_document(&draft).unwrap();
        let root = XmlNode::parse(&xml).unwrap();
        assert_eq!(root.name, "NFe");
        let inf = root.child("infNFe").unwrap();
        assert_eq!(inf.attr("Id").unwrap(), draft.document_id());
        assert_eq!(inf.attr("versao"), Some("4.00"));
    }

    #[test]
    fn ide_echoes_access_key_fields() {
        let draft = sample_draft();
        let xml = unsigned_document(&draft).unwrap();
        let root = XmlNode::parse(&xml).unwrap();
        let ide = root.descendant(&["infNFe", "ide"]).unwrap();
        let key = draft.access_key.as_str();
        assert_eq!(ide.child_text("cUF"), Some(&key[0..2]));
        assert_eq!(ide.child_text("cNF"), Some(&key[35..43]));
        assert_eq!(ide.child_text("cDV"), Some(&key[43..44]));
        assert_eq!(ide.child_text("mod"), Some("55"));
        assert_eq!(ide.child_text("serie"), Some("1"));
        assert_eq!(ide.child_text("nNF"), Some("101"));
        assert_eq!(ide.child_text("tpAmb"), Some("2"));
        assert_eq!(ide.child_text("dhEmi"), Some("2026-08-01T12:00:00Z"));
    }

    #[test]
    fn money_fields_use_fixed_decimals() {
        let draft = sample_draft();
        let xml = unsigned_document(&draft).unwrap();
        let root = XmlNode::parse(&xml).unwrap();
        let prod = root.descendant(&["infNFe", "det", "prod"]).unwrap();
        assert_eq!(prod.child_text("qCom"), Some("2.000"));
        assert_eq!(prod.child_text("vUnCom"), Some("15.50"));
        assert_eq!(prod.child_text("vProd"), Some("31.00"));
        let totals = root.descendant(&["infNFe", "total", "ICMSTot"]).unwrap();
        assert_eq!(totals.child_text("vNF"), Some("31.00"));
    }

    #[test]
    fn special_characters_are_escaped() {
        let draft = sample_draft();
        let xml = unsigned_document(&draft).unwrap();
        assert!(xml.contains("Widget &lt;premium&gt;"));
        assert!(xml.contains("Cliente &amp; Filhos SA"));
        // And unescaped again on the way back in.
        let root = XmlNode::parse(&xml).unwrap();
        let prod = root.descendant(&["infNFe", "det", "prod"]).unwrap();
        assert_eq!(prod.child_text("xProd"), Some("Widget <premium>"));
    }

    #[test]
    fn recipient_person_uses_cpf_tag() {
        let config = test_config();
        let draft = DraftBuilder::new(DocumentKind::Goods)
            .series(1)
            .number(102)
            .issued_at(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap())
            .issuer(Party {
                tax_id: "12345678000195".into(),
                name: "ACME LTDA".into(),
                ..Party::default()
            })
            .recipient(Party {
                tax_id: "12345678901".into(),
                name: "Fulano".into(),
                ..Party::default()
            })
            .item(LineItemPayload {
                code: "P1".into(),
                description: "Widget".into(),
                unit: "UN".into(),
                quantity_milli: 1000,
                unit_value_cents: 100,
            })
            .build(&config)
            .unwrap();
        let xml = unsigned_document(&draft).unwrap();
        let root = XmlNode::parse(&xml).unwrap();
        let dest = root.descendant(&["infNFe", "dest"]).unwrap();
        assert_eq!(dest.child_text("CPF"), Some("12345678901"));
        assert!(dest.child("CNPJ").is_none());
    }

    #[test]
    fn extras_land_in_contributor_observations() {
        let draft = sample_draft();
        let xml = unsigned_document(&draft).unwrap();
        let root = XmlNode::parse(&xml).unwrap();
        let inf_adic = root.descendant(&["infNFe", "infAdic"]).unwrap();
        assert_eq!(inf_adic.child_text("infCpl"), Some("Pedido 554"));
        let obs = inf_adic.child("obsCont").unwrap();
        assert_eq!(obs.attr("xCampo"), Some("fleet_tag"));
        assert_eq!(obs.child_text("xTexto"), Some("truck-7"));
    }

    #[test]
    fn service_draft_uses_service_vocabulary() {
        let config = test_config();
        let draft = DraftBuilder::new(DocumentKind::Service)
            .series(1)
            .number(33)
            .issued_at(Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap())
            .issuer(Party {
                tax_id: "12345678000195".into(),
                name: "ACME LTDA".into(),
                ..Party::default()
            })
            .recipient(Party {
                tax_id: "98765432000109".into(),
                name: "Cliente SA".into(),
                ..Party::default()
            })
            .item(LineItemPayload {
                code: "S1".into(),
                description: "Consultoria".into(),
                unit: "HR".into(),
                quantity_milli: 4000,
                unit_value_cents: 25_000,
            })
            .build(&config)
            .unwrap();
        let xml = unsigned_document(&draft).unwrap();
        let root = XmlNode::parse(&xml).unwrap();
        assert_eq!(root.name, "NFSe");
        let inf = root.child("infNFSe").unwrap();
        assert!(inf.attr("Id").unwrap().starts_with("NFSe"));
        let ide = inf.child("ide").unwrap();
        assert_eq!(ide.child_text("mod"), Some("56"));
    }

    #[test]
    fn signed_document_embeds_signature_block() {
        let draft = sample_draft();
        let block = SignatureBlock {
            digest_algorithm: "SHA-256".into(),
            signature_algorithm: "Ed25519".into(),
            digest_hex: "ab".repeat(32),
            signature_hex: "cd".repeat(64),
            reference: format!("#{}", draft.document_id()),
            certificate_hex: "ef".repeat(40),
        };
        let xml = signed_document(&draft, &block).unwrap();
        let root = XmlNode::parse(&xml).unwrap();
        let signature = root.child("Signature").unwrap();
        let reference = signature.descendant(&["SignedInfo", "Reference"]).unwrap();
        assert_eq!(reference.attr("URI").unwrap(), block.reference);
        assert_eq!(
            reference.child_text("DigestValue"),
            Some(block.digest_hex.as_str())
        );
        assert_eq!(
            signature.child_text("SignatureValue"),
            Some(block.signature_hex.as_str())
        );
        assert_eq!(
            signature
                .descendant(&["KeyInfo", "X509Data"])
                .and_then(|n| n.child_text("X509Certificate")),
            Some(block.certificate_hex.as_str())
        );
        // The identified element is byte-identical to the unsigned form.
        let unsigned = unsigned_document(&draft).unwrap();
        let inf_in_signed = XmlNode::parse(&xml).unwrap();
        let inf_in_unsigned = XmlNode::parse(&unsigned).unwrap();
        assert_eq!(
            inf_in_signed.child("infNFe"),
            inf_in_unsigned.child("infNFe")
        );
    }
}
