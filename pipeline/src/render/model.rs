//! Projection of document XML into the flat model the PDF layout consumes.
//!
//! The projection is deliberately lossy and never inventive: every field
//! the sheet needs is looked up in the tree, and whatever is absent
//! becomes [`PLACEHOLDER`]. Unknown elements are ignored. The input may
//! be a bare draft, a signed document, or a final `nfeProc` bundle; the
//! same projection serves all three.

use crate::document::AccessKey;
use crate::render::{RenderError, PLACEHOLDER};
use crate::xml::XmlNode;

/// Everything the sheet prints, already stringified and placeholder-filled.
#[derive(Debug, Clone)]
pub struct RenderModel {
    pub access_key: String,
    pub access_key_formatted: String,
    pub environment_label: String,
    pub series: String,
    pub number: String,
    pub issued_at: String,
    pub issuer: PartyBlock,
    pub recipient: PartyBlock,
    pub items: Vec<ItemRow>,
    pub totals: TotalsBlock,
    pub additional_info: String,
    pub observations: Vec<(String, String)>,
    pub protocol: Option<ProtocolBlock>,
    pub homologation: bool,
}

#[derive(Debug, Clone)]
pub struct PartyBlock {
    pub name: String,
    pub tax_id: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct ItemRow {
    pub code: String,
    pub description: String,
    pub quantity: String,
    pub unit: String,
    pub unit_value: String,
    pub total: String,
}

#[derive(Debug, Clone)]
pub struct TotalsBlock {
    pub tax_base: String,
    pub tax: String,
    pub freight: String,
    pub discount: String,
    pub other: String,
    pub total: String,
}

/// Authority protocol footer, present only on reconciled documents.
#[derive(Debug, Clone)]
pub struct ProtocolBlock {
    pub number: String,
    pub received_at: String,
    pub status_code: String,
    pub message: String,
}

impl RenderModel {
    /// Projects document XML into a render model.
    ///
    /// Fails only when the input is not parseable XML; a parseable tree
    /// with none of the expected structure projects to a sheet full of
    /// placeholders.
    pub fn project(xml: &str) -> Result<RenderModel, RenderError> {
        let root = XmlNode::parse(xml).map_err(|e| RenderError::MalformedInput {
            reason: e.to_string(),
        })?;

        let inf = root.find("infNFe").or_else(|| root.find("infNFSe"));
        let ide = inf.and_then(|n| n.child("ide"));
        let protocol_inf = root.find("infProt").or_else(|| root.find("infProtNFSe"));

        let access_key = extract_access_key(inf, protocol_inf);
        let access_key_formatted = AccessKey::parse(&access_key)
            .map(|key| key.formatted())
            .unwrap_or_else(|_| access_key.clone());

        let environment = ide.and_then(|n| n.child_text("tpAmb"));
        let homologation = environment == Some("2");
        let environment_label = match environment {
            Some("1") => "Producao".to_string(),
            Some("2") => "Homologacao".to_string(),
            _ => PLACEHOLDER.to_string(),
        };

        let additional = inf.and_then(|n| n.child("infAdic"));
        let observations = additional
            .map(|node| {
                node.children_named("obsCont")
                    .map(|obs| {
                        (
                            obs.attr("xCampo").unwrap_or(PLACEHOLDER).to_string(),
                            text_or_placeholder(Some(obs), "xTexto"),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let items = inf
            .map(|node| {
                node.children_named("det")
                    .map(|det| project_item(det.child("prod")))
                    .collect()
            })
            .unwrap_or_default();

        Ok(RenderModel {
            access_key,
            access_key_formatted,
            environment_label,
            series: text_or_placeholder(ide, "serie"),
            number: text_or_placeholder(ide, "nNF"),
            issued_at: text_or_placeholder(ide, "dhEmi"),
            issuer: project_party(inf.and_then(|n| n.child("emit")), "enderEmit"),
            recipient: project_party(inf.and_then(|n| n.child("dest")), "enderDest"),
            items,
            totals: project_totals(inf.and_then(|n| n.descendant(&["total", "ICMSTot"]))),
            additional_info: additional
                .and_then(|n| n.child_text("infCpl"))
                .unwrap_or_default()
                .to_string(),
            observations,
            protocol: project_protocol(protocol_inf),
            homologation,
        })
    }

    /// The watermark the sheet carries, when it carries one.
    ///
    /// Homologation documents are never fiscally valid; production
    /// documents without an authority protocol are previews.
    pub fn watermark(&self) -> Option<&'static str> {
        if self.homologation {
            Some("EMITIDA EM HOMOLOGACAO - SEM VALOR FISCAL")
        } else if self.protocol.is_none() {
            Some("DOCUMENTO NAO AUTORIZADO - SEM VALOR FISCAL")
        } else {
            None
        }
    }
}

/// The key comes from the `Id` attribute when the document has one, and
/// falls back to the protocol's `chNFe` echo for bundles whose document
/// half is damaged.
fn extract_access_key(inf: Option<&XmlNode>, protocol_inf: Option<&XmlNode>) -> String {
    let from_id = inf
        .and_then(|n| n.attr("Id"))
        .map(|id| id.trim_start_matches(|c: char| !c.is_ascii_digit()).to_string())
        .filter(|digits| !digits.is_empty());
    if let Some(digits) = from_id {
        return digits;
    }
    protocol_inf
        .and_then(|n| n.child_text("chNFe").or_else(|| n.child_text("chNFSe")))
        .map(str::to_string)
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

fn project_party(node: Option<&XmlNode>, address_tag: &str) -> PartyBlock {
    let tax_id = node
        .and_then(|n| n.child_text("CNPJ").or_else(|| n.child_text("CPF")))
        .unwrap_or(PLACEHOLDER)
        .to_string();
    let address = node
        .and_then(|n| n.child(address_tag))
        .map(|addr| {
            ["xLgr", "xMun", "UF", "CEP"]
                .iter()
                .filter_map(|tag| addr.child_text(tag))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|joined| !joined.is_empty())
        .unwrap_or_else(|| PLACEHOLDER.to_string());
    PartyBlock {
        name: text_or_placeholder(node, "xNome"),
        tax_id,
        address,
    }
}

fn project_item(prod: Option<&XmlNode>) -> ItemRow {
    ItemRow {
        code: text_or_placeholder(prod, "cProd"),
        description: text_or_placeholder(prod, "xProd"),
        quantity: text_or_placeholder(prod, "qCom"),
        unit: text_or_placeholder(prod, "uCom"),
        unit_value: text_or_placeholder(prod, "vUnCom"),
        total: text_or_placeholder(prod, "vProd"),
    }
}

fn project_totals(node: Option<&XmlNode>) -> TotalsBlock {
    TotalsBlock {
        tax_base: text_or_placeholder(node, "vBC"),
        tax: text_or_placeholder(node, "vICMS"),
        freight: text_or_placeholder(node, "vFrete"),
        discount: text_or_placeholder(node, "vDesc"),
        other: text_or_placeholder(node, "vOutro"),
        total: text_or_placeholder(node, "vNF"),
    }
}

fn project_protocol(node: Option<&XmlNode>) -> Option<ProtocolBlock> {
    let node = node?;
    Some(ProtocolBlock {
        number: text_or_placeholder(Some(node), "nProt"),
        received_at: text_or_placeholder(Some(node), "dhRecbto"),
        status_code: text_or_placeholder(Some(node), "cStat"),
        message: text_or_placeholder(Some(node), "xMotivo"),
    })
}

fn text_or_placeholder(node: Option<&XmlNode>, tag: &str) -> String {
    node.and_then(|n| n.child_text(tag))
        .unwrap_or(PLACEHOLDER)
        .to_string()
}
