//! Fixed-layout PDF composition.
//!
//! One A4 sheet: header, access key band, recipient, items table, totals,
//! additional data, footer. Item rows beyond the first page's table region
//! spill onto continuation pages that repeat the table header. Layout
//! coordinates are absolute; nothing reflows.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use crate::render::model::{ItemRow, RenderModel};
use crate::render::RenderError;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 36.0;
const RIGHT_EDGE: f32 = PAGE_WIDTH - MARGIN;
const ROW_LEADING: f32 = 12.0;

const COL_CODE: f32 = MARGIN;
const COL_DESCRIPTION: f32 = 110.0;
const COL_QUANTITY: f32 = 336.0;
const COL_UNIT: f32 = 392.0;
const COL_UNIT_VALUE: f32 = 430.0;
const COL_TOTAL: f32 = 500.0;

/// Rows that fit between the recipient block and the totals block.
pub(crate) const FIRST_PAGE_ROWS: usize = 30;
/// Rows per continuation page, which carries only the table.
pub(crate) const CONTINUATION_ROWS: usize = 58;

/// Composes the sheet for an already-projected model.
pub fn compose(model: &RenderModel) -> Result<Vec<u8>, RenderError> {
    let chunks = paginate(&model.items);
    let total_pages = chunks.len();

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    });
    let mono = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => regular, "F2" => bold, "F3" => mono },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(total_pages);
    for (index, rows) in chunks.iter().enumerate() {
        let operations = if index == 0 {
            first_page(model, rows, total_pages)
        } else {
            continuation_page(model, rows, index + 1, total_pages)
        };
        let encoded = Content { operations }.encode().map_err(backend)?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => total_pages as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).map_err(backend)?;
    Ok(buffer)
}

fn backend(error: impl std::fmt::Display) -> RenderError {
    RenderError::BackendFailure {
        reason: error.to_string(),
    }
}

fn paginate(items: &[ItemRow]) -> Vec<&[ItemRow]> {
    if items.len() <= FIRST_PAGE_ROWS {
        return vec![items];
    }
    let mut chunks: Vec<&[ItemRow]> = vec![&items[..FIRST_PAGE_ROWS]];
    chunks.extend(items[FIRST_PAGE_ROWS..].chunks(CONTINUATION_ROWS));
    chunks
}

fn first_page(model: &RenderModel, rows: &[ItemRow], total_pages: usize) -> Vec<Operation> {
    let mut sheet = Sheet::new();
    if let Some(message) = model.watermark() {
        sheet.watermark(message);
    }

    sheet.text("F2", 10, MARGIN, 806.0, "DOCUMENTO AUXILIAR DE DOCUMENTO FISCAL ELETRONICO");
    sheet.text("F1", 8, 460.0, 806.0, &format!("Ambiente: {}", model.environment_label));
    sheet.rule(800.0);

    sheet.text("F2", 11, MARGIN, 782.0, &model.issuer.name);
    sheet.text("F1", 8, MARGIN, 770.0, &format!("CNPJ/CPF: {}", model.issuer.tax_id));
    sheet.text("F1", 8, MARGIN, 760.0, &model.issuer.address);
    sheet.text(
        "F1",
        9,
        420.0,
        782.0,
        &format!("Serie {}  Numero {}", model.series, model.number),
    );
    sheet.text("F1", 8, 420.0, 770.0, &format!("Emissao: {}", model.issued_at));
    sheet.rule(750.0);

    sheet.text("F2", 7, MARGIN, 740.0, "CHAVE DE ACESSO");
    sheet.text("F3", 10, MARGIN, 727.0, &model.access_key_formatted);
    if let Some(protocol) = &model.protocol {
        sheet.text(
            "F1",
            8,
            MARGIN,
            713.0,
            &format!(
                "Protocolo de autorizacao: {} em {} ({} - {})",
                protocol.number, protocol.received_at, protocol.status_code, protocol.message
            ),
        );
    }
    sheet.rule(706.0);

    sheet.text("F2", 7, MARGIN, 696.0, "DESTINATARIO");
    sheet.text("F1", 9, MARGIN, 684.0, &model.recipient.name);
    sheet.text("F1", 8, MARGIN, 673.0, &format!("CNPJ/CPF: {}", model.recipient.tax_id));
    sheet.text("F1", 8, MARGIN, 663.0, &model.recipient.address);
    sheet.rule(656.0);

    item_table(&mut sheet, rows, 646.0);

    sheet.rule(252.0);
    sheet.text("F2", 7, MARGIN, 242.0, "TOTAIS");
    let pairs = [
        ("Base de calculo", &model.totals.tax_base),
        ("Imposto", &model.totals.tax),
        ("Frete", &model.totals.freight),
        ("Desconto", &model.totals.discount),
        ("Outras despesas", &model.totals.other),
    ];
    let mut y = 230.0;
    for (label, value) in pairs {
        sheet.text("F1", 8, MARGIN, y, label);
        sheet.text("F1", 8, 160.0, y, value);
        y -= 11.0;
    }
    sheet.text("F2", 9, 400.0, 224.0, "VALOR TOTAL");
    sheet.text("F2", 12, 400.0, 208.0, &model.totals.total);

    sheet.rule(168.0);
    sheet.text("F2", 7, MARGIN, 158.0, "DADOS ADICIONAIS");
    let mut y = 147.0;
    for line in wrap(&model.additional_info, 100).into_iter().take(4) {
        sheet.text("F1", 7, MARGIN, y, &line);
        y -= 9.0;
    }
    for (field, text) in model.observations.iter().take(4) {
        sheet.text("F1", 7, MARGIN, y, &format!("{field}: {text}"));
        y -= 9.0;
    }

    footer(&mut sheet, 1, total_pages);
    sheet.done()
}

fn continuation_page(
    model: &RenderModel,
    rows: &[ItemRow],
    page: usize,
    total_pages: usize,
) -> Vec<Operation> {
    let mut sheet = Sheet::new();
    if let Some(message) = model.watermark() {
        sheet.watermark(message);
    }
    sheet.text("F2", 9, MARGIN, 806.0, "CONTINUACAO DOS ITENS");
    sheet.text("F3", 8, 300.0, 806.0, &model.access_key_formatted);
    sheet.rule(800.0);
    item_table(&mut sheet, rows, 788.0);
    footer(&mut sheet, page, total_pages);
    sheet.done()
}

fn item_table(sheet: &mut Sheet, rows: &[ItemRow], header_y: f32) {
    sheet.text("F2", 7, COL_CODE, header_y, "CODIGO");
    sheet.text("F2", 7, COL_DESCRIPTION, header_y, "DESCRICAO");
    sheet.text("F2", 7, COL_QUANTITY, header_y, "QTDE");
    sheet.text("F2", 7, COL_UNIT, header_y, "UN");
    sheet.text("F2", 7, COL_UNIT_VALUE, header_y, "VLR UNIT");
    sheet.text("F2", 7, COL_TOTAL, header_y, "VLR TOTAL");
    sheet.rule(header_y - 4.0);

    let mut y = header_y - 14.0;
    for row in rows {
        sheet.text("F1", 8, COL_CODE, y, &clip(&row.code, 14));
        sheet.text("F1", 8, COL_DESCRIPTION, y, &clip(&row.description, 44));
        sheet.text("F1", 8, COL_QUANTITY, y, &row.quantity);
        sheet.text("F1", 8, COL_UNIT, y, &clip(&row.unit, 6));
        sheet.text("F1", 8, COL_UNIT_VALUE, y, &row.unit_value);
        sheet.text("F1", 8, COL_TOTAL, y, &row.total);
        y -= ROW_LEADING;
    }
}

fn footer(sheet: &mut Sheet, page: usize, total_pages: usize) {
    sheet.text("F1", 7, 500.0, 40.0, &format!("Folha {page}/{total_pages}"));
}

/// Accumulates content-stream operations for one page.
struct Sheet(Vec<Operation>);

impl Sheet {
    fn new() -> Self {
        Sheet(Vec::new())
    }

    fn text(&mut self, font: &str, size: i64, x: f32, y: f32, value: &str) {
        self.0.push(Operation::new("BT", vec![]));
        self.0.push(Operation::new("Tf", vec![font.into(), size.into()]));
        self.0.push(Operation::new("Td", vec![x.into(), y.into()]));
        self.0
            .push(Operation::new("Tj", vec![Object::string_literal(printable(value))]));
        self.0.push(Operation::new("ET", vec![]));
    }

    /// Horizontal rule across the printable width.
    fn rule(&mut self, y: f32) {
        self.0.push(Operation::new("m", vec![MARGIN.into(), y.into()]));
        self.0.push(Operation::new("l", vec![RIGHT_EDGE.into(), y.into()]));
        self.0.push(Operation::new("S", vec![]));
    }

    /// Large light-gray banner drawn before the page content so the sheet
    /// overprints it.
    fn watermark(&mut self, message: &str) {
        let (top, bottom) = match message.split_once(" - ") {
            Some((top, bottom)) => (top, bottom),
            None => (message, ""),
        };
        self.0.push(Operation::new("q", vec![]));
        self.0.push(Operation::new("g", vec![0.85_f32.into()]));
        self.text("F2", 28, 60.0, 470.0, top);
        if !bottom.is_empty() {
            self.text("F2", 28, 60.0, 430.0, bottom);
        }
        self.0.push(Operation::new("Q", vec![]));
    }

    fn done(self) -> Vec<Operation> {
        self.0
    }
}

/// Type1 base fonts here are used unencoded; anything outside printable
/// ASCII is replaced rather than emitted as garbage bytes.
fn printable(value: &str) -> String {
    value
        .chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

fn clip(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let cut: String = value.chars().take(max.saturating_sub(2)).collect();
        format!("{cut}..")
    }
}

fn wrap(value: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in value.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::AccessKey;
    use crate::render::model::{PartyBlock, ProtocolBlock, TotalsBlock};
    use crate::render::PLACEHOLDER;

    const KEY: &str = "35260812345678000195550010000000771000000016";

    fn sample_model(item_count: usize) -> RenderModel {
        let items = (0..item_count)
            .map(|i| ItemRow {
                code: format!("ITEM-{i:03}"),
                description: format!("Produto numero {i}"),
                quantity: "1.000".to_string(),
                unit: "UN".to_string(),
                unit_value: "10.00".to_string(),
                total: "10.00".to_string(),
            })
            .collect();
        RenderModel {
            access_key: KEY.to_string(),
            access_key_formatted: AccessKey::parse(KEY).unwrap().formatted(),
            environment_label: "Producao".to_string(),
            series: "1".to_string(),
            number: "77".to_string(),
            issued_at: "2026-08-01T12:00:00Z".to_string(),
            issuer: PartyBlock {
                name: "ACME Industria LTDA".to_string(),
                tax_id: "12345678000195".to_string(),
                address: "Rua das Flores 100, Sao Paulo, SP".to_string(),
            },
            recipient: PartyBlock {
                name: "Cliente SA".to_string(),
                tax_id: "98765432000109".to_string(),
                address: PLACEHOLDER.to_string(),
            },
            items,
            totals: TotalsBlock {
                tax_base: "10.00".to_string(),
                tax: "1.80".to_string(),
                freight: "0.00".to_string(),
                discount: "0.00".to_string(),
                other: "0.00".to_string(),
                total: "10.00".to_string(),
            },
            additional_info: "Entrega agendada para o periodo da manha".to_string(),
            observations: vec![("pedido".to_string(), "PO-991".to_string())],
            protocol: Some(ProtocolBlock {
                number: "135202600000777".to_string(),
                received_at: "2026-08-01T12:00:05Z".to_string(),
                status_code: "100".to_string(),
                message: "Autorizado o uso".to_string(),
            }),
            homologation: false,
        }
    }

    fn page_content(bytes: &[u8], page_number: u32) -> Vec<u8> {
        let doc = Document::load_mem(bytes).unwrap();
        let pages = doc.get_pages();
        let page_id = pages[&page_number];
        doc.get_page_content(page_id).unwrap()
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
    }

    #[test]
    fn few_items_fit_one_page() {
        let bytes = compose(&sample_model(5)).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn zero_items_still_produce_a_sheet() {
        let bytes = compose(&sample_model(0)).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn overflow_items_spill_onto_continuation_pages() {
        // 30 on the first page, then 58 per continuation page.
        let bytes = compose(&sample_model(100)).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn boundary_count_does_not_open_an_extra_page() {
        let bytes = compose(&sample_model(FIRST_PAGE_ROWS)).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn first_page_carries_header_and_totals() {
        let bytes = compose(&sample_model(3)).unwrap();
        let content = page_content(&bytes, 1);
        assert!(contains(&content, "ACME Industria LTDA"));
        assert!(contains(&content, "CHAVE DE ACESSO"));
        assert!(contains(&content, "3526 0812"));
        assert!(contains(&content, "135202600000777"));
        assert!(contains(&content, "VALOR TOTAL"));
        assert!(contains(&content, "pedido: PO-991"));
        assert!(contains(&content, "Folha 1/1"));
    }

    #[test]
    fn continuation_page_repeats_the_table_header() {
        let bytes = compose(&sample_model(40)).unwrap();
        let content = page_content(&bytes, 2);
        assert!(contains(&content, "CONTINUACAO DOS ITENS"));
        assert!(contains(&content, "DESCRICAO"));
        assert!(contains(&content, "ITEM-039"));
        assert!(contains(&content, "Folha 2/2"));
        assert!(!contains(&content, "VALOR TOTAL"));
    }

    #[test]
    fn last_item_lands_on_the_last_page() {
        let bytes = compose(&sample_model(100)).unwrap();
        let content = page_content(&bytes, 3);
        assert!(contains(&content, "ITEM-099"));
        assert!(!contains(&page_content(&bytes, 1), "ITEM-099"));
    }

    #[test]
    fn homologation_watermark_appears_on_every_page() {
        let mut model = sample_model(40);
        model.homologation = true;
        let bytes = compose(&model).unwrap();
        assert!(contains(&page_content(&bytes, 1), "SEM VALOR FISCAL"));
        assert!(contains(&page_content(&bytes, 2), "SEM VALOR FISCAL"));
    }

    #[test]
    fn unauthorized_preview_is_watermarked() {
        let mut model = sample_model(2);
        model.protocol = None;
        let bytes = compose(&model).unwrap();
        assert!(contains(&page_content(&bytes, 1), "NAO AUTORIZADO"));
    }

    #[test]
    fn authorized_production_sheet_is_clean() {
        let bytes = compose(&sample_model(2)).unwrap();
        assert!(!contains(&page_content(&bytes, 1), "SEM VALOR FISCAL"));
    }

    #[test]
    fn non_ascii_text_is_replaced_not_dropped() {
        let mut model = sample_model(1);
        model.issuer.name = "Açougue São João".to_string();
        let bytes = compose(&model).unwrap();
        assert!(contains(&page_content(&bytes, 1), "A?ougue S?o Jo?o"));
    }

    #[test]
    fn long_descriptions_are_clipped() {
        assert_eq!(clip("curto", 10), "curto");
        let clipped = clip("uma descricao extremamente longa para a coluna", 10);
        assert_eq!(clipped.chars().count(), 10);
        assert!(clipped.ends_with(".."));
    }

    #[test]
    fn wrap_breaks_on_word_boundaries() {
        let lines = wrap("um dois tres quatro cinco", 9);
        assert_eq!(lines, vec!["um dois", "tres", "quatro", "cinco"]);
        assert!(wrap("", 10).is_empty());
    }
}
