//! PDF composition with lopdf.
//!
//! Text is set in the standard Helvetica faces with WinAnsi encoding, so no font program is
//! embedded. Characters outside Latin-1 are transliterated or replaced with `?`.

use super::raster::EmbeddedImage;
use super::template::{Block, ContractDocument, SignatureArea, SignatureEvidence};
use crate::error::RenderError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 56;
const CONTENT_WIDTH: i64 = PAGE_WIDTH - 2 * MARGIN;
const FOOTER_Y: i64 = 28;
const BODY_BOTTOM: i64 = 60;
const FIELD_LABEL_WIDTH: i64 = 150;
const SIGNATURE_BOX_WIDTH: i64 = 200;
const SIGNATURE_BOX_HEIGHT: i64 = 70;

const REGULAR: &str = "F1";
const BOLD: &str = "F2";
const SIGNATURE_XOBJECT: &str = "Sig";

struct Layout {
    pages: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: i64,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn ensure_room(&mut self, height: i64) {
        if self.y - height < BODY_BOTTOM && !self.current.is_empty() {
            self.break_page();
        }
    }

    fn break_page(&mut self) {
        let finished = std::mem::take(&mut self.current);
        self.pages.push(finished);
        self.y = PAGE_HEIGHT - MARGIN;
    }

    fn text(&mut self, font: &str, size: i64, x: i64, y: i64, text: &str) {
        self.current.extend(text_ops(font, size, x, y, text));
    }

    /// Writes wrapped lines starting at the cursor and advances it.
    fn paragraph(&mut self, font: &str, size: i64, x: i64, width: i64, text: &str) {
        let leading = size + size / 3 + 1;
        for line in wrap(text, size, width) {
            self.ensure_room(leading);
            self.y -= leading;
            let y = self.y;
            self.text(font, size, x, y, &line);
        }
    }

    fn rule(&mut self, x1: i64, x2: i64, y: i64) {
        self.current.extend([
            Operation::new("w", vec![1.into()]),
            Operation::new("m", vec![x1.into(), y.into()]),
            Operation::new("l", vec![x2.into(), y.into()]),
            Operation::new("S", vec![]),
        ]);
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.break_page();
        }
        self.pages
    }
}

fn text_ops(font: &str, size: i64, x: i64, y: i64, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![font.into(), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![Object::string_literal(to_win_ansi(text))]),
        Operation::new("ET", vec![]),
    ]
}

/// Lays out the document and encodes it. `signature` is drawn into the signed area.
pub(crate) fn compose(
    document: &ContractDocument,
    signature: Option<&EmbeddedImage>,
) -> Result<Vec<u8>, RenderError> {
    let mut layout = Layout::new();
    for block in &document.blocks {
        match block {
            Block::Title(text) => layout.paragraph(BOLD, 16, MARGIN, CONTENT_WIDTH, text),
            Block::Subtitle(text) => layout.paragraph(REGULAR, 12, MARGIN, CONTENT_WIDTH, text),
            Block::Heading(text) => {
                layout.ensure_room(40);
                layout.y -= 4;
                layout.paragraph(BOLD, 11, MARGIN, CONTENT_WIDTH, text);
            }
            Block::Paragraph(text) => layout.paragraph(REGULAR, 10, MARGIN, CONTENT_WIDTH, text),
            Block::Field { label, value } => field(&mut layout, label, value),
            Block::Spacer(height) => layout.y -= height,
            Block::Signature(area) => signature_area(&mut layout, area, signature.is_some()),
        }
    }

    let pages = layout.finish();
    encode(document, pages, signature)
}

fn field(layout: &mut Layout, label: &str, value: &str) {
    let size = 10;
    let leading = size + size / 3 + 1;
    let value_x = MARGIN + FIELD_LABEL_WIDTH;
    let lines = wrap(value, size, CONTENT_WIDTH - FIELD_LABEL_WIDTH);
    for (index, line) in lines.iter().enumerate() {
        layout.ensure_room(leading);
        layout.y -= leading;
        let y = layout.y;
        if index == 0 {
            layout.text(BOLD, size, MARGIN, y, &format!("{label}:"));
        }
        layout.text(REGULAR, size, value_x, y, line);
    }
}

fn signature_area(layout: &mut Layout, area: &SignatureArea, has_image: bool) {
    match area {
        SignatureArea::Pending { signer_name } => {
            layout.ensure_room(SIGNATURE_BOX_HEIGHT + 40);
            layout.y -= SIGNATURE_BOX_HEIGHT;
            let y = layout.y;
            layout.rule(MARGIN, MARGIN + SIGNATURE_BOX_WIDTH, y);
            layout.text(REGULAR, 9, MARGIN, y - 12, signer_name);
            layout.text(REGULAR, 9, MARGIN, y - 24, "Subscriber signature");
            layout.y -= 30;
        }
        SignatureArea::Signed(evidence) => {
            let evidence_lines = evidence_lines(evidence);
            let needed = SIGNATURE_BOX_HEIGHT + 30 + 12 * evidence_lines.len() as i64;
            layout.ensure_room(needed);
            layout.y -= SIGNATURE_BOX_HEIGHT;
            let y = layout.y;
            if has_image {
                layout.current.extend([
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            SIGNATURE_BOX_WIDTH.into(),
                            0.into(),
                            0.into(),
                            SIGNATURE_BOX_HEIGHT.into(),
                            MARGIN.into(),
                            y.into(),
                        ],
                    ),
                    Operation::new("Do", vec![Object::Name(SIGNATURE_XOBJECT.as_bytes().to_vec())]),
                    Operation::new("Q", vec![]),
                ]);
            }
            layout.rule(MARGIN, MARGIN + SIGNATURE_BOX_WIDTH, y - 2);
            layout.y -= 6;
            layout.paragraph(BOLD, 9, MARGIN, CONTENT_WIDTH, "Electronically signed");
            for line in evidence_lines {
                layout.paragraph(REGULAR, 8, MARGIN, CONTENT_WIDTH, &line);
            }
        }
    }
}

fn evidence_lines(evidence: &SignatureEvidence) -> Vec<String> {
    let mut lines = vec![
        format!("Signer: {} ({})", evidence.signer_name, evidence.signer_document),
        format!(
            "Signed at: {}",
            evidence.signed_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!("Method: {}", evidence.method),
        format!("Signing session: {}", evidence.session_id),
        format!("Original document digest (BLAKE3): {}", evidence.original_hash),
    ];
    if let Some(ip) = &evidence.signer_ip {
        lines.push(format!("Origin address: {ip}"));
    }
    if let Some(agent) = &evidence.signer_user_agent {
        lines.push(format!("User agent: {agent}"));
    }
    lines
}

fn encode(
    document: &ContractDocument,
    pages: Vec<Vec<Operation>>,
    signature: Option<&EmbeddedImage>,
) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(standard_font("Helvetica"));
    let bold_id = doc.add_object(standard_font("Helvetica-Bold"));
    let mut resources = dictionary! {
        "Font" => dictionary! {
            REGULAR => regular_id,
            BOLD => bold_id,
        },
    };
    if let Some(image) = signature {
        let image_id = add_image(&mut doc, image);
        resources.set(
            "XObject",
            dictionary! { SIGNATURE_XOBJECT => image_id },
        );
    }
    let resources_id = doc.add_object(resources);

    let total = pages.len();
    let mut kids: Vec<Object> = Vec::with_capacity(total);
    for (index, mut operations) in pages.into_iter().enumerate() {
        let footer = format!("{}  |  Page {} of {}", document.footer, index + 1, total);
        operations.extend(text_ops(REGULAR, 8, MARGIN, FOOTER_Y, &footer));
        let content = Content { operations }
            .encode()
            .map_err(|e| RenderError::Encode(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
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
            "Count" => total as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(to_win_ansi(&document.title)),
        "Producer" => Object::string_literal("esign"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(out)
}

fn standard_font(base: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    }
}

fn add_image(doc: &mut Document, image: &EmbeddedImage) -> ObjectId {
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width as i64,
        "Height" => image.height as i64,
        "ColorSpace" => image.color_space,
        "BitsPerComponent" => 8,
        "Filter" => image.filter,
    };
    if let Some(mask) = &image.soft_mask {
        let mask_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width as i64,
            "Height" => image.height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        };
        let mask_id = doc.add_object(Stream::new(mask_dict, mask.clone()).with_compression(false));
        dict.set("SMask", mask_id);
    }
    doc.add_object(Stream::new(dict, image.data.clone()).with_compression(false))
}

/// Helvetica advance widths in thousandths of an em, coarse classes.
fn char_width(c: char) -> i64 {
    match c {
        ' ' | '.' | ',' | ':' | ';' | '!' | '\'' | '|' | 'i' | 'j' | 'l' => 278,
        'f' | 't' | 'r' | '(' | ')' | '[' | ']' | '/' | '-' | 'I' => 333,
        'm' | 'M' => 833,
        'w' | 'W' => 778,
        '@' => 1015,
        'A'..='Z' => 667,
        _ => 556,
    }
}

fn text_width(text: &str, size: i64) -> i64 {
    text.chars().map(char_width).sum::<i64>() * size / 1000
}

/// Greedy word wrap. Words longer than a line are split by character.
pub(crate) fn wrap(text: &str, size: i64, width: i64) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{line} {word}")
        };
        if text_width(&candidate, size) <= width {
            line = candidate;
            continue;
        }
        if !line.is_empty() {
            lines.push(std::mem::take(&mut line));
        }
        if text_width(word, size) <= width {
            line = word.to_string();
            continue;
        }
        for c in word.chars() {
            line.push(c);
            if text_width(&line, size) > width {
                line.pop();
                lines.push(std::mem::take(&mut line));
                line.push(c);
            }
        }
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}

/// Maps text onto single-byte WinAnsi codes.
pub(crate) fn to_win_ansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' => out.push(b'\''),
            '\u{201C}' | '\u{201D}' => out.push(b'"'),
            '\u{2013}' | '\u{2014}' => out.push(b'-'),
            '\u{2026}' => out.extend_from_slice(b"..."),
            '\u{20}'..='\u{7E}' | '\u{A0}'..='\u{FF}' => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::template::{original_document, tests::snapshot};
    use chrono::Utc;

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn win_ansi_keeps_latin1_and_replaces_the_rest() {
        assert_eq!(to_win_ansi("María"), vec![b'M', b'a', b'r', 0xED, b'a']);
        assert_eq!(to_win_ansi("a\u{2014}b"), b"a-b".to_vec());
        assert_eq!(to_win_ansi("签"), b"?".to_vec());
    }

    #[test]
    fn wrap_respects_width_and_splits_long_words() {
        let lines = wrap("alpha beta gamma delta", 10, 60);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| text_width(l, 10) <= 60));

        let long = "x".repeat(100);
        let lines = wrap(&long, 10, 100);
        assert_eq!(lines.concat(), long);
        assert_eq!(wrap("", 10, 100), vec![String::new()]);
    }

    #[test]
    fn composes_loadable_pdf_with_contract_text() {
        let doc = original_document(&snapshot("C1"), Utc::now());
        let bytes = compose(&doc, None).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        assert!(contains(&bytes, b"Fiber 200"));
        assert!(contains(&bytes, b"Generated on"));

        let loaded = Document::load_mem(&bytes).unwrap();
        assert!(!loaded.get_pages().is_empty());
    }

    #[test]
    fn long_documents_paginate() {
        let mut doc = original_document(&snapshot("C1"), Utc::now());
        for i in 0..120 {
            doc.blocks
                .insert(5, Block::Paragraph(format!("Additional clause number {i}.")));
        }
        let bytes = compose(&doc, None).unwrap();
        let loaded = Document::load_mem(&bytes).unwrap();
        let pages = loaded.get_pages().len();
        assert!(pages >= 2);
        assert!(contains(&bytes, format!("Page {pages} of {pages}").as_bytes()));
    }
}
