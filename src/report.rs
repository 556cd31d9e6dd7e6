// src/report.rs

use crate::config::ReportSection;
use crate::dv::DvFigures;
use crate::heuristics::ClaimFields;
use crate::session::UsState;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, StringFormat, dictionary};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("PDF assembly failed: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("PDF write failed: {0}")]
    Io(#[from] std::io::Error),
}

// US Letter, in points.
const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;

const TITLE_SIZE: f32 = 18.0;
const BODY_SIZE: f32 = 10.0;
const HEADER_ROW_HEIGHT: f32 = 26.0;
const ROW_HEIGHT: f32 = 18.0;
const CELL_PADDING: f32 = 6.0;

type Rgb = (f32, f32, f32);
const GREY: Rgb = (0.5, 0.5, 0.5);
const WHITESMOKE: Rgb = (0.96, 0.96, 0.96);
const BEIGE: Rgb = (0.96, 0.96, 0.86);
const BLACK: Rgb = (0.0, 0.0, 0.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// Format as dollars with thousands separators and cents, e.g. `$16,000.00`.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// The eight label/value rows of the summary table, in print order.
pub fn table_rows(
    figures: &DvFigures,
    pre_loss_acv: f64,
    repair_cost: f64,
    fields: &ClaimFields,
    state: UsState,
) -> Vec<(&'static str, String)> {
    vec![
        ("Pre-Loss ACV", format_currency(pre_loss_acv)),
        ("Repair Cost", format_currency(repair_cost)),
        ("Total Hours", format!("{:?}", fields.total_hours)),
        ("Structural Hours", fields.structural_hours.to_string()),
        ("Damage Severity", fields.damage_severity.to_string()),
        ("DV", format_currency(figures.dv)),
        ("Post-Repair Value", format_currency(figures.post_repair)),
        ("State", state.to_string()),
    ]
}

/// Render the single-page DV report and return the finished PDF bytes.
pub fn generate(
    section: &ReportSection,
    figures: &DvFigures,
    pre_loss_acv: f64,
    repair_cost: f64,
    fields: &ClaimFields,
    state: UsState,
) -> Result<Vec<u8>, ReportError> {
    let rows = table_rows(figures, pre_loss_acv, repair_cost, fields, state);
    let mut ops = Vec::new();

    // Title
    let title_y = PAGE_HEIGHT - MARGIN - TITLE_SIZE;
    let title_w = text_width(&section.title, Font::Bold, TITLE_SIZE);
    push_text(&mut ops, &section.title, Font::Bold, TITLE_SIZE, (PAGE_WIDTH - title_w) / 2.0, title_y, BLACK);

    // Table, centred, columns sized to their widest cell
    let col_widths = [0, 1].map(|col| {
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let text = if col == 0 { row.0 } else { row.1.as_str() };
                text_width(text, row_font(i), BODY_SIZE)
            })
            .fold(0.0_f32, f32::max)
            + 2.0 * CELL_PADDING
    });
    let table_w = col_widths[0] + col_widths[1];
    let table_x = (PAGE_WIDTH - table_w) / 2.0;
    let mut top = title_y - 24.0;

    for (i, (label, value)) in rows.iter().enumerate() {
        let (height, fill, ink) = if i == 0 {
            (HEADER_ROW_HEIGHT, GREY, WHITESMOKE)
        } else {
            (ROW_HEIGHT, BEIGE, BLACK)
        };
        let bottom = top - height;

        ops.push(Operation::new("rg", rgb(fill)));
        ops.push(Operation::new("re", rect(table_x, bottom, table_w, height)));
        ops.push(Operation::new("f", vec![]));

        ops.push(Operation::new("RG", rgb(BLACK)));
        ops.push(Operation::new("w", vec![Object::from(1.0_f32)]));
        ops.push(Operation::new("re", rect(table_x, bottom, col_widths[0], height)));
        ops.push(Operation::new("re", rect(table_x + col_widths[0], bottom, col_widths[1], height)));
        ops.push(Operation::new("S", vec![]));

        // header row keeps its extra space below the text
        let baseline = if i == 0 { bottom + 12.0 + 2.0 } else { bottom + 5.0 };
        let mut cell_x = table_x;
        for (text, width) in [(*label, col_widths[0]), (value.as_str(), col_widths[1])] {
            let w = text_width(text, row_font(i), BODY_SIZE);
            push_text(&mut ops, text, row_font(i), BODY_SIZE, cell_x + (width - w) / 2.0, baseline, ink);
            cell_x += width;
        }
        top = bottom;
    }

    // Disclaimer
    let mut line_y = top - 24.0;
    for line in wrap(&section.disclaimer, PAGE_WIDTH - 2.0 * MARGIN) {
        push_text(&mut ops, &line, Font::Regular, BODY_SIZE, MARGIN, line_y, BLACK);
        line_y -= BODY_SIZE * 1.2;
    }

    let pdf = assemble(&section.title, ops)?;
    info!(bytes = pdf.len(), rows = rows.len(), state = %state, "Report rendered");
    Ok(pdf)
}

fn assemble(title: &str, ops: Vec<Operation>) -> Result<Vec<u8>, ReportError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            Font::Regular.resource() => regular_id,
            Font::Bold.resource() => bold_id,
        },
    });

    let content = Content { operations: ops };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), Object::from(PAGE_WIDTH), Object::from(PAGE_HEIGHT)],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::String(win_ansi(title), StringFormat::Literal),
        "Producer" => Object::string_literal("dv_report"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}

fn row_font(row: usize) -> Font {
    if row == 0 { Font::Bold } else { Font::Regular }
}

fn rgb((r, g, b): Rgb) -> Vec<Object> {
    vec![r.into(), g.into(), b.into()]
}

fn rect(x: f32, y: f32, w: f32, h: f32) -> Vec<Object> {
    vec![x.into(), y.into(), w.into(), h.into()]
}

fn push_text(ops: &mut Vec<Operation>, text: &str, font: Font, size: f32, x: f32, y: f32, ink: Rgb) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.resource().into(), size.into()]));
    ops.push(Operation::new("rg", rgb(ink)));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(win_ansi(text), StringFormat::Literal)],
    ));
    ops.push(Operation::new("ET", vec![]));
}

/// Latin-1 subset of WinAnsi; anything else becomes `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u8,
            _ => b'?',
        })
        .collect()
}

fn wrap(text: &str, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if !current.is_empty() && text_width(&candidate, Font::Regular, BODY_SIZE) > max_width {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

// Glyph advances for 0x20..=0x7E, in 1/1000 em (standard AFM metrics).
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let table = match font {
        Font::Regular => &HELVETICA_WIDTHS,
        Font::Bold => &HELVETICA_BOLD_WIDTHS,
    };
    let units: u32 = text
        .chars()
        .map(|c| match c as u32 {
            code @ 0x20..=0x7E => u32::from(table[(code - 0x20) as usize]),
            _ => 556,
        })
        .sum();
    units as f32 * size / 1000.0
}
