//! # CSV Import / Export
//!
//! Spreadsheet exchange with the back office.
//!
//! ## Column Layout
//! ```text
//! ┌─────────┬──────────┬─────────────┬───────┬───────────┬───────────┬──────┬───────┐
//! │    A    │    B     │      C      │   D   │     E     │     F     │  G   │   H   │
//! │ Barcode │ ItemCode │ Description │ Price │ ColorCode │ ColorName │ Size │ Stock │
//! └─────────┴──────────┴─────────────┴───────┴───────────┴───────────┴──────┴───────┘
//! ```
//!
//! Import is a merge-by-barcode mutator: a row whose barcode already exists
//! replaces that product in place, any other row is appended. Products that
//! the file does not mention are kept.
//!
//! Cells holding a delimiter, a quote or a line break are written quoted,
//! with inner quotes doubled, and read back the same way.

use std::borrow::Cow;
use std::mem;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::product::{Product, Snapshot};
use crate::validation::validate_product;

/// Header written by [`export_csv`].
pub const EXPORT_HEADER: [&str; 8] = [
    "Barcode",
    "ItemCode",
    "Description",
    "Price",
    "ColorCode",
    "ColorName",
    "Size",
    "Stock",
];

const BOM: char = '\u{feff}';
const MIN_COLUMNS: usize = 7;

/// What an import did to the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    /// Rows that replaced an existing barcode.
    pub updated: usize,
    /// Rows appended as new products.
    pub added: usize,
    /// Rows dropped (too few columns, bad barcode).
    pub skipped: usize,
}

/// Parses CSV text into product rows.
///
/// The delimiter is `;` when the header line contains one, `,` otherwise.
///
/// ## Errors
/// [`CoreError::InvalidCsv`] when there is no data line after the header.
pub fn parse_csv(text: &str) -> CoreResult<(Vec<Product>, usize)> {
    let text = text.strip_prefix(BOM).unwrap_or(text);

    let header = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| CoreError::InvalidCsv {
            reason: "file is empty".to_string(),
        })?;
    let delimiter = if header.contains(';') { ';' } else { ',' };

    let mut products = Vec::new();
    let mut skipped = 0;
    let mut data_lines = 0;

    for record in split_records(text, delimiter).iter().skip(1) {
        data_lines += 1;
        match parse_row(record) {
            Some(product) => products.push(product),
            None => skipped += 1,
        }
    }

    if data_lines == 0 {
        return Err(CoreError::InvalidCsv {
            reason: "no rows after the header".to_string(),
        });
    }

    Ok((products, skipped))
}

/// Splits text into records of raw cells. Blank lines produce no record.
fn split_records(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => quoted = false,
                _ => cell.push(c),
            }
            continue;
        }

        match c {
            '"' if cell.trim().is_empty() => {
                cell.clear();
                quoted = true;
            }
            '\n' => {
                record.push(mem::take(&mut cell));
                push_record(&mut records, mem::take(&mut record));
            }
            '\r' => {}
            c if c == delimiter => record.push(mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }

    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        push_record(&mut records, record);
    }
    records
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    let blank = record.len() == 1 && record[0].trim().is_empty();
    if !blank {
        records.push(record);
    }
}

fn parse_row(record: &[String]) -> Option<Product> {
    let cells: Vec<&str> = record.iter().map(|cell| cell.trim()).collect();
    if cells.len() < MIN_COLUMNS {
        return None;
    }

    let product = Product {
        barcode: cells[0].to_string(),
        item_code: cells[1].to_string(),
        description: cells[2].to_string(),
        price: Money::parse_decimal(cells[3]).unwrap_or_default(),
        color_code: cells[4].to_string(),
        color_name: cells[5].to_string(),
        size: cells[6].to_string(),
        stock: cells.get(7).map(|cell| parse_stock(cell)).unwrap_or(0),
    };

    validate_product(&product).ok()?;
    Some(product)
}

/// Stock cells come from hand-edited sheets: `"12 units"`, `" 3"`, `"-2"`.
/// Everything but digits and `-` is dropped; negatives clamp to zero.
fn parse_stock(cell: &str) -> u32 {
    let kept: String = cell
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();

    let (negative, digits) = match kept.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, kept.as_str()),
    };
    let digits: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();

    if negative || digits.is_empty() {
        return 0;
    }
    digits.parse().unwrap_or(u32::MAX)
}

/// Merges `rows` into `current` by barcode.
pub fn merge_products(current: &Snapshot, rows: Vec<Product>) -> (Snapshot, ImportSummary) {
    let mut next = current.to_vec();
    let mut summary = ImportSummary::default();

    for row in rows {
        match next.iter().position(|p| p.barcode == row.barcode) {
            Some(index) => {
                next[index] = row;
                summary.updated += 1;
            }
            None => {
                next.push(row);
                summary.added += 1;
            }
        }
    }

    (Snapshot::new(next), summary)
}

/// Parses `text` and merges it into `current`.
///
/// ```rust
/// use discreet_core::csv::import_csv;
/// use discreet_core::seed_snapshot;
///
/// let text = "Barcode;ItemCode;Description;Price;ColorCode;ColorName;Size;Stock\n\
///             100101;SHIRT-99;Linen;120;10;white;S;9\n\
///             200200;PANTS-1;Chino;199.9;30;black;32;4\n";
///
/// let (next, summary) = import_csv(&seed_snapshot(), text).unwrap();
/// assert_eq!(next.find("100101").unwrap().stock, 9);
/// assert_eq!((summary.updated, summary.added), (1, 1));
/// ```
pub fn import_csv(current: &Snapshot, text: &str) -> CoreResult<(Snapshot, ImportSummary)> {
    let (rows, skipped) = parse_csv(text)?;
    let (next, mut summary) = merge_products(current, rows);
    summary.skipped = skipped;
    Ok((next, summary))
}

/// Renders the snapshot as BOM-prefixed UTF-8 CSV with [`EXPORT_HEADER`].
pub fn export_csv(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    out.push(BOM);
    out.push_str(&EXPORT_HEADER.join(","));

    for p in snapshot.iter() {
        let price = p.price.to_string();
        let stock = p.stock.to_string();
        let cells = [
            p.barcode.as_str(),
            p.item_code.as_str(),
            p.description.as_str(),
            price.as_str(),
            p.color_code.as_str(),
            p.color_name.as_str(),
            p.size.as_str(),
            stock.as_str(),
        ];

        out.push('\n');
        for (i, cell) in cells.into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&quote_cell(cell));
        }
    }

    out
}

fn quote_cell(cell: &str) -> Cow<'_, str> {
    if cell.contains(|c: char| matches!(c, ',' | ';' | '"' | '\n' | '\r')) {
        Cow::Owned(format!("\"{}\"", cell.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(cell)
    }
}
