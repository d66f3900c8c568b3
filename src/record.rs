use serde::Serialize;

use crate::store::LoanState;

/// Shown wherever a cell is absent, blank or a `NaN`-like marker.
pub const PLACEHOLDER: &str = "-";

const BLANK_MARKERS: [&str; 5] = ["nan", "none", "null", "nat", "#n/a"];

/// Whether a raw cell value carries no information.
pub fn is_blank(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || BLANK_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
}

/// Normalize a raw cell value for display.
pub fn display_value(value: &str) -> String {
    if is_blank(value) {
        PLACEHOLDER.to_string()
    } else {
        value.trim().to_string()
    }
}

/// How a linked document is embedded in the record page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Frame,
    Pdf,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentLink {
    pub url: String,
    pub kind: DocumentKind,
}

impl DocumentLink {
    /// Classify a link cell; blank cells carry no document.
    pub fn from_cell(value: &str) -> Option<Self> {
        if is_blank(value) {
            return None;
        }
        let url = value.trim().to_string();
        let lower = url.to_lowercase();

        let kind = if lower.ends_with('/') {
            DocumentKind::Frame
        } else if lower.ends_with(".pdf") {
            DocumentKind::Pdf
        } else if [".png", ".jpg", ".jpeg"]
            .iter()
            .any(|ext| lower.ends_with(ext))
        {
            DocumentKind::Image
        } else {
            DocumentKind::Frame
        };

        Some(DocumentLink { url, kind })
    }
}

/// One column of a row, as displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// A display-ready inventory item: fixed fields, every column of the row,
/// live loan state and the resolved photo.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub code: String,
    pub description: String,
    pub serial: String,
    pub asset_tag: String,
    pub location_code: String,
    pub fields: Vec<Field>,
    pub link: Option<DocumentLink>,
    /// Photo path relative to the photo root.
    pub photo: Option<String>,
    pub loan: LoanState,
}
