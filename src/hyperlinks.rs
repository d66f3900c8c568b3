//! Hyperlink targets of `.xlsx` worksheets.
//!
//! calamine returns the text shown in a cell but not the address behind it,
//! so the targets are read from the workbook package itself: the
//! `<hyperlink ref=.. r:id=..>` elements of the sheet, joined with the
//! sheet's relationship file.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::AppResult;

/// External hyperlink targets keyed by zero-based `(row, column)`.
pub type HyperlinkMap = HashMap<(usize, usize), String>;

/// Hyperlink targets of the first worksheet, in workbook order.
///
/// Links pointing inside the workbook (no relationship id) are skipped. A
/// package missing any of the expected parts yields an empty map.
pub fn first_sheet_hyperlinks(path: impl AsRef<Path>) -> AppResult<HyperlinkMap> {
    let mut archive = ZipArchive::new(File::open(path)?)?;

    let Some(workbook) = read_entry(&mut archive, "xl/workbook.xml")? else {
        return Ok(HyperlinkMap::new());
    };
    let Some(sheet_id) = elements(&workbook, b"sheet")?
        .into_iter()
        .next()
        .and_then(|mut attrs| attrs.remove("id"))
    else {
        return Ok(HyperlinkMap::new());
    };

    let workbook_rels = read_entry(&mut archive, "xl/_rels/workbook.xml.rels")?.unwrap_or_default();
    let Some(target) = relationships(&workbook_rels)?.remove(&sheet_id) else {
        return Ok(HyperlinkMap::new());
    };
    let sheet_path = package_path("xl", &target);

    let Some(sheet) = read_entry(&mut archive, &sheet_path)? else {
        return Ok(HyperlinkMap::new());
    };
    let refs: Vec<(String, String)> = elements(&sheet, b"hyperlink")?
        .into_iter()
        .filter_map(|mut attrs| Some((attrs.remove("ref")?, attrs.remove("id")?)))
        .collect();
    if refs.is_empty() {
        return Ok(HyperlinkMap::new());
    }

    let rels_path = match sheet_path.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", sheet_path),
    };
    let targets = relationships(&read_entry(&mut archive, &rels_path)?.unwrap_or_default())?;

    Ok(refs
        .into_iter()
        .filter_map(|(cell, id)| Some((parse_cell_ref(&cell)?, targets.get(&id)?.clone())))
        .collect())
}

/// Zero-based `(row, column)` of an `A1` style reference. A range yields
/// its top-left cell.
///
/// ```
/// use inventario::hyperlinks::parse_cell_ref;
///
/// assert_eq!(parse_cell_ref("C4"), Some((3, 2)));
/// assert_eq!(parse_cell_ref("AA10:AB12"), Some((9, 26)));
/// ```
pub fn parse_cell_ref(reference: &str) -> Option<(usize, usize)> {
    let first = reference.split(':').next()?.replace('$', "");
    let split = first.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = first.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let column = letters
        .chars()
        .fold(0usize, |acc, c| acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1));
    let row = digits.parse::<usize>().ok()?.checked_sub(1)?;
    Some((row, column - 1))
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> AppResult<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

// Relationship targets are relative to the part's folder unless absolute.
fn package_path(base: &str, target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("{}/{}", base, target),
    }
}

fn relationships(xml: &str) -> AppResult<HashMap<String, String>> {
    Ok(elements(xml, b"Relationship")?
        .into_iter()
        .filter_map(|mut attrs| Some((attrs.remove("Id")?, attrs.remove("Target")?)))
        .collect())
}

/// Attributes of every element named `name`, in document order.
fn elements(xml: &str, name: &[u8]) -> AppResult<Vec<HashMap<String, String>>> {
    let mut reader = Reader::from_str(xml);
    let mut found = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == name => {
                found.push(attributes(&e, &reader));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}

// Keyed by local name, so `r:id` is found as `id`.
fn attributes(element: &BytesStart<'_>, reader: &Reader<&[u8]>) -> HashMap<String, String> {
    element
        .attributes()
        .flatten()
        .filter_map(|attr| {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.decode_and_unescape_value(reader).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_refs_parse() {
        assert_eq!(parse_cell_ref("A1"), Some((0, 0)));
        assert_eq!(parse_cell_ref("$B$7"), Some((6, 1)));
        assert_eq!(parse_cell_ref("z3"), Some((2, 25)));
        assert_eq!(parse_cell_ref("A0"), None);
        assert_eq!(parse_cell_ref("12"), None);
        assert_eq!(parse_cell_ref("C"), None);
    }

    #[test]
    fn hyperlink_elements_join_relationships() {
        let sheet = r#"<worksheet xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
            <sheetData/>
            <hyperlinks>
                <hyperlink ref="C4" r:id="rId1"/>
                <hyperlink ref="C5" location="Hoja2!A1" display="interno"/>
            </hyperlinks>
        </worksheet>"#;
        let rels = r#"<Relationships>
            <Relationship Id="rId1" Type="hyperlink" Target="https://docs.example.com/a.pdf?x=1&amp;y=2" TargetMode="External"/>
        </Relationships>"#;

        let refs = elements(sheet, b"hyperlink").unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].get("id").map(String::as_str), Some("rId1"));
        assert_eq!(refs[1].get("id"), None);

        let targets = relationships(rels).unwrap();
        assert_eq!(
            targets.get("rId1").map(String::as_str),
            Some("https://docs.example.com/a.pdf?x=1&y=2")
        );
    }

    #[test]
    fn relationship_targets_resolve_inside_the_package() {
        assert_eq!(package_path("xl", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(package_path("xl", "/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
    }

    #[test]
    fn non_zip_files_are_errors() {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"not a zip").unwrap();
        assert!(first_sheet_hyperlinks(file.path()).is_err());
    }
}
