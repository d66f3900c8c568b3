use calamine::{Data, Reader, open_workbook_auto};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::error::{AppError, AppResult};
use crate::hyperlinks::{self, HyperlinkMap};
use crate::record::is_blank;

lazy_static! {
    static ref NON_ALNUM_RUN: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// A semantically named field, resolved from whatever header text the
/// spreadsheet happens to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogicalColumn {
    Code,
    Description,
    Serial,
    AssetTag,
    Location,
    Link,
}

impl LogicalColumn {
    /// Header spellings tried in order; compared after normalization.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            LogicalColumn::Code => &["codigo", "cod", "code", "codigo_inventario", "id"],
            LogicalColumn::Description => &["descripcion", "description", "desc", "nombre", "detalle"],
            LogicalColumn::Serial => &["serie", "n_serie", "no_serie", "numero_de_serie", "num_serie", "serial"],
            LogicalColumn::AssetTag => &[
                "activo",
                "n_activo",
                "no_activo",
                "numero_de_activo",
                "activo_fijo",
                "placa",
                "asset_tag",
            ],
            LogicalColumn::Location => &[
                "ubicacion",
                "codigo_ubicacion",
                "cod_ubicacion",
                "codigo_de_ubicacion",
                "location",
            ],
            LogicalColumn::Link => &["link", "enlace", "hipervinculo", "documento", "url"],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LogicalColumn::Code => "code",
            LogicalColumn::Description => "description",
            LogicalColumn::Serial => "serial",
            LogicalColumn::AssetTag => "asset_tag",
            LogicalColumn::Location => "location",
            LogicalColumn::Link => "link",
        }
    }

    /// Map the `kind` parameter of search and autocomplete requests.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind.trim().to_lowercase().as_str() {
            "code" | "codigo" => Some(LogicalColumn::Code),
            "desc" | "descripcion" => Some(LogicalColumn::Description),
            "serie" | "serial" => Some(LogicalColumn::Serial),
            "act" | "activo" => Some(LogicalColumn::AssetTag),
            _ => None,
        }
    }
}

/// Normalize a header: strip accents, lowercase, collapse every run of
/// non-alphanumeric characters into one underscore.
///
/// ```
/// use inventario::loader::normalize_column_name;
///
/// assert_eq!(normalize_column_name("  Código de Ubicación "), "codigo_de_ubicacion");
/// assert_eq!(normalize_column_name("N° Serie"), "n_serie");
/// ```
pub fn normalize_column_name(raw: &str) -> String {
    let stripped: String = raw
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    NON_ALNUM_RUN
        .replace_all(&stripped, "_")
        .trim_matches('_')
        .to_string()
}

/// Index of the first header matching one of the candidate spellings.
///
/// Candidates are tried in order, so an earlier spelling wins even when a
/// later one appears further left in the sheet.
pub fn resolve_column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        let wanted = normalize_column_name(candidate);
        headers.iter().position(|header| *header == wanted)
    })
}

/// Header positions of the logical columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub code: usize,
    pub description: usize,
    pub serial: Option<usize>,
    pub asset_tag: Option<usize>,
    pub location: Option<usize>,
    pub link: Option<usize>,
}

impl ColumnMap {
    /// Resolve every logical column; code and description are mandatory.
    pub fn resolve(headers: &[String]) -> AppResult<Self> {
        let required = |column: LogicalColumn| {
            resolve_column(headers, column.candidates()).ok_or_else(|| AppError::MissingColumn {
                column: column.name(),
                candidates: column.candidates().join(", "),
            })
        };
        let optional = |column: LogicalColumn| resolve_column(headers, column.candidates());

        Ok(ColumnMap {
            code: required(LogicalColumn::Code)?,
            description: required(LogicalColumn::Description)?,
            serial: optional(LogicalColumn::Serial),
            asset_tag: optional(LogicalColumn::AssetTag),
            location: optional(LogicalColumn::Location),
            link: optional(LogicalColumn::Link),
        })
    }

    pub fn get(&self, column: LogicalColumn) -> Option<usize> {
        match column {
            LogicalColumn::Code => Some(self.code),
            LogicalColumn::Description => Some(self.description),
            LogicalColumn::Serial => self.serial,
            LogicalColumn::AssetTag => self.asset_tag,
            LogicalColumn::Location => self.location,
            LogicalColumn::Link => self.link,
        }
    }
}

/// One data row, values aligned with [`Dataset::headers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRow {
    values: Vec<String>,
}

impl InventoryRow {
    /// Raw text at a column index; out-of-range reads are empty.
    pub fn value(&self, index: usize) -> &str {
        self.values.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Counters shown on the index page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub without_code: usize,
    pub with_code: usize,
    pub with_code_and_link: usize,
}

/// The inventory table, read-only after load.
#[derive(Debug, Clone)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<InventoryRow>,
    columns: ColumnMap,
}

impl Dataset {
    /// Build a dataset from raw header text and data rows.
    ///
    /// Headers are normalized (duplicates get a numeric suffix, empty ones
    /// become `unnamed_<index>`), short rows are padded, rows with no content
    /// at all are dropped.
    ///
    /// # Errors
    /// * `AppError::MissingColumn` if the code or description column cannot be resolved
    pub fn from_rows(raw_headers: Vec<String>, rows: Vec<Vec<String>>) -> AppResult<Self> {
        let width = rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(raw_headers.len()))
            .max()
            .unwrap_or(0);

        let mut headers: Vec<String> = Vec::with_capacity(width);
        for index in 0..width {
            let raw = raw_headers.get(index).map(String::as_str).unwrap_or("");
            let mut name = normalize_column_name(raw);
            if name.is_empty() {
                name = format!("unnamed_{}", index);
            }
            if headers.contains(&name) {
                let mut suffix = 1;
                while headers.contains(&format!("{}_{}", name, suffix)) {
                    suffix += 1;
                }
                name = format!("{}_{}", name, suffix);
            }
            headers.push(name);
        }

        let columns = ColumnMap::resolve(&headers)?;

        let rows = rows
            .into_iter()
            .filter(|values| values.iter().any(|value| !value.trim().is_empty()))
            .map(|mut values| {
                values.resize(width, String::new());
                InventoryRow { values }
            })
            .collect();

        Ok(Dataset {
            headers,
            rows,
            columns,
        })
    }

    /// Build a dataset from a full sheet grid whose header sits at `header_row`.
    pub fn from_grid(mut grid: Vec<Vec<String>>, header_row: usize) -> AppResult<Self> {
        if grid.len() <= header_row {
            return Err(AppError::Dataset(format!(
                "header row {} not present ({} rows in sheet)",
                header_row,
                grid.len()
            )));
        }
        let data = grid.split_off(header_row + 1);
        let headers = grid.pop().unwrap_or_default();
        Self::from_rows(headers, data)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[InventoryRow] {
        &self.rows
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    /// Raw text of a logical field; empty when the column is not present.
    pub fn field<'a>(&self, row: &'a InventoryRow, column: LogicalColumn) -> &'a str {
        match self.columns.get(column) {
            Some(index) => row.value(index),
            None => "",
        }
    }

    pub fn summary(&self) -> Summary {
        let total = self.rows.len();
        let with_code: Vec<&InventoryRow> = self
            .rows
            .iter()
            .filter(|row| !is_blank(row.value(self.columns.code)))
            .collect();
        let with_code_and_link = match self.columns.link {
            Some(link) => with_code
                .iter()
                .filter(|row| !is_blank(row.value(link)))
                .count(),
            None => 0,
        };

        Summary {
            total,
            without_code: total - with_code.len(),
            with_code: with_code.len(),
            with_code_and_link,
        }
    }
}

/// Load the inventory from a CSV file
///
/// Quoted fields and doubled quotes are honoured; quoted fields spanning
/// several lines are not.
///
/// # Arguments
/// * `filepath` - Path to the CSV file to load
/// * `header_row` - Zero-based index of the header line
///
/// # Returns
/// * `AppResult<Dataset>` - The loaded inventory or an error
pub fn from_csv(filepath: impl AsRef<Path>, header_row: usize) -> AppResult<Dataset> {
    let file = File::open(filepath)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;

    let grid = lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let line = if index == 0 {
                line.trim_start_matches('\u{feff}')
            } else {
                line.as_str()
            };
            parse_csv_row(line)
        })
        .collect();

    Dataset::from_grid(grid, header_row)
}

/// Load the inventory from the first sheet of a workbook
///
/// Every cell is read as text. Whole-number floats lose their `.0` so codes
/// stored as numbers compare like the text typed by users. In `.xlsx` and
/// `.xlsm` files the link column carries hyperlink targets, not the labels
/// shown in the cells.
///
/// # Arguments
/// * `filepath` - Path to the workbook (`.xlsx`, `.xlsm`, `.xls`, `.ods`)
/// * `header_row` - Zero-based sheet row holding the headers
///
/// # Returns
/// * `AppResult<Dataset>` - The loaded inventory or an error
pub fn from_excel(filepath: impl AsRef<Path>, header_row: usize) -> AppResult<Dataset> {
    let path = filepath.as_ref();
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Dataset("workbook has no sheets".to_string()))??;

    // The range starts at the first used cell, not at A1.
    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    let mut grid: Vec<Vec<String>> = vec![Vec::new(); first_row as usize];
    for row in range.rows() {
        let mut values = vec![String::new(); first_col as usize];
        values.extend(row.iter().map(cell_text));
        grid.push(values);
    }

    if has_extension(path, &["xlsx", "xlsm"]) {
        match hyperlinks::first_sheet_hyperlinks(path) {
            Ok(targets) => apply_link_targets(&mut grid, header_row, &targets),
            Err(e) => log::warn!("hyperlinks of {} not read: {}", path.display(), e),
        }
    }

    Dataset::from_grid(grid, header_row)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

fn looks_like_url(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    text.starts_with("http://") || text.starts_with("https://")
}

/// Put the hyperlink target behind each link cell in place of its text.
///
/// A link cell without a hyperlink keeps its text only when the text is a
/// URL itself; labels such as "Ver manual" are cleared.
fn apply_link_targets(grid: &mut [Vec<String>], header_row: usize, targets: &HyperlinkMap) {
    let Some(headers) = grid.get(header_row) else {
        return;
    };
    let headers: Vec<String> = headers.iter().map(|h| normalize_column_name(h)).collect();
    let Some(column) = resolve_column(&headers, LogicalColumn::Link.candidates()) else {
        return;
    };

    for (row_index, row) in grid.iter_mut().enumerate().skip(header_row + 1) {
        let Some(cell) = row.get_mut(column) else {
            continue;
        };
        match targets.get(&(row_index, column)) {
            Some(target) => *cell = target.clone(),
            None if !looks_like_url(cell) => cell.clear(),
            None => {}
        }
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

// Parse a CSV row into a vector of strings
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    // Escaped quote inside a quoted field
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(std::mem::take(&mut current_field));
            }
            _ => current_field.push(c),
        }
    }

    result.push(current_field);
    result
}

/// Detect file type and load the inventory
///
/// # Arguments
/// * `filepath` - Path to the inventory file
/// * `header_row` - Zero-based row index of the headers
///
/// # Returns
/// * `AppResult<Dataset>` - The loaded inventory or an error
pub fn load_inventory(filepath: impl AsRef<Path>, header_row: usize) -> AppResult<Dataset> {
    let path = filepath.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => from_csv(path, header_row),
        Some("xlsx") | Some("xlsm") | Some("xls") | Some("ods") => from_excel(path, header_row),
        Some(ext) => Err(AppError::Dataset(format!(
            "unsupported file extension: {}",
            ext
        ))),
        None => Err(AppError::Dataset("file has no extension".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn normalize_strips_accents_and_collapses_separators() {
        assert_eq!(normalize_column_name("Descripción"), "descripcion");
        assert_eq!(normalize_column_name("Nº  de  Activo--Fijo"), "n_de_activo_fijo");
        assert_eq!(normalize_column_name("__CÓDIGO__"), "codigo");
        assert_eq!(normalize_column_name("???"), "");
    }

    #[test]
    fn resolve_column_prefers_earlier_candidate() {
        let headers = strings(&["item", "serial", "n_serie", "codigo"]);
        assert_eq!(resolve_column(&headers, &["n_serie", "serial"]), Some(2));
        assert_eq!(resolve_column(&headers, &["Código"]), Some(3));
        assert_eq!(resolve_column(&headers, &["ubicacion"]), None);
    }

    #[test]
    fn from_rows_normalizes_headers_and_pads_rows() {
        let dataset = Dataset::from_rows(
            strings(&["Código", "Descripción", "Descripción", ""]),
            vec![strings(&["A-01", "Widget"]), strings(&["", "", "", ""])],
        )
        .unwrap();

        assert_eq!(
            dataset.headers(),
            &strings(&["codigo", "descripcion", "descripcion_1", "unnamed_3"])[..]
        );
        assert_eq!(dataset.rows().len(), 1);
        assert_eq!(dataset.rows()[0].values().len(), 4);
        assert_eq!(dataset.columns().code, 0);
        assert_eq!(dataset.columns().description, 1);
        assert_eq!(dataset.columns().serial, None);
    }

    #[test]
    fn missing_mandatory_column_is_fatal() {
        let err = Dataset::from_rows(strings(&["Código", "Ubicación"]), Vec::new()).unwrap_err();
        match err {
            AppError::MissingColumn { column, .. } => assert_eq!(column, "description"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn from_grid_skips_rows_above_header() {
        let grid = vec![
            strings(&["INVENTARIO LABORATORIO"]),
            strings(&[]),
            strings(&["N°", "Código", "Serie", "Descripción"]),
            strings(&["1", "A-01", "S1", "Widget"]),
        ];
        let dataset = Dataset::from_grid(grid, 2).unwrap();
        assert_eq!(dataset.rows().len(), 1);
        let row = &dataset.rows()[0];
        assert_eq!(dataset.field(row, LogicalColumn::Code), "A-01");
        assert_eq!(dataset.field(row, LogicalColumn::Serial), "S1");
        assert_eq!(dataset.field(row, LogicalColumn::Location), "");

        assert!(Dataset::from_grid(vec![strings(&["x"])], 2).is_err());
    }

    #[test]
    fn summary_counts_codes_and_links() {
        let dataset = Dataset::from_rows(
            strings(&["codigo", "descripcion", "link"]),
            vec![
                strings(&["A-01", "Widget", "https://x/a.pdf"]),
                strings(&["A-02", "Gadget", ""]),
                strings(&["nan", "Loose part", "https://x/b.pdf"]),
            ],
        )
        .unwrap();
        assert_eq!(
            dataset.summary(),
            Summary {
                total: 3,
                without_code: 1,
                with_code: 2,
                with_code_and_link: 1,
            }
        );
    }

    #[test]
    fn csv_rows_honour_quotes() {
        assert_eq!(
            parse_csv_row(r#"A-01,"Cable, 2 m","say ""hi""""#),
            strings(&["A-01", "Cable, 2 m", r#"say "hi""#])
        );
        assert_eq!(parse_csv_row(""), strings(&[""]));
    }

    #[test]
    fn csv_file_loads_through_extension_dispatch() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "\u{feff}Inventario").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "Código,Descripción,Ubicación").unwrap();
        writeln!(file, "A-01,Widget,1234567").unwrap();
        writeln!(file, "B-02,\"Gadget, large\",").unwrap();
        file.flush().unwrap();

        let dataset = load_inventory(file.path(), 2).unwrap();
        assert_eq!(dataset.rows().len(), 2);
        assert_eq!(
            dataset.field(&dataset.rows()[1], LogicalColumn::Description),
            "Gadget, large"
        );
        assert_eq!(dataset.columns().location, Some(2));
    }

    #[test]
    fn link_cells_take_hyperlink_targets() {
        let mut grid = vec![
            strings(&["Inventario"]),
            strings(&[]),
            strings(&["Código", "Descripción", "Link"]),
            strings(&["A-01", "Widget", "Ver manual"]),
            strings(&["A-02", "Gadget", "https://x/plain.pdf"]),
            strings(&["A-03", "Cable", "sin enlace"]),
        ];
        let targets = HyperlinkMap::from([((3, 2), "https://x/manual.pdf".to_string())]);

        apply_link_targets(&mut grid, 2, &targets);
        assert_eq!(grid[3][2], "https://x/manual.pdf");
        assert_eq!(grid[4][2], "https://x/plain.pdf");
        assert_eq!(grid[5][2], "");
        assert_eq!(grid[2][2], "Link");

        let dataset = Dataset::from_grid(grid, 2).unwrap();
        assert_eq!(dataset.summary().with_code_and_link, 2);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        assert!(matches!(
            load_inventory("inventory.txt", 2),
            Err(AppError::Dataset(_))
        ));
    }
}
