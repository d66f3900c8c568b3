use crate::error::{AppError, AppResult};
use crate::loader::{Dataset, InventoryRow, LogicalColumn};
use crate::photos::PhotoLibrary;
use crate::record::{DocumentLink, Field, Record, display_value, is_blank};
use crate::store::{StateStore, normalize_code};

/// Maximum number of autocomplete suggestions.
pub const SUGGESTION_LIMIT: usize = 10;

/// First row whose code equals `code`, ignoring case and surrounding blanks.
pub fn find_row<'a>(dataset: &'a Dataset, code: &str) -> Option<&'a InventoryRow> {
    let wanted = normalize_code(code);
    if wanted.is_empty() {
        return None;
    }
    dataset
        .rows()
        .iter()
        .find(|row| normalize_code(dataset.field(row, LogicalColumn::Code)) == wanted)
}

/// Rows whose `column` contains `query`, case-insensitively, in table order.
///
/// An empty query matches every row; a column missing from the sheet
/// matches none.
pub fn search_rows<'a>(
    dataset: &'a Dataset,
    query: &str,
    column: LogicalColumn,
) -> Vec<&'a InventoryRow> {
    let Some(index) = dataset.columns().get(column) else {
        return Vec::new();
    };
    let needle = query.trim().to_lowercase();
    dataset
        .rows()
        .iter()
        .filter(|row| row.value(index).to_lowercase().contains(&needle))
        .collect()
}

/// Distinct non-blank values of `column` containing `query`, in table
/// order, at most [`SUGGESTION_LIMIT`].
pub fn suggestions(dataset: &Dataset, query: &str, column: LogicalColumn) -> Vec<String> {
    let needle = query.trim().to_lowercase();
    let Some(index) = dataset.columns().get(column) else {
        return Vec::new();
    };
    if needle.is_empty() {
        return Vec::new();
    }

    let mut found: Vec<String> = Vec::new();
    for row in dataset.rows() {
        let value = row.value(index).trim();
        if is_blank(value) || !value.to_lowercase().contains(&needle) {
            continue;
        }
        if !found.iter().any(|existing| existing == value) {
            found.push(value.to_string());
            if found.len() == SUGGESTION_LIMIT {
                break;
            }
        }
    }
    found
}

/// Sorted distinct non-blank values of `column`, for selectors.
pub fn sorted_unique(dataset: &Dataset, column: LogicalColumn) -> Vec<String> {
    let Some(index) = dataset.columns().get(column) else {
        return Vec::new();
    };
    let mut values: Vec<String> = dataset
        .rows()
        .iter()
        .map(|row| row.value(index).trim())
        .filter(|value| !is_blank(value))
        .map(str::to_string)
        .collect();
    values.sort();
    values.dedup();
    values
}

/// Result of a column search, as the pages need to tell them apart.
#[derive(Debug)]
pub enum SearchOutcome {
    /// Nothing matched; carries the message to show.
    NoMatches(String),
    /// Exactly one match; callers redirect to its record.
    Single(Record),
    /// Several matches, in table order, for a selection list.
    Multiple(Vec<Record>),
}

/// Joins inventory rows with live loan state and photos.
pub struct Resolver<'a> {
    dataset: &'a Dataset,
    store: &'a StateStore,
    photos: &'a PhotoLibrary,
}

impl<'a> Resolver<'a> {
    pub fn new(dataset: &'a Dataset, store: &'a StateStore, photos: &'a PhotoLibrary) -> Self {
        Resolver {
            dataset,
            store,
            photos,
        }
    }

    /// Build the display record of a row. Loan state is read now, never cached.
    pub fn build_record(&self, row: &InventoryRow) -> AppResult<Record> {
        let dataset = self.dataset;
        let code = dataset.field(row, LogicalColumn::Code).trim();
        let location = dataset.field(row, LogicalColumn::Location).trim();

        let fields = dataset
            .headers()
            .iter()
            .zip(row.values())
            .map(|(name, value)| Field {
                name: name.clone(),
                value: display_value(value),
            })
            .collect();

        let photo = if is_blank(location) || is_blank(code) {
            None
        } else {
            self.photos.build_foto_path(code, location)
        };

        Ok(Record {
            code: display_value(code),
            description: display_value(dataset.field(row, LogicalColumn::Description)),
            serial: display_value(dataset.field(row, LogicalColumn::Serial)),
            asset_tag: display_value(dataset.field(row, LogicalColumn::AssetTag)),
            location_code: display_value(location),
            fields,
            link: DocumentLink::from_cell(dataset.field(row, LogicalColumn::Link)),
            photo,
            loan: self.store.get_state(code)?,
        })
    }

    /// Look up one item by code.
    ///
    /// # Errors
    /// * `AppError::NotFound` with a message naming the code when no row matches
    pub fn resolve_by_code(&self, code: &str) -> AppResult<Record> {
        match find_row(self.dataset, code) {
            Some(row) => self.build_record(row),
            None => Err(AppError::NotFound(format!(
                "No se encontró el código {}.",
                code.trim()
            ))),
        }
    }

    /// Matching rows of `column` as records, each with its current loan state.
    pub fn search(&self, query: &str, column: LogicalColumn) -> AppResult<Vec<Record>> {
        search_rows(self.dataset, query, column)
            .into_iter()
            .map(|row| self.build_record(row))
            .collect()
    }

    /// [`Resolver::search`] folded into its three outcomes.
    pub fn search_outcome(&self, query: &str, column: LogicalColumn) -> AppResult<SearchOutcome> {
        let mut records = self.search(query, column)?;
        Ok(match records.len() {
            0 => SearchOutcome::NoMatches(format!(
                "No se encontraron coincidencias para \"{}\".",
                query.trim()
            )),
            1 => SearchOutcome::Single(records.remove(0)),
            _ => SearchOutcome::Multiple(records),
        })
    }
}
