use inventario::loader::{LogicalColumn, load_inventory};
use inventario::resolver::find_row;
use inventario::AppError;
use inventario::record::{DocumentKind, DocumentLink};
use rust_xlsxwriter::Workbook;
use std::path::Path;

fn write_inventory(path: &Path, headers: &[&str]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "INVENTARIO DE EQUIPOS").unwrap();
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(2, col as u16, *header).unwrap();
    }

    sheet.write_number(3, 0, 1.0).unwrap();
    sheet.write_number(3, 1, 1001.0).unwrap();
    sheet.write_string(3, 2, "Multímetro").unwrap();
    sheet.write_string(3, 3, "SN-1").unwrap();
    sheet.write_string(3, 4, "1234567").unwrap();

    sheet.write_number(4, 0, 2.0).unwrap();
    sheet.write_string(4, 1, "B-02").unwrap();
    sheet.write_string(4, 2, "Osciloscopio").unwrap();

    workbook.save(path).unwrap();
}

#[test]
fn workbook_with_title_rows_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("INVENTARIO.xlsx");
    write_inventory(
        &path,
        &["N°", "Código", "Descripción", "N° Serie", "Ubicación"],
    );

    let dataset = load_inventory(&path, 2).unwrap();
    assert_eq!(dataset.rows().len(), 2);
    assert_eq!(
        dataset.headers(),
        &["n", "codigo", "descripcion", "n_serie", "ubicacion"]
    );

    let first = find_row(&dataset, "1001").expect("numeric codes read as text");
    assert_eq!(dataset.field(first, LogicalColumn::Serial), "SN-1");
    assert_eq!(dataset.field(first, LogicalColumn::Location), "1234567");

    let second = find_row(&dataset, "b-02").unwrap();
    assert_eq!(dataset.field(second, LogicalColumn::Description), "Osciloscopio");
    assert_eq!(dataset.field(second, LogicalColumn::Serial), "");
}

#[test]
fn workbook_without_description_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("INVENTARIO.xlsx");
    write_inventory(&path, &["N°", "Código", "Marca", "Serie", "Ubicación"]);

    match load_inventory(&path, 2) {
        Err(AppError::MissingColumn { column, .. }) => assert_eq!(column, "description"),
        other => panic!("expected a missing column error, got {:?}", other.map(|d| d.rows().len())),
    }
}

#[test]
fn link_column_reads_hyperlink_targets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("INVENTARIO.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "INVENTARIO DE EQUIPOS").unwrap();
    for (col, header) in ["Código", "Descripción", "Link"].iter().enumerate() {
        sheet.write_string(2, col as u16, *header).unwrap();
    }
    sheet.write_string(3, 0, "A-01").unwrap();
    sheet.write_string(3, 1, "Multímetro").unwrap();
    sheet
        .write_url_with_text(3, 2, "https://docs.example.com/manual.pdf", "Ver manual")
        .unwrap();
    sheet.write_string(4, 0, "B-02").unwrap();
    sheet.write_string(4, 1, "Osciloscopio").unwrap();
    sheet.write_string(4, 2, "Pendiente").unwrap();
    sheet.write_string(5, 0, "C-03").unwrap();
    sheet.write_string(5, 1, "Fuente").unwrap();
    sheet.write_url(5, 2, "https://docs.example.com/carpeta/").unwrap();
    workbook.save(&path).unwrap();

    let dataset = load_inventory(&path, 2).unwrap();

    let manual = find_row(&dataset, "A-01").unwrap();
    let link = DocumentLink::from_cell(dataset.field(manual, LogicalColumn::Link)).unwrap();
    assert_eq!(link.url, "https://docs.example.com/manual.pdf");
    assert_eq!(link.kind, DocumentKind::Pdf);

    let pending = find_row(&dataset, "B-02").unwrap();
    assert!(DocumentLink::from_cell(dataset.field(pending, LogicalColumn::Link)).is_none());

    let folder = find_row(&dataset, "C-03").unwrap();
    let link = DocumentLink::from_cell(dataset.field(folder, LogicalColumn::Link)).unwrap();
    assert_eq!(link.kind, DocumentKind::Frame);

    assert_eq!(dataset.summary().with_code_and_link, 2);
}
