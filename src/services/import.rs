/*!
 * # Bill-of-materials import
 *
 * Reads a hierarchical parts list from a CSV file or the first sheet of an Excel or
 * OpenDocument workbook. Both are reduced to rows of text cells. The sheet may start with
 * title rows (the first non-empty title cell names the product), followed by a header row and
 * data rows. A data row without a name is an assembly; rows with a name are components of the
 * current assembly, or of the row with the enclosing dotted position (`1.2` belongs to `1`).
 *
 * Parsing is pure; [`write_rows`] runs inside the caller's transaction.
 */

use calamine::{open_workbook_auto_from_rs, Reader};
use csv::ReaderBuilder;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use crate::entities::{assembly_component, part};
use crate::errors::ServiceError;
use crate::services::management::default_route;

pub const UNREADABLE_FILE_MESSAGE: &str =
    "Не удалось прочитать файл. Убедитесь, что он не поврежден.";
pub const NO_HEADER_MESSAGE: &str = "В файле не найдена строка с заголовками";
pub const NO_DEFAULT_ROUTE_MESSAGE: &str = "Не найден маршрут по умолчанию";

const DEFAULT_MATERIAL: &str = "-";
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

const POSITION_HEADERS: &[&str] = &["№", "no", "#"];
const DESIGNATION_HEADERS: &[&str] = &["обозначение", "designation"];
const NAME_HEADERS: &[&str] = &["наименование", "name"];
const QUANTITY_HEADERS: &[&str] = &["кол-во", "количество", "quantity", "qty"];
const SIZE_HEADERS: &[&str] = &["размер", "size"];
const MATERIAL_HEADERS: &[&str] = &["прим.", "примечание", "material"];

/// Outcome of an import
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
    #[serde(skip)]
    pub created: Vec<part::Model>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub position: Option<String>,
    pub designation: String,
    pub name: Option<String>,
    pub quantity: i32,
    pub size: Option<String>,
    pub material: Option<String>,
}

impl ImportRow {
    pub fn is_assembly(&self) -> bool {
        self.name.is_none()
    }

    /// Position of the enclosing row for dotted numbering (`1.2.3` → `1.2`).
    fn enclosing_position(&self) -> Option<&str> {
        self.position
            .as_deref()
            .and_then(|pos| pos.rsplit_once('.'))
            .map(|(head, _)| head)
            .filter(|head| !head.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedImport {
    /// Product named in the title rows
    pub product: Option<String>,
    pub rows: Vec<ImportRow>,
}

#[derive(Debug, Default)]
struct Columns {
    position: Option<usize>,
    designation: usize,
    name: Option<usize>,
    quantity: Option<usize>,
    size: Option<usize>,
    material: Option<usize>,
}

fn find_column(header: &[String], names: &[&str]) -> Option<usize> {
    header
        .iter()
        .position(|cell| names.iter().any(|name| cell.to_lowercase() == *name))
}

fn cell(record: &[String], index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.get(i))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_quantity(raw: Option<String>) -> i32 {
    raw.and_then(|value| value.replace(',', ".").parse::<f64>().ok())
        .map(|value| value.round() as i32)
        .filter(|value| *value >= 1)
        .unwrap_or(1)
}

fn detect_delimiter(text: &str) -> u8 {
    let sample: String = text.lines().take(10).collect::<Vec<_>>().join("\n");
    let semicolons = sample.matches(';').count();
    let commas = sample.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn unreadable() -> ServiceError {
    ServiceError::InvalidInput(UNREADABLE_FILE_MESSAGE.into())
}

/// Parses an uploaded file into import rows.
pub fn parse_file(file_name: &str, content: &[u8]) -> Result<ParsedImport, ServiceError> {
    if content.is_empty() {
        return Ok(ParsedImport::default());
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if extension == "csv" {
        let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
        let text = std::str::from_utf8(content).map_err(|_| unreadable())?;
        parse_csv(text)
    } else if SPREADSHEET_EXTENSIONS.contains(&extension.as_str()) {
        parse_records(read_workbook(content)?)
    } else {
        warn!(file = %file_name, "Unsupported import format");
        Err(unreadable())
    }
}

/// Reads the first sheet as text cells. Leading empty rows and columns are kept so cell
/// positions match the sheet.
fn read_workbook(content: &[u8]) -> Result<Vec<Vec<String>>, ServiceError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(content.to_vec())).map_err(|e| {
        warn!("Failed to open workbook: {}", e);
        unreadable()
    })?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| {
            warn!("Failed to read the first sheet: {}", e);
            unreadable()
        })?,
        None => return Ok(Vec::new()),
    };

    let (first_row, first_column) = range.start().unwrap_or((0, 0));
    let mut records = vec![Vec::new(); first_row as usize];
    for row in range.rows() {
        let mut record = vec![String::new(); first_column as usize];
        record.extend(row.iter().map(|value| value.to_string().trim().to_string()));
        records.push(record);
    }
    debug!(rows = records.len(), "Workbook sheet read");
    Ok(records)
}

/// Parses CSV text; the delimiter is `;` or `,`, whichever dominates the first lines.
pub fn parse_csv(text: &str) -> Result<ParsedImport, ServiceError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(detect_delimiter(text))
        .from_reader(text.as_bytes());

    let mut records: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            warn!("Failed to parse CSV record: {}", e);
            unreadable()
        })?;
        records.push(record.iter().map(|value| value.trim().to_string()).collect());
    }
    parse_records(records)
}

/// Finds the header row and turns the rows below it into import rows.
fn parse_records(records: Vec<Vec<String>>) -> Result<ParsedImport, ServiceError> {
    let header_index = records
        .iter()
        .position(|record| find_column(record, DESIGNATION_HEADERS).is_some())
        .ok_or_else(|| ServiceError::InvalidInput(NO_HEADER_MESSAGE.into()))?;
    let header = &records[header_index];

    let columns = Columns {
        position: find_column(header, POSITION_HEADERS),
        designation: find_column(header, DESIGNATION_HEADERS)
            .ok_or_else(|| ServiceError::InvalidInput(NO_HEADER_MESSAGE.into()))?,
        name: find_column(header, NAME_HEADERS),
        quantity: find_column(header, QUANTITY_HEADERS),
        size: find_column(header, SIZE_HEADERS),
        material: find_column(header, MATERIAL_HEADERS),
    };

    let product = records[..header_index]
        .iter()
        .flat_map(|record| record.iter())
        .find(|value| !value.is_empty())
        .cloned();

    let rows = records[header_index + 1..]
        .iter()
        .filter_map(|record| {
            let designation = cell(record, Some(columns.designation))?;
            Some(ImportRow {
                position: cell(record, columns.position),
                designation,
                name: cell(record, columns.name),
                quantity: parse_quantity(cell(record, columns.quantity)),
                size: cell(record, columns.size),
                material: cell(record, columns.material),
            })
        })
        .collect();

    Ok(ParsedImport { product, rows })
}

/// Creates the parts and assembly links of a parsed file.
pub async fn write_rows<C: ConnectionTrait>(
    db: &C,
    parsed: &ParsedImport,
) -> Result<ImportSummary, ServiceError> {
    let mut summary = ImportSummary::default();
    if parsed.rows.is_empty() {
        return Ok(summary);
    }

    let route_id = default_route(db)
        .await?
        .map(|route| route.id)
        .ok_or_else(|| ServiceError::InvalidOperation(NO_DEFAULT_ROUTE_MESSAGE.into()))?;

    let mut current_assembly: Option<String> = None;
    let mut current_product: Option<String> = parsed.product.clone();
    let mut by_position: HashMap<String, String> = HashMap::new();

    for row in &parsed.rows {
        let enclosing = row
            .enclosing_position()
            .and_then(|pos| by_position.get(pos))
            .cloned();

        let parent = if row.is_assembly() {
            enclosing
        } else {
            enclosing.or_else(|| current_assembly.clone())
        };

        if row.is_assembly() && parent.is_none() && parsed.product.is_none() {
            current_product = Some(row.designation.clone());
        }
        let product = current_product
            .clone()
            .unwrap_or_else(|| row.designation.clone());

        let existing = part::Entity::find_by_id(row.designation.clone())
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        match existing {
            Some(_) => {
                debug!(part_id = %row.designation, "Part already exists, skipping");
                summary.skipped += 1;
            }
            None => {
                let created = part::ActiveModel {
                    part_id: Set(row.designation.clone()),
                    product_designation: Set(product),
                    name: Set(row
                        .name
                        .clone()
                        .unwrap_or_else(|| row.designation.clone())),
                    material: Set(row
                        .material
                        .clone()
                        .unwrap_or_else(|| DEFAULT_MATERIAL.to_string())),
                    size: Set(row.size.clone()),
                    quantity_total: Set(row.quantity),
                    route_template_id: Set(Some(route_id)),
                    ..Default::default()
                }
                .insert(db)
                .await
                .map_err(ServiceError::db_error)?;
                summary.added += 1;
                summary.created.push(created);
            }
        }

        if let Some(parent_id) = parent.as_deref() {
            ensure_link(db, parent_id, &row.designation, row.quantity).await?;
        }
        if row.is_assembly() {
            current_assembly = Some(row.designation.clone());
        }
        if let Some(position) = &row.position {
            by_position.insert(position.clone(), row.designation.clone());
        }
    }

    Ok(summary)
}

async fn ensure_link<C: ConnectionTrait>(
    db: &C,
    parent_id: &str,
    child_id: &str,
    quantity: i32,
) -> Result<(), ServiceError> {
    if parent_id == child_id {
        return Ok(());
    }
    let existing = assembly_component::Entity::find()
        .filter(assembly_component::Column::ParentId.eq(parent_id))
        .filter(assembly_component::Column::ChildId.eq(child_id))
        .one(db)
        .await
        .map_err(ServiceError::db_error)?;
    if existing.is_none() {
        assembly_component::ActiveModel {
            parent_id: Set(parent_id.to_string()),
            child_id: Set(child_id.to_string()),
            quantity: Set(quantity),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const HIERARCHICAL_CSV: &str = concat!(
        "\"\",\"Наборка №3\",\"\",\"\",\"\",\"\",\"\"\n",
        "\"№\",\"Обозначение\",\"Наименование\",\"Кол-во\",\"Размер\",\"Операции\",\"Прим.\"\n",
        "\"\",\"АСЦБ-000475\",\"\",\"\",\"\",\"\",\"\"\n",
        "\"\",\"ЦДСА.8АТ-9800.00.03.000СБ\",\"Палец\",\"1\",\"\",\"Пок\",\"\"\n",
        "\"\",\"ЦДСА.218.79.00.04\",\"Болт осевой\",\"5\",\"S24х530(1)\",\"Св,HRC\",\"30ХГСА\"\n",
    );

    #[test]
    fn parses_title_header_and_rows() {
        let parsed = parse_file("bom.csv", HIERARCHICAL_CSV.as_bytes()).unwrap();
        assert_eq!(parsed.product.as_deref(), Some("Наборка №3"));
        assert_eq!(parsed.rows.len(), 3);

        assert!(parsed.rows[0].is_assembly());
        assert_eq!(parsed.rows[0].quantity, 1);

        let bolt = &parsed.rows[2];
        assert_eq!(bolt.name.as_deref(), Some("Болт осевой"));
        assert_eq!(bolt.quantity, 5);
        assert_eq!(bolt.size.as_deref(), Some("S24х530(1)"));
        assert_eq!(bolt.material.as_deref(), Some("30ХГСА"));
    }

    #[test]
    fn semicolon_files_with_bom() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice("Обозначение;Наименование;Кол-во\nA-1;Вал;2,0\n".as_bytes());
        let parsed = parse_file("list.CSV", &bytes).unwrap();
        assert_eq!(parsed.product, None);
        assert_eq!(parsed.rows[0].designation, "A-1");
        assert_eq!(parsed.rows[0].quantity, 2);
    }

    #[test]
    fn missing_header_is_reported() {
        let err = parse_file("bad.csv", "\"Поле1\",\"Поле2\"\n\"Значение1\",\"Значение2\"".as_bytes())
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidInput(msg) if msg == NO_HEADER_MESSAGE);
    }

    #[test]
    fn unsupported_extensions_are_unreadable() {
        assert_matches!(
            parse_file("test.txt", b"test data"),
            Err(ServiceError::InvalidInput(msg)) if msg == UNREADABLE_FILE_MESSAGE
        );
        assert_matches!(
            parse_file("book.xlsx", b"PK\x03\x04 truncated"),
            Err(ServiceError::InvalidInput(msg)) if msg == UNREADABLE_FILE_MESSAGE
        );
        assert_matches!(
            parse_file("book.ods", b"not a workbook"),
            Err(ServiceError::InvalidInput(msg)) if msg == UNREADABLE_FILE_MESSAGE
        );
    }

    #[test]
    fn workbook_sheets_read_like_csv() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        // Title one row down and one column in, header and data below it.
        sheet.write_string(1, 1, "Наборка №3").unwrap();
        for (col, title) in ["Обозначение", "Наименование", "Кол-во", "Размер", "Прим."]
            .into_iter()
            .enumerate()
        {
            sheet.write_string(2, col as u16 + 1, title).unwrap();
        }
        sheet.write_string(3, 1, "АСЦБ-000475").unwrap();
        sheet.write_string(4, 1, "ЦДСА.218.79.00.04").unwrap();
        sheet.write_string(4, 2, "Болт осевой").unwrap();
        sheet.write_number(4, 3, 5.0).unwrap();
        sheet.write_string(4, 5, "30ХГСА").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let parsed = parse_file("bom.XLSX", &bytes).unwrap();
        assert_eq!(parsed.product.as_deref(), Some("Наборка №3"));
        assert_eq!(parsed.rows.len(), 2);
        assert!(parsed.rows[0].is_assembly());
        let bolt = &parsed.rows[1];
        assert_eq!(bolt.designation, "ЦДСА.218.79.00.04");
        assert_eq!(bolt.quantity, 5);
        assert_eq!(bolt.size, None);
        assert_eq!(bolt.material.as_deref(), Some("30ХГСА"));
    }

    #[test]
    fn empty_content_is_nothing_to_import() {
        assert_eq!(parse_file("empty.xlsx", b"").unwrap(), ParsedImport::default());
    }

    #[test]
    fn dotted_positions_point_to_enclosing_row() {
        let row = ImportRow {
            position: Some("1.2.3".into()),
            designation: "X".into(),
            name: Some("Винт".into()),
            quantity: 1,
            size: None,
            material: None,
        };
        assert_eq!(row.enclosing_position(), Some("1.2"));

        let top = ImportRow {
            position: Some("4".into()),
            ..row
        };
        assert_eq!(top.enclosing_position(), None);
    }

    #[test]
    fn quantities_fall_back_to_one() {
        assert_eq!(parse_quantity(None), 1);
        assert_eq!(parse_quantity(Some("abc".into())), 1);
        assert_eq!(parse_quantity(Some("0".into())), 1);
        assert_eq!(parse_quantity(Some("3".into())), 3);
    }
}
