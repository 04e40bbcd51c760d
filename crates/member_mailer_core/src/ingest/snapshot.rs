//! Spreadsheet loader for the current-members snapshot.

use crate::model::member::MemberRecord;
use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use log::{error, info};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Instant;

const COL_MEMBER_NUMBER: &str = "GAN";
const COL_FIRST_NAME: &str = "First Name";
const COL_LAST_NAME: &str = "Last Name";
const COL_DESIGNATIONS: &str = "Designations";
const COL_MEMBERSHIP_TYPE: &str = "Membership Type";
const COL_JOIN_DATE: &str = "Join Date";
const COL_END_DATE: &str = "End Date";
const COL_TERMINATE_DATE: &str = "Terminate Date";
const COL_MEMBERSHIP_YEARS: &str = "Membership Years";
const COL_EMAIL: &str = "Email";
const COL_PHONE: &str = "Phone";
const COL_ORGANIZATION: &str = "Organization";
const COL_JOB_TITLE: &str = "Job Title";
const COL_JOB_CODE: &str = "Job Code";
const COL_INDUSTRY: &str = "Industry";
const COL_ADDRESS1: &str = "Address 1";
const COL_ADDRESS2: &str = "Address 2";
const COL_CITY: &str = "City";
const COL_STATE: &str = "State";
const COL_EMAIL_OPT_OUT: &str = "Email Opt Out";

/// Header cells every snapshot must carry. Order in the sheet is free and
/// extra columns are ignored.
pub const REQUIRED_COLUMNS: &[&str] = &[
    COL_MEMBER_NUMBER,
    COL_FIRST_NAME,
    COL_LAST_NAME,
    COL_DESIGNATIONS,
    COL_MEMBERSHIP_TYPE,
    COL_JOIN_DATE,
    COL_END_DATE,
    COL_TERMINATE_DATE,
    COL_MEMBERSHIP_YEARS,
    COL_EMAIL,
    COL_PHONE,
    COL_ORGANIZATION,
    COL_JOB_TITLE,
    COL_JOB_CODE,
    COL_INDUSTRY,
    COL_ADDRESS1,
    COL_ADDRESS2,
    COL_CITY,
    COL_STATE,
    COL_EMAIL_OPT_OUT,
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Snapshot ingestion error. Row numbers are 1-based sheet rows, so they
/// match what an operator sees in the spreadsheet.
#[derive(Debug)]
pub enum SnapshotError {
    Open {
        path: PathBuf,
        source: calamine::Error,
    },
    NoWorksheet(PathBuf),
    EmptySheet,
    MissingColumns(Vec<&'static str>),
    DuplicateColumn(&'static str),
    MissingMemberNumber {
        row: usize,
    },
    DuplicateMemberNumber {
        member_number: String,
        first_row: usize,
        row: usize,
    },
    InvalidValue {
        row: usize,
        column: &'static str,
        value: String,
    },
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "failed to open snapshot `{}`: {source}", path.display())
            }
            Self::NoWorksheet(path) => {
                write!(f, "snapshot `{}` contains no worksheet", path.display())
            }
            Self::EmptySheet => write!(f, "snapshot worksheet has no header row"),
            Self::MissingColumns(columns) => write!(
                f,
                "snapshot is missing required columns: {}",
                columns.join(", ")
            ),
            Self::DuplicateColumn(column) => {
                write!(f, "snapshot header repeats required column `{column}`")
            }
            Self::MissingMemberNumber { row } => {
                write!(f, "snapshot row {row} has no `{COL_MEMBER_NUMBER}` value")
            }
            Self::DuplicateMemberNumber {
                member_number,
                first_row,
                row,
            } => write!(
                f,
                "snapshot row {row} repeats member number {member_number} from row {first_row}"
            ),
            Self::InvalidValue { row, column, value } => {
                write!(f, "snapshot row {row} column `{column}` has invalid value `{value}`")
            }
        }
    }
}

impl Error for SnapshotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Loads the member snapshot from a workbook.
///
/// Reads `sheet` when given, otherwise the first worksheet.
///
/// # Side effects
/// - Emits `snapshot_load` logging events with row count and duration.
pub fn load_snapshot(
    path: impl AsRef<Path>,
    sheet: Option<&str>,
) -> SnapshotResult<Vec<MemberRecord>> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!("event=snapshot_load module=ingest status=start");

    let result = read_first_or_named_sheet(path, sheet).and_then(|range| {
        // The range begins at the first used cell, which may sit below row 1.
        let header_row = range.start().map_or(1, |(row, _)| row as usize + 1);
        parse_rows_at(header_row, range.rows())
    });
    match &result {
        Ok(records) => info!(
            "event=snapshot_load module=ingest status=ok rows={} duration_ms={}",
            records.len(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=snapshot_load module=ingest status=error duration_ms={} error={}",
            started_at.elapsed().as_millis(),
            err
        ),
    }
    result
}

fn read_first_or_named_sheet(
    path: &Path,
    sheet: Option<&str>,
) -> SnapshotResult<calamine::Range<Data>> {
    let open_error = |source| SnapshotError::Open {
        path: path.to_path_buf(),
        source,
    };

    let mut workbook = open_workbook_auto(path).map_err(open_error)?;
    match sheet {
        Some(name) => workbook.worksheet_range(name).map_err(open_error),
        None => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| SnapshotError::NoWorksheet(path.to_path_buf()))?
            .map_err(open_error),
    }
}

/// Parses header + data rows into member records, with the header on sheet
/// row 1.
///
/// Fully blank rows are skipped. Every other row must carry a unique member
/// number and well-formed dates, numbers and opt-out flags.
pub fn parse_rows<'a, I>(rows: I) -> SnapshotResult<Vec<MemberRecord>>
where
    I: IntoIterator<Item = &'a [Data]>,
{
    parse_rows_at(1, rows)
}

/// Like `parse_rows`, with the header on 1-based sheet row `header_row`.
pub fn parse_rows_at<'a, I>(header_row: usize, rows: I) -> SnapshotResult<Vec<MemberRecord>>
where
    I: IntoIterator<Item = &'a [Data]>,
{
    let mut rows = rows.into_iter();
    let header = rows.next().ok_or(SnapshotError::EmptySheet)?;
    let columns = resolve_columns(header)?;

    let mut records = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (index, cells) in rows.enumerate() {
        let row = RowReader {
            cells,
            row_number: header_row + 1 + index,
            columns: &columns,
        };
        if row.is_blank() {
            continue;
        }

        let record = row.to_record()?;
        if let Some(first_row) = seen.insert(record.member_number.clone(), row.row_number) {
            return Err(SnapshotError::DuplicateMemberNumber {
                member_number: record.member_number,
                first_row,
                row: row.row_number,
            });
        }
        records.push(record);
    }

    Ok(records)
}

fn resolve_columns(header: &[Data]) -> SnapshotResult<HashMap<&'static str, usize>> {
    let mut columns = HashMap::new();
    for (index, cell) in header.iter().enumerate() {
        let Data::String(name) = cell else {
            continue;
        };
        let Some(&column) = REQUIRED_COLUMNS
            .iter()
            .find(|&&column| column == name.trim())
        else {
            continue;
        };
        if columns.insert(column, index).is_some() {
            return Err(SnapshotError::DuplicateColumn(column));
        }
    }

    let missing: Vec<&'static str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !columns.contains_key(column))
        .collect();
    if !missing.is_empty() {
        return Err(SnapshotError::MissingColumns(missing));
    }
    Ok(columns)
}

struct RowReader<'a> {
    cells: &'a [Data],
    row_number: usize,
    columns: &'a HashMap<&'static str, usize>,
}

impl RowReader<'_> {
    fn is_blank(&self) -> bool {
        self.cells.iter().all(|cell| match cell {
            Data::Empty => true,
            Data::String(value) => value.trim().is_empty(),
            _ => false,
        })
    }

    fn to_record(&self) -> SnapshotResult<MemberRecord> {
        let member_number = self
            .text(COL_MEMBER_NUMBER)?
            .ok_or(SnapshotError::MissingMemberNumber {
                row: self.row_number,
            })?;

        Ok(MemberRecord {
            member_number,
            first_name: self.text(COL_FIRST_NAME)?,
            last_name: self.text(COL_LAST_NAME)?,
            designations: self.text(COL_DESIGNATIONS)?,
            membership_type: self.text(COL_MEMBERSHIP_TYPE)?,
            join_date: self.date(COL_JOIN_DATE)?,
            end_date: self.date(COL_END_DATE)?,
            terminated_date: self.date(COL_TERMINATE_DATE)?,
            membership_years: self.number(COL_MEMBERSHIP_YEARS)?,
            email: self.text(COL_EMAIL)?,
            phone: self.text(COL_PHONE)?,
            organization: self.text(COL_ORGANIZATION)?,
            job_title: self.text(COL_JOB_TITLE)?,
            job_code: self.text(COL_JOB_CODE)?,
            industry: self.text(COL_INDUSTRY)?,
            address1: self.text(COL_ADDRESS1)?,
            address2: self.text(COL_ADDRESS2)?,
            city: self.text(COL_CITY)?,
            state: self.text(COL_STATE)?,
            email_opt_out: self.flag(COL_EMAIL_OPT_OUT)?,
        })
    }

    fn cell(&self, column: &'static str) -> &Data {
        self.columns
            .get(column)
            .and_then(|&index| self.cells.get(index))
            .unwrap_or(&Data::Empty)
    }

    fn invalid(&self, column: &'static str, cell: &Data) -> SnapshotError {
        SnapshotError::InvalidValue {
            row: self.row_number,
            column,
            value: cell.to_string(),
        }
    }

    fn text(&self, column: &'static str) -> SnapshotResult<Option<String>> {
        let cell = self.cell(column);
        match cell {
            Data::Empty => Ok(None),
            Data::String(value) => Ok(non_blank(value)),
            Data::Int(value) => Ok(Some(value.to_string())),
            Data::Float(value) => Ok(Some(format_number(*value))),
            Data::Error(_) => Err(self.invalid(column, cell)),
            other => Ok(non_blank(&other.to_string())),
        }
    }

    fn date(&self, column: &'static str) -> SnapshotResult<Option<NaiveDate>> {
        let cell = self.cell(column);
        match cell {
            Data::Empty => Ok(None),
            Data::String(value) | Data::DateTimeIso(value) => match non_blank(value) {
                None => Ok(None),
                Some(value) => parse_date_text(&value)
                    .map(Some)
                    .ok_or_else(|| self.invalid(column, cell)),
            },
            Data::DateTime(_) | Data::Int(_) | Data::Float(_) => cell
                .as_date()
                .map(Some)
                .ok_or_else(|| self.invalid(column, cell)),
            _ => Err(self.invalid(column, cell)),
        }
    }

    fn number(&self, column: &'static str) -> SnapshotResult<Option<f64>> {
        let cell = self.cell(column);
        match cell {
            Data::Empty => Ok(None),
            Data::Int(value) => Ok(Some(*value as f64)),
            Data::Float(value) => Ok(Some(*value)),
            Data::String(value) => match non_blank(value) {
                None => Ok(None),
                Some(value) => value
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| self.invalid(column, cell)),
            },
            _ => Err(self.invalid(column, cell)),
        }
    }

    fn flag(&self, column: &'static str) -> SnapshotResult<bool> {
        let cell = self.cell(column);
        match cell {
            Data::Empty => Ok(false),
            Data::Bool(value) => Ok(*value),
            Data::Int(0) => Ok(false),
            Data::Int(1) => Ok(true),
            Data::Float(value) if *value == 0.0 => Ok(false),
            Data::Float(value) if *value == 1.0 => Ok(true),
            Data::String(value) => {
                parse_flag_text(value).ok_or_else(|| self.invalid(column, cell))
            }
            _ => Err(self.invalid(column, cell)),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// Spreadsheets store identifiers and phone numbers as floats; `1001.0` must
// come back as `1001`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn parse_date_text(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_TIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|date_time| date_time.date())
        })
}

fn parse_flag_text(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "n" | "no" | "false" => Some(false),
        "1" | "x" | "y" | "yes" | "true" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        format_number, parse_date_text, parse_flag_text, parse_rows, parse_rows_at,
        SnapshotError, REQUIRED_COLUMNS,
    };
    use crate::model::member::MemberRecord;
    use calamine::{Data, ExcelDateTime, ExcelDateTimeType};
    use chrono::NaiveDate;

    fn header() -> Vec<Data> {
        REQUIRED_COLUMNS
            .iter()
            .map(|column| Data::String((*column).to_string()))
            .collect()
    }

    fn row(values: &[(&str, Data)]) -> Vec<Data> {
        let mut cells = vec![Data::Empty; REQUIRED_COLUMNS.len()];
        for (column, value) in values {
            let index = REQUIRED_COLUMNS
                .iter()
                .position(|candidate| candidate == column)
                .expect("column should be part of the contract");
            cells[index] = value.clone();
        }
        cells
    }

    fn parse(rows: &[Vec<Data>]) -> Result<Vec<MemberRecord>, SnapshotError> {
        parse_rows(rows.iter().map(Vec::as_slice))
    }

    #[test]
    fn parses_typed_cells_and_trims_text() {
        let rows = vec![
            header(),
            row(&[
                ("GAN", Data::Float(1001.0)),
                ("First Name", Data::String(" Jane Q ".to_string())),
                ("Join Date", Data::String("2021-11-01".to_string())),
                ("Terminate Date", Data::String("12/15/2021".to_string())),
                ("Membership Years", Data::Int(3)),
                ("Phone", Data::Float(5551234567.0)),
                ("Email Opt Out", Data::String("Yes".to_string())),
            ]),
        ];

        let records = parse(&rows).expect("rows should parse");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.member_number, "1001");
        assert_eq!(record.first_name.as_deref(), Some("Jane Q"));
        assert_eq!(record.join_date, NaiveDate::from_ymd_opt(2021, 11, 1));
        assert_eq!(record.terminated_date, NaiveDate::from_ymd_opt(2021, 12, 15));
        assert_eq!(record.membership_years, Some(3.0));
        assert_eq!(record.phone.as_deref(), Some("5551234567"));
        assert!(record.email_opt_out);
        assert_eq!(record.email, None);
    }

    #[test]
    fn header_order_is_free_and_extra_columns_are_ignored() {
        let mut header = header();
        header.reverse();
        header.push(Data::String("Notes".to_string()));
        let mut data = vec![Data::Empty; header.len()];
        let gan_index = header
            .iter()
            .position(|cell| cell == &Data::String("GAN".to_string()))
            .expect("GAN header present");
        data[gan_index] = Data::String("77".to_string());
        data[header.len() - 1] = Data::String("ignored".to_string());

        let records = parse(&[header, data]).expect("rows should parse");
        assert_eq!(records[0].member_number, "77");
    }

    #[test]
    fn missing_columns_are_reported_together() {
        let header: Vec<Data> = header()
            .into_iter()
            .filter(|cell| {
                cell != &Data::String("Email".to_string())
                    && cell != &Data::String("Join Date".to_string())
            })
            .collect();

        let err = parse(&[header]).expect_err("schema drift must fail");
        match err {
            SnapshotError::MissingColumns(columns) => {
                assert_eq!(columns, vec!["Join Date", "Email"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn blank_rows_are_skipped_but_missing_numbers_fail() {
        let rows = vec![
            header(),
            row(&[]),
            row(&[("GAN", Data::String("5".to_string()))]),
            row(&[("First Name", Data::String("Nobody".to_string()))]),
        ];

        let err = parse(&rows).expect_err("row without GAN must fail");
        assert!(matches!(err, SnapshotError::MissingMemberNumber { row: 4 }));
    }

    #[test]
    fn duplicate_member_numbers_fail_with_both_rows() {
        let rows = vec![
            header(),
            row(&[("GAN", Data::Int(9))]),
            row(&[("GAN", Data::String("9".to_string()))]),
        ];

        let err = parse(&rows).expect_err("duplicates must fail");
        assert!(matches!(
            err,
            SnapshotError::DuplicateMemberNumber { first_row: 2, row: 3, .. }
        ));
    }

    #[test]
    fn invalid_date_names_row_and_column() {
        let rows = vec![
            header(),
            row(&[
                ("GAN", Data::Int(1)),
                ("Join Date", Data::String("sometime".to_string())),
            ]),
        ];

        let err = parse(&rows).expect_err("bad date must fail");
        match err {
            SnapshotError::InvalidValue { row, column, value } => {
                assert_eq!(row, 2);
                assert_eq!(column, "Join Date");
                assert_eq!(value, "sometime");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn native_date_cells_are_accepted() {
        let rows = vec![
            header(),
            row(&[
                ("GAN", Data::Int(1)),
                (
                    "Join Date",
                    Data::DateTime(ExcelDateTime::new(
                        44501.0,
                        ExcelDateTimeType::DateTime,
                        false,
                    )),
                ),
                (
                    "Terminate Date",
                    Data::DateTimeIso("2021-11-30T00:00:00".to_string()),
                ),
            ]),
        ];

        let records = parse(&rows).expect("native dates should parse");
        assert_eq!(records[0].join_date, NaiveDate::from_ymd_opt(2021, 11, 1));
        assert_eq!(
            records[0].terminated_date,
            NaiveDate::from_ymd_opt(2021, 11, 30)
        );
    }

    #[test]
    fn row_numbers_follow_the_header_position() {
        let rows = vec![
            header(),
            row(&[("GAN", Data::Int(1))]),
            row(&[("First Name", Data::String("Nobody".to_string()))]),
        ];

        let err = parse_rows_at(3, rows.iter().map(Vec::as_slice))
            .expect_err("row without GAN must fail");
        assert!(matches!(err, SnapshotError::MissingMemberNumber { row: 5 }));
    }

    #[test]
    fn repeated_required_header_is_rejected() {
        let mut header = header();
        header.push(Data::String(" Email ".to_string()));

        let err = parse(&[header]).expect_err("two Email columns must fail");
        assert!(matches!(err, SnapshotError::DuplicateColumn("Email")));
    }

    #[test]
    fn repeated_extra_header_is_ignored() {
        let mut header = header();
        header.push(Data::String("Notes".to_string()));
        header.push(Data::String("Notes".to_string()));

        let records = parse(&[header]).expect("extra columns are free");
        assert!(records.is_empty());
    }

    #[test]
    fn empty_sheet_is_rejected() {
        let err = parse(&[]).expect_err("empty sheet must fail");
        assert!(matches!(err, SnapshotError::EmptySheet));
    }

    #[test]
    fn coercion_helpers() {
        assert_eq!(format_number(1001.0), "1001");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(
            parse_date_text("2021-10-30 00:00:00"),
            NaiveDate::from_ymd_opt(2021, 10, 30)
        );
        assert_eq!(parse_flag_text(" N "), Some(false));
        assert_eq!(parse_flag_text("x"), Some(true));
        assert_eq!(parse_flag_text("maybe"), None);
    }
}
