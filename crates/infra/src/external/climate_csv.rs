//! Climate provider payload: `;`-separated text with a header row and a `DATE`
//! column (`20240131` or `2024-01-31`).

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};

use envwatch_ai::RawFrame;
use envwatch_ai::frame::DATE_COLUMN;

use super::UpstreamError;

/// Parse a payload into a date-sorted raw frame.
///
/// Cells are kept as text (decimal commas included); blank cells become missing
/// values and short rows are padded with missing values.
pub fn parse_climate_csv(payload: &str) -> Result<RawFrame, UpstreamError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(Trim::All)
        .from_reader(payload.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(malformed)?
        .iter()
        .map(str::to_string)
        .collect();
    if columns.iter().all(String::is_empty) {
        return Err(UpstreamError::Malformed("empty climate payload".to_string()));
    }

    let date_idx = columns
        .iter()
        .position(|c| c == DATE_COLUMN)
        .ok_or_else(|| UpstreamError::Malformed(format!("no {DATE_COLUMN} column in header")))?;

    let value_columns: Vec<&str> = columns
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_idx)
        .map(|(_, c)| c.as_str())
        .collect();
    let mut frame = RawFrame::new(value_columns.iter().copied());

    let mut record = StringRecord::new();
    while reader.read_record(&mut record).map_err(malformed)? {
        let line = record.position().map_or(0, |p| p.line());
        if record.len() > columns.len() {
            return Err(UpstreamError::Malformed(format!(
                "row {line} has {} cells, header has {}",
                record.len(),
                columns.len()
            )));
        }

        let raw_date = record.get(date_idx).unwrap_or_default();
        let date = parse_date(raw_date)
            .ok_or_else(|| UpstreamError::Malformed(format!("row {line}: bad date {raw_date:?}")))?;

        let values = (0..columns.len())
            .filter(|i| *i != date_idx)
            .map(|i| record.get(i).map(str::to_string))
            .collect();
        frame
            .push_row(date, values)
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    }

    Ok(frame.sorted_by_date())
}

fn malformed(err: csv::Error) -> UpstreamError {
    UpstreamError::Malformed(err.to_string())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if raw.as_bytes().get(4) == Some(&b'-') {
        return NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok();
    }
    NaiveDate::parse_from_str(raw.get(..8)?, "%Y%m%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = "POSTE;DATE;RR;TN;TX;TM;TAMPLI\n\
        69123002;20240102;0,4;2,1;9,8;5,9;7,7\n\
        69123002;20240101;;1,0;8,0;4,5;7,0\n\
        69123002;20240103;1,2;3,0\n";

    #[test]
    fn rows_are_parsed_and_sorted_by_date() {
        let frame = parse_climate_csv(PAYLOAD).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.dates()[0], NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(frame.column_names().collect::<Vec<_>>(), ["POSTE", "RR", "TN", "TX", "TM", "TAMPLI"]);

        let rr = frame.column("RR").unwrap();
        assert_eq!(rr[0], None);
        assert_eq!(rr[1].as_deref(), Some("0,4"));

        let tx = frame.column("TX").unwrap();
        assert_eq!(tx[2], None);
    }

    #[test]
    fn iso_dates_are_accepted() {
        let frame = parse_climate_csv("DATE;TX\n2024-02-01T00:00:00;10.5\n").unwrap();
        assert_eq!(frame.dates()[0], NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(parse_climate_csv(""), Err(UpstreamError::Malformed(_))));
        assert!(matches!(parse_climate_csv("POSTE;TX\n1;2\n"), Err(UpstreamError::Malformed(_))));
        assert!(matches!(parse_climate_csv("DATE;TX\nyesterday;2\n"), Err(UpstreamError::Malformed(_))));
        assert!(matches!(parse_climate_csv("DATE;TX\n20240101;1;2\n"), Err(UpstreamError::Malformed(_))));
    }

    #[test]
    fn quoted_cells_may_contain_the_separator() {
        let frame = parse_climate_csv("POSTE;NOM;DATE;TX\n69123002;\"LYON;BRON\";20240101;5,5\n").unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.column("NOM").unwrap()[0].as_deref(), Some("LYON;BRON"));
        assert_eq!(frame.column("TX").unwrap()[0].as_deref(), Some("5,5"));
    }

    #[test]
    fn crlf_payloads_and_quoted_headers_are_accepted() {
        let frame = parse_climate_csv("\"POSTE\";\"DATE\";\"TX\"\r\n1;20240101;3,2\r\n").unwrap();
        assert_eq!(frame.column("TX").unwrap()[0].as_deref(), Some("3,2"));
    }
}
