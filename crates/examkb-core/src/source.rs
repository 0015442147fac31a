use std::io::Read;
use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::ingest::RowRejection;
use crate::schema::SourceRow;

/// One data record of a source file: a decoded row, or the reason it could not be decoded.
pub type SourceRecord = std::result::Result<SourceRow, RowRejection>;

/// Read a headered CSV file into ordered records.
pub fn load_csv_rows(path: &Path) -> Result<Vec<SourceRecord>> {
    let file = std::fs::File::open(path)?;
    read_csv_rows(file).map_err(|e| match e {
        Error::InvalidRequest(msg) => Error::InvalidRequest(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Records are returned in file order, indexed from 0 after the header. A UTF-8
/// BOM on the first header is stripped. A record that cannot be decoded becomes
/// a rejection in place; only an unreadable header or an I/O failure aborts.
pub fn read_csv_rows<R: Read>(reader: R) -> Result<Vec<SourceRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(|e| Error::InvalidRequest(format!("unreadable CSV header: {e}")))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let mut records = Vec::new();
    for (row, record) in csv_reader.byte_records().enumerate() {
        let decoded = match record {
            Ok(record) => decode_record(&headers, &record).map_err(|reason| RowRejection { row, reason }),
            Err(e) if e.is_io_error() => return Err(Error::InvalidRequest(format!("unreadable CSV record: {e}"))),
            Err(e) => Err(RowRejection { row, reason: format!("unreadable CSV record: {e}") }),
        };
        if let Err(rejection) = &decoded {
            warn!(row, reason = %rejection.reason, "undecodable source record");
        }
        records.push(decoded);
    }
    Ok(records)
}

// Short records leave trailing columns absent so schema validation can reject the row.
fn decode_record(headers: &[String], record: &csv::ByteRecord) -> std::result::Result<SourceRow, String> {
    headers
        .iter()
        .zip(record.iter())
        .map(|(header, field)| match std::str::from_utf8(field) {
            Ok(value) => Ok((header.clone(), value.to_string())),
            Err(e) => Err(format!("column '{header}' is not valid UTF-8: {e}")),
        })
        .collect()
}
