use crate::error::DesignResult;
use labprimer_protocol::PrimerRow;
use std::io::Write;

/// Writes rows as CSV with the user-facing column names as header.
pub fn write_csv<W: Write>(writer: W, rows: &[PrimerRow]) -> DesignResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_csv_file(path: &str, rows: &[PrimerRow]) -> DesignResult<()> {
    let file = std::fs::File::create(path)?;
    write_csv(file, rows)
}

pub fn write_json<W: Write>(writer: W, rows: &[PrimerRow]) -> DesignResult<()> {
    serde_json::to_writer_pretty(writer, rows)?;
    Ok(())
}
