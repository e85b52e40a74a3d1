//! JSON-lines persistence format: one entry per line, ordered by index.

use std::io::{BufRead, Write};

use crate::entry::LedgerEntry;
use crate::error::LedgerError;

pub fn export_jsonl<W: Write>(entries: &[LedgerEntry], mut writer: W) -> Result<(), LedgerError> {
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse an export. Performs no verification; run the result through
/// [`crate::verify_chain`] before trusting it.
pub fn import_jsonl<R: BufRead>(reader: R) -> Result<Vec<LedgerEntry>, LedgerError> {
    let mut entries = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|source| LedgerError::Parse {
            line: number + 1,
            source,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}
