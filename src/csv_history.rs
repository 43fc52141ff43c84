//! Listening history from a CSV export.
//!
//! The export has no header; column 0 is the artist, column 2 the track
//! title (column 1 is the album).  Exports in the wild are a mix of UTF-8
//! and Latin-1, so the bytes are decoded as UTF-8 when valid and as Latin-1
//! otherwise.  Rows that are too short or have a blank artist/title are
//! skipped.

use log::{debug, info};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::TrackIdentifier;
use crate::services::HistorySource;

const ARTIST_COLUMN: usize = 0;
const TITLE_COLUMN: usize = 2;

/// A CSV history export on disk.
pub struct CsvHistory {
    path: PathBuf,
}

impl CsvHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvHistory { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySource for CsvHistory {
    fn name(&self) -> &str {
        "CSV export"
    }

    fn recent_tracks(&mut self) -> Result<HashSet<TrackIdentifier>> {
        let bytes = fs::read(&self.path).map_err(|err| {
            Error::Config(format!(
                "cannot read history file {}: {}",
                self.path.display(),
                err
            ))
        })?;
        let tracks = parse_history_csv(&bytes);
        info!(
            "loaded {} history entries from {}",
            tracks.len(),
            self.path.display()
        );
        Ok(tracks)
    }
}

/// Identifiers from a CSV export.
pub fn parse_history_csv(bytes: &[u8]) -> HashSet<TrackIdentifier> {
    let text = decode(bytes);
    let mut tracks = HashSet::new();
    let mut skipped = 0usize;

    for row in parse_records(&text) {
        let artist = row.get(ARTIST_COLUMN).map(|s| s.trim()).unwrap_or("");
        let title = row.get(TITLE_COLUMN).map(|s| s.trim()).unwrap_or("");
        if artist.is_empty() || title.is_empty() {
            skipped += 1;
            continue;
        }
        tracks.insert(TrackIdentifier::new(artist, title));
    }

    if skipped > 0 {
        debug!("skipped {} incomplete CSV rows", skipped);
    }
    tracks
}

/// UTF-8 if valid, Latin-1 otherwise.  A leading BOM is dropped.
fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Split CSV text into rows of fields.
///
/// Handles double-quoted fields with embedded commas, newlines and `""`
/// escapes.  A quote only opens a quoted field at the start of the field;
/// anywhere else it is literal text.  Empty lines produce no row.
fn parse_records(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if at_field_start => in_quotes = true,
            ',' => {
                row.push(std::mem::take(&mut field));
                at_field_start = true;
                continue;
            }
            '\r' => {}
            '\n' => {
                at_field_start = true;
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
                continue;
            }
            _ => field.push(c),
        }
        at_field_start = false;
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ids(tracks: &HashSet<TrackIdentifier>) -> Vec<String> {
        let mut out: Vec<_> = tracks.iter().map(|t| t.as_str().to_string()).collect();
        out.sort();
        out
    }

    #[test]
    fn test_artist_and_title_columns() {
        let tracks = parse_history_csv(b"Daft Punk,2001,One More Time\n");
        assert_eq!(ids(&tracks), vec!["Daft Punk - One More Time"]);
    }

    #[test]
    fn test_short_and_blank_rows_skipped() {
        let csv = b"Daft Punk,Discovery\n,Album,Title\nArtist,Album,  \nAir,Moon Safari,Sexy Boy\n";
        let tracks = parse_history_csv(csv);
        assert_eq!(ids(&tracks), vec!["Air - Sexy Boy"]);
    }

    #[test]
    fn test_latin1_bytes_tolerated() {
        // "Björk" in Latin-1: 0xF6 is not valid UTF-8 on its own.
        let csv = b"Bj\xF6rk,Post,Hyperballad\r\nSigur R\xF3s,(),Hoppipolla\r\n";
        let tracks = parse_history_csv(csv);
        assert_eq!(
            ids(&tracks),
            vec!["Björk - Hyperballad", "Sigur Rós - Hoppipolla"]
        );
    }

    #[test]
    fn test_utf8_with_bom() {
        let csv = "\u{FEFF}Björk,Post,Army of Me\n".as_bytes();
        assert_eq!(ids(&parse_history_csv(csv)), vec!["Björk - Army of Me"]);
    }

    #[test]
    fn test_quoted_fields() {
        let csv = b"\"Crosby, Stills & Nash\",\"CSN\",\"Suite: Judy Blue Eyes\"\n\"The \"\"Band\"\"\",x,\"Line\nBreak\"";
        let tracks = parse_history_csv(csv);
        assert_eq!(
            ids(&tracks),
            vec![
                "Crosby, Stills & Nash - Suite: Judy Blue Eyes",
                "The \"Band\" - Line\nBreak",
            ]
        );
    }

    #[test]
    fn test_quote_inside_unquoted_field_is_literal() {
        let csv = b"Artist A,Album,Song (12\" Mix)\nArtist B,Album,Other Song\nArtist C,Album,Third\n";
        let tracks = parse_history_csv(csv);
        assert_eq!(
            ids(&tracks),
            vec![
                "Artist A - Song (12\" Mix)",
                "Artist B - Other Song",
                "Artist C - Third",
            ]
        );

        let rows = parse_records("a,b\"c\"d,e\n");
        assert_eq!(rows, vec![vec!["a", "b\"c\"d", "e"]]);
    }

    #[test]
    fn test_missing_final_newline_and_blank_lines() {
        let tracks = parse_history_csv(b"\n\nA,B,C\n\nD,E,F");
        assert_eq!(ids(&tracks), vec!["A - C", "D - F"]);
    }

    #[test]
    fn test_source_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"Portishead,Dummy,Roads\n").unwrap();
        let mut source = CsvHistory::new(file.path());
        let tracks = source.recent_tracks().unwrap();
        assert_eq!(ids(&tracks), vec!["Portishead - Roads"]);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = CsvHistory::new(dir.path().join("nope.csv"));
        assert!(matches!(source.recent_tracks(), Err(Error::Config(_))));
    }
}
