use std::io::Write;
use std::path::Path;

use crate::db::Highlight;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// A highlight row to export, independent of how it was loaded.
#[derive(Debug, Clone)]
pub struct ExportHighlight {
    pub id: i32,
    pub timestamp: f64,
    pub description: String,
    pub summary: String,
}

impl From<&Highlight> for ExportHighlight {
    fn from(h: &Highlight) -> Self {
        Self {
            id: h.id,
            timestamp: h.timestamp,
            description: h.description.clone(),
            summary: h.summary.clone().unwrap_or_default(),
        }
    }
}

/// Format highlights as a console table.
pub fn format_table(video_name: &str, highlights: &[ExportHighlight]) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table.set_header(["ID", "Video", "Time", "Description", "Summary"]);

    for h in highlights {
        table.add_row([
            h.id.to_string(),
            video_name.to_string(),
            format_timestamp(h.timestamp),
            h.description.clone(),
            h.summary.clone(),
        ]);
    }

    table
}

fn write_records<W: Write>(wtr: &mut csv::Writer<W>, highlights: &[ExportHighlight]) -> Result<(), ExportError> {
    wtr.write_record(["timestamp", "description", "summary"])?;
    for h in highlights {
        wtr.write_record([&format_timestamp(h.timestamp), &h.description, &h.summary])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write highlights to a CSV file.
pub fn write_csv(path: &Path, highlights: &[ExportHighlight]) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_path(path)?;
    write_records(&mut wtr, highlights)
}

/// Write highlights as CSV to stdout.
pub fn write_csv_stdout(highlights: &[ExportHighlight]) -> Result<(), ExportError> {
    let stdout = std::io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());
    write_records(&mut wtr, highlights)
}

/// `MM:SS.ss`, minutes keep counting past the hour.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let mins = (seconds / 60.0) as u32;
    let secs = seconds % 60.0;
    format!("{mins:02}:{secs:05.2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<ExportHighlight> {
        vec![
            ExportHighlight {
                id: 1,
                timestamp: 5.5,
                description: "Someone opens the door, smiling".into(),
                summary: "Arrival.".into(),
            },
            ExportHighlight {
                id: 2,
                timestamp: 125.25,
                description: "A meeting starts".into(),
                summary: String::new(),
            },
        ]
    }

    #[test]
    fn timestamps_are_minutes_and_seconds() {
        assert_eq!(format_timestamp(0.0), "00:00.00");
        assert_eq!(format_timestamp(5.5), "00:05.50");
        assert_eq!(format_timestamp(125.25), "02:05.25");
        assert_eq!(format_timestamp(3725.0), "62:05.00");
        assert_eq!(format_timestamp(-1.0), "00:00.00");
    }

    #[test]
    fn csv_has_header_and_quoted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("highlights.csv");
        write_csv(&path, &rows()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "timestamp,description,summary");
        assert_eq!(lines[1], "00:05.50,\"Someone opens the door, smiling\",Arrival.");
        assert_eq!(lines[2], "02:05.25,A meeting starts,");
    }

    #[test]
    fn table_has_a_row_per_highlight() {
        let table = format_table("office.mp4", &rows());
        assert_eq!(table.row_iter().count(), 2);
        assert!(table.to_string().contains("office.mp4"));
    }
}
