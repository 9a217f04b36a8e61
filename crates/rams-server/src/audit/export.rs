//! Export of audit records as CSV or JSON

use chrono::{DateTime, Utc};
use csv::{QuoteStyle, WriterBuilder};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::error::AuditError;
use super::models::AuditRecord;

/// Column header of CSV exports
pub const CSV_HEADER: [&str; 10] = [
    "ID",
    "Action",
    "Level",
    "User",
    "EntityType",
    "EntityId",
    "IP",
    "UserAgent",
    "Date",
    "Details",
];

/// User column value of records without an actor
pub const SYSTEM_USER: &str = "System";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(AuditError::Validation(format!(
                "unsupported export format '{}', expected csv or json",
                other
            ))),
        }
    }
}

/// A rendered export, ready to be sent as an attachment
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub filename: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub rows: usize,
}

impl ExportFile {
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

/// Render `records` in the given format, keeping their order.
///
/// `actor_names` resolves the User column; unresolved actors fall back to
/// their id.
pub fn render(
    records: &[AuditRecord],
    actor_names: &HashMap<Uuid, String>,
    format: ExportFormat,
    generated_at: DateTime<Utc>,
) -> Result<ExportFile, AuditError> {
    let body = match format {
        ExportFormat::Csv => render_csv(records, actor_names)?,
        ExportFormat::Json => serde_json::to_vec_pretty(records)?,
    };

    Ok(ExportFile {
        filename: format!(
            "audit-logs-{}.{}",
            generated_at.format("%Y%m%d-%H%M%S"),
            format.extension()
        ),
        content_type: format.content_type(),
        body,
        rows: records.len(),
    })
}

fn render_csv(
    records: &[AuditRecord],
    actor_names: &HashMap<Uuid, String>,
) -> Result<Vec<u8>, AuditError> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(vec![]);

    wtr.write_record(CSV_HEADER)?;

    for record in records {
        let user = match record.actor_id {
            Some(id) => actor_names
                .get(&id)
                .cloned()
                .unwrap_or_else(|| id.to_string()),
            None => SYSTEM_USER.to_string(),
        };
        let details = serde_json::to_string(record.details.as_map())?;

        wtr.write_record([
            record.id.to_string(),
            record.action.to_string(),
            record.level.to_string(),
            user,
            record.entity_type.clone().unwrap_or_default(),
            record.entity_id.clone().unwrap_or_default(),
            record.metadata.ip.clone().unwrap_or_default(),
            record.metadata.user_agent.clone().unwrap_or_default(),
            record.created_at.to_rfc3339(),
            details,
        ])?;
    }

    wtr.into_inner()
        .map_err(|e| AuditError::Export(format!("CSV writer error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::models::{AuditLevel, RecordMetadata};
    use chrono::Duration;

    fn record(action: &str, actor: Option<Uuid>, offset_secs: i64) -> AuditRecord {
        let mut metadata = RecordMetadata::new("http");
        metadata.ip = Some("10.0.0.1".to_string());
        metadata.user_agent = Some("Mozilla/5.0 (X11; \"quoted\")".to_string());
        AuditRecord::builder(action)
            .level(AuditLevel::Warning)
            .actor_id(actor)
            .entity("projects", Some("p-1".to_string()))
            .detail("note", "a, \"b\"\nc")
            .metadata(metadata)
            .created_at(Utc::now() - Duration::seconds(offset_secs))
            .build()
            .unwrap()
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(AuditError::Validation(_))
        ));
    }

    #[test]
    fn test_csv_header_only_when_empty() {
        let file = render(&[], &HashMap::new(), ExportFormat::Csv, Utc::now()).unwrap();
        let text = String::from_utf8(file.body).unwrap();
        assert_eq!(
            text.trim_end(),
            r#""ID","Action","Level","User","EntityType","EntityId","IP","UserAgent","Date","Details""#
        );
        assert_eq!(file.rows, 0);
    }

    #[test]
    fn test_csv_round_trip_preserves_order_and_fields() {
        let named = Uuid::new_v4();
        let unnamed = Uuid::new_v4();
        let records = vec![
            record("GRANT_AWARDED", Some(named), 0),
            record("PROPOSAL_SUBMITTED", Some(unnamed), 10),
            record("REPORT_DUE", None, 20),
        ];
        let names = HashMap::from([(named, "Dr. Ada Byron".to_string())]);

        let file = render(&records, &names, ExportFormat::Csv, Utc::now()).unwrap();
        assert!(file.filename.ends_with(".csv"));

        let mut reader = csv::Reader::from_reader(file.body.as_slice());
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, CSV_HEADER);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        for (row, record) in rows.iter().zip(&records) {
            assert_eq!(&row[0], record.id.to_string());
            assert_eq!(&row[1], record.action.as_str());
            assert_eq!(&row[2], "WARNING");
            assert_eq!(&row[7], "Mozilla/5.0 (X11; \"quoted\")");
            let details: serde_json::Value = serde_json::from_str(&row[9]).unwrap();
            assert_eq!(details["note"], "a, \"b\"\nc");
        }
        assert_eq!(&rows[0][3], "Dr. Ada Byron");
        assert_eq!(&rows[1][3], unnamed.to_string());
        assert_eq!(&rows[2][3], SYSTEM_USER);
    }

    #[test]
    fn test_json_export() {
        let records = vec![record("PROJECT_ARCHIVED", None, 0)];
        let file = render(&records, &HashMap::new(), ExportFormat::Json, Utc::now()).unwrap();
        assert_eq!(file.content_type, "application/json");

        let parsed: Vec<AuditRecord> = serde_json::from_slice(&file.body).unwrap();
        assert_eq!(parsed, records);
    }
}
