use crate::domain::admission::OfferImportRow;
use crate::domain::ids::ApplicationNumber;
use crate::error::{AdmissionError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct RawOffer {
    application_number: String,
    #[serde(default)]
    acceptance_deadline: Option<String>,
}

/// Reads an offer upload: `application_number[,acceptance_deadline]`.
///
/// Deadlines are RFC 3339 timestamps or plain dates; a plain date means the end of that
/// day in UTC. Whitespace is trimmed and the deadline column may be left out entirely.
pub struct OfferReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OfferReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one row per data line.
    pub fn offers(self) -> impl Iterator<Item = Result<OfferImportRow>> {
        self.reader
            .into_deserialize::<RawOffer>()
            .enumerate()
            .map(|(index, result)| {
                let raw = result.map_err(AdmissionError::from)?;
                parse_row(index + 1, raw)
            })
    }
}

fn parse_row(row: usize, raw: RawOffer) -> Result<OfferImportRow> {
    if raw.application_number.is_empty() {
        return Err(AdmissionError::ValidationError(format!(
            "row {row}: application_number is empty"
        )));
    }
    let acceptance_deadline = match raw.acceptance_deadline.as_deref() {
        None | Some("") => None,
        Some(value) => Some(parse_deadline(value).ok_or_else(|| {
            AdmissionError::ValidationError(format!(
                "row {row}: invalid acceptance_deadline '{value}'"
            ))
        })?),
    };
    Ok(OfferImportRow {
        application_number: ApplicationNumber::new(raw.application_number),
        acceptance_deadline,
    })
}

fn parse_deadline(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
}
