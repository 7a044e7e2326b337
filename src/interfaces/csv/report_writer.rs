use crate::application::reconciliation::ReconcileOutcome;
use crate::domain::admission::Admission;
use crate::domain::payment::{FailureReason, Payment};
use crate::error::{ImportIssue, Result};
use std::io::Write;

const ADMISSION_HEADER: [&str; 7] = [
    "admission",
    "application",
    "applicant",
    "status",
    "acceptance_fee",
    "currency",
    "acceptance_deadline",
];
const PAYMENT_HEADER: [&str; 7] = [
    "reference",
    "type",
    "status",
    "amount",
    "currency",
    "paid_at",
    "failure",
];
const OUTCOME_HEADER: [&str; 3] = ["reference", "status", "detail"];
const ISSUE_HEADER: [&str; 3] = ["row", "application_number", "issue"];

/// Writes operator reports as CSV.
///
/// The header row is always written, so an empty report is still a valid file.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(sink);
        Self { writer }
    }

    pub fn write_admissions<'a>(
        &mut self,
        admissions: impl IntoIterator<Item = &'a Admission>,
    ) -> Result<()> {
        self.writer.write_record(ADMISSION_HEADER)?;
        for admission in admissions {
            self.writer.write_record([
                admission.id.to_string(),
                admission.application_id.to_string(),
                admission.applicant_id.to_string(),
                admission.status.to_string(),
                admission.acceptance_fee_amount.to_string(),
                admission.currency.to_string(),
                admission.acceptance_deadline.to_rfc3339(),
            ])?;
        }
        self.flush()
    }

    pub fn write_payments<'a>(&mut self, payments: impl IntoIterator<Item = &'a Payment>) -> Result<()> {
        self.writer.write_record(PAYMENT_HEADER)?;
        for payment in payments {
            let failure = match &payment.failure {
                None => String::new(),
                Some(FailureReason::GatewayDeclined) => "gateway_declined".to_string(),
                Some(FailureReason::AmountMismatch {
                    reported_amount,
                    reported_currency,
                }) => format!("amount_mismatch ({reported_amount} {reported_currency})"),
                Some(FailureReason::DuplicateSettlement) => "duplicate_settlement".to_string(),
            };
            self.writer.write_record([
                payment.reference.to_string(),
                payment.payment_type.to_string(),
                payment.status.to_string(),
                payment.amount.to_string(),
                payment.currency.to_string(),
                payment.paid_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                failure,
            ])?;
        }
        self.flush()
    }

    pub fn write_outcomes(&mut self, outcomes: &[ReconcileOutcome]) -> Result<()> {
        self.writer.write_record(OUTCOME_HEADER)?;
        for outcome in outcomes {
            self.writer.write_record([
                outcome.reference.as_str(),
                outcome.status.label(),
                outcome.detail.as_deref().unwrap_or_default(),
            ])?;
        }
        self.flush()
    }

    pub fn write_issues(&mut self, issues: &[ImportIssue]) -> Result<()> {
        self.writer.write_record(ISSUE_HEADER)?;
        for issue in issues {
            self.writer.write_record([
                issue.row.to_string(),
                issue.application_number.clone(),
                issue.issue.clone(),
            ])?;
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
