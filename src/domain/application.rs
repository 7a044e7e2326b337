use super::actor::Owned;
use super::ids::{ApplicationId, ApplicationNumber, ProgramId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    /// The complete transition table. Anything not listed here is illegal.
    pub fn can_transition_to(self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, next),
            (Draft, Submitted)
                | (Submitted, UnderReview)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
        )
    }

    pub fn is_editable(self) -> bool {
        self == ApplicationStatus::Draft
    }

    pub fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A prior qualification (school certificate, diploma, ...) listed by the applicant.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Qualification {
    pub institution: String,
    pub certificate: String,
    pub grade: Option<String>,
    pub year: u16,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct ApplicantProfile {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub gender: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub state_of_origin: Option<String>,
    pub address: Option<String>,
}

/// One application per applicant and admission session.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Application {
    pub id: ApplicationId,
    pub applicant_id: UserId,
    pub session: String,
    pub number: ApplicationNumber,
    pub sequence: u64,
    pub program_id: ProgramId,
    pub profile: ApplicantProfile,
    pub qualifications: Vec<Qualification>,
    pub status: ApplicationStatus,
    pub form_paid: bool,
    pub admission_fee_paid: bool,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Application {
    /// Names of mandatory fields that are still blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let profile = &self.profile;
        let mut missing = Vec::new();
        if profile.first_name.trim().is_empty() {
            missing.push("first_name");
        }
        if profile.last_name.trim().is_empty() {
            missing.push("last_name");
        }
        if profile.email.trim().is_empty() {
            missing.push("email");
        }
        if profile.phone.trim().is_empty() {
            missing.push("phone");
        }
        if profile.date_of_birth.is_none() {
            missing.push("date_of_birth");
        }
        if self.qualifications.is_empty() {
            missing.push("qualifications");
        }
        missing
    }

    pub fn full_name(&self) -> String {
        let profile = &self.profile;
        match &profile.middle_name {
            Some(middle) if !middle.trim().is_empty() => {
                format!("{} {} {}", profile.first_name, middle, profile.last_name)
            }
            _ => format!("{} {}", profile.first_name, profile.last_name),
        }
    }
}

impl Owned for Application {
    fn owner_id(&self) -> UserId {
        self.applicant_id
    }
}

/// Applicant input used to open a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApplication {
    pub applicant_id: UserId,
    pub session: String,
    pub program_id: ProgramId,
    pub profile: ApplicantProfile,
    #[serde(default)]
    pub qualifications: Vec<Qualification>,
}

impl Owned for NewApplication {
    fn owner_id(&self) -> UserId {
        self.applicant_id
    }
}

/// Partial update of a draft. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationPatch {
    pub program_id: Option<ProgramId>,
    pub profile: Option<ApplicantProfile>,
    pub qualifications: Option<Vec<Qualification>>,
}

impl ApplicationPatch {
    pub fn apply(self, application: &mut Application) {
        if let Some(program_id) = self.program_id {
            application.program_id = program_id;
        }
        if let Some(profile) = self.profile {
            application.profile = profile;
        }
        if let Some(qualifications) = self.qualifications {
            application.qualifications = qualifications;
        }
    }
}

/// Formats the number for the `sequence`-th application of `session`.
pub fn format_application_number(prefix: &str, session: &str, sequence: u64) -> ApplicationNumber {
    ApplicationNumber::new(format!("{prefix}/{session}/{sequence:06}"))
}
