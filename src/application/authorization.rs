//! The single authorization decision point consulted before any mutation.
//!
//! `decide` is pure: it looks only at the actor's permission snapshot, the action and the
//! owner of the target entity. Resolving permissions happens before the engines run.

use crate::domain::actor::{Actor, Owned};
use crate::error::{AdmissionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission names understood by the gate.
pub mod permissions {
    pub const APPLICATION_MANAGE: &str = "application.manage";
    pub const APPLICATION_REVIEW: &str = "application.review";
    pub const APPLICATION_APPROVE: &str = "application.approve";
    pub const ADMISSION_UPLOAD: &str = "admission.upload";
    pub const PAYMENT_VERIFY: &str = "payment.verify";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    ApplicationCreate,
    ApplicationUpdate,
    ApplicationSubmit,
    ApplicationReview,
    ApplicationDecide,
    AdmissionAccept,
    AdmissionDecline,
    AdmissionImport,
    PaymentInitialize,
    PaymentVerify,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::ApplicationCreate => "Application.create",
            Action::ApplicationUpdate => "Application.update",
            Action::ApplicationSubmit => "Application.submit",
            Action::ApplicationReview => "Application.review",
            Action::ApplicationDecide => "Application.decide",
            Action::AdmissionAccept => "Admission.accept",
            Action::AdmissionDecline => "Admission.decline",
            Action::AdmissionImport => "Admission.import",
            Action::PaymentInitialize => "Payment.initialize",
            Action::PaymentVerify => "Payment.verify",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    Owner,
    AnyPermission(&'static [&'static str]),
    OwnerOrPermission(&'static [&'static str]),
}

fn requirement(action: Action) -> Requirement {
    use permissions::*;
    match action {
        Action::ApplicationCreate | Action::ApplicationUpdate => {
            Requirement::OwnerOrPermission(&[APPLICATION_MANAGE])
        }
        Action::ApplicationSubmit
        | Action::AdmissionAccept
        | Action::AdmissionDecline
        | Action::PaymentInitialize => Requirement::Owner,
        Action::ApplicationReview => {
            Requirement::AnyPermission(&[APPLICATION_REVIEW, APPLICATION_APPROVE])
        }
        Action::ApplicationDecide => Requirement::AnyPermission(&[APPLICATION_APPROVE]),
        Action::AdmissionImport => Requirement::AnyPermission(&[ADMISSION_UPLOAD]),
        Action::PaymentVerify => Requirement::OwnerOrPermission(&[PAYMENT_VERIFY]),
    }
}

pub fn decide<E: Owned + ?Sized>(actor: &Actor, action: Action, entity: &E) -> Decision {
    let is_owner = || actor.id == entity.owner_id();
    let allowed = match requirement(action) {
        Requirement::Owner => is_owner(),
        Requirement::AnyPermission(names) => actor.permissions().contains_any(names),
        Requirement::OwnerOrPermission(names) => {
            is_owner() || actor.permissions().contains_any(names)
        }
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// `decide`, with `Deny` surfaced as `Unauthorized`.
pub fn authorize<E: Owned + ?Sized>(actor: &Actor, action: Action, entity: &E) -> Result<()> {
    match decide(actor, action, entity) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            tracing::warn!(actor = %actor.id, action = %action, "authorization denied");
            Err(AdmissionError::Unauthorized {
                actor: actor.id,
                action,
            })
        }
    }
}
