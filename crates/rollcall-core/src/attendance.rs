//! Attendance decisions. Turns a recognition outcome or an excuse submission
//! into a ledger mutation, and applies teacher approvals.
//!
//! Everything here is pure: the caller reads the existing record for the
//! (person, day), asks for a decision, and applies the returned mutation to
//! its ledger inside the same mutual-exclusion scope.
//!
//! ```text
//! NoRecordToday ──recognized──▶ Present
//!       │
//!       └──excuse──▶ Pending ──approved──▶ Present
//!                       │
//!                       └────rejected──▶ Absent
//! ```

use crate::types::{MatchResult, PersonId};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Pending,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "pending" => Ok(AttendanceStatus::Pending),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// Teacher approval state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Approval {
    None,
    Pending,
    Approved,
    Rejected,
}

impl Approval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Approval::None => "none",
            Approval::Pending => "pending",
            Approval::Approved => "approved",
            Approval::Rejected => "rejected",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Approval::Approved | Approval::Rejected)
    }
}

impl fmt::Display for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Approval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Approval::None),
            "pending" => Ok(Approval::Pending),
            "approved" => Ok(Approval::Approved),
            "rejected" => Ok(Approval::Rejected),
            other => Err(format!("unknown approval state: {other}")),
        }
    }
}

/// A teacher's verdict on a pending excuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    /// Status a record takes once this decision is applied.
    pub fn resulting_status(&self) -> AttendanceStatus {
        match self {
            ApprovalDecision::Approved => AttendanceStatus::Present,
            ApprovalDecision::Rejected => AttendanceStatus::Absent,
        }
    }

    fn approval(&self) -> Approval {
        match self {
            ApprovalDecision::Approved => Approval::Approved,
            ApprovalDecision::Rejected => Approval::Rejected,
        }
    }
}

impl FromStr for ApprovalDecision {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ApprovalDecision::Approved),
            "rejected" => Ok(ApprovalDecision::Rejected),
            other => Err(AttendanceError::InvalidApprovalStatus(other.to_string())),
        }
    }
}

/// One person's attendance for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Ledger row id; `None` until persisted.
    pub id: Option<i64>,
    pub person_id: PersonId,
    pub day: NaiveDate,
    pub status: AttendanceStatus,
    pub confidence_score: Option<f32>,
    pub approval: Approval,
    pub approver_id: Option<PersonId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub excuse_reason: Option<String>,
    pub teacher_comment: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
}

impl AttendanceRecord {
    fn blank(person_id: PersonId, day: NaiveDate, status: AttendanceStatus) -> Self {
        Self {
            id: None,
            person_id,
            day,
            status,
            confidence_score: None,
            approval: Approval::None,
            approver_id: None,
            approved_at: None,
            note: None,
            excuse_reason: None,
            teacher_comment: None,
            checked_in_at: None,
        }
    }
}

/// A text excuse for a missed (or current) day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcuseSubmission {
    pub person_id: PersonId,
    pub day: NaiveDate,
    pub reason: String,
    pub note: Option<String>,
}

/// What the state machine is asked to decide on.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceInput {
    Recognition(MatchResult),
    Excuse(ExcuseSubmission),
}

impl AttendanceInput {
    /// The (person, day) whose existing record the caller must look up, or
    /// `None` when no record is involved (an unrecognized face).
    pub fn ledger_key(&self, today: NaiveDate) -> Option<(PersonId, NaiveDate)> {
        match self {
            AttendanceInput::Recognition(result) => result.person_id().map(|p| (p, today)),
            AttendanceInput::Excuse(excuse) => Some((excuse.person_id, excuse.day)),
        }
    }
}

/// Clock readings a decision is made against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionContext {
    pub today: NaiveDate,
    pub now: DateTime<Utc>,
}

impl DecisionContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            today: now.with_timezone(&Local).date_naive(),
            now,
        }
    }

    pub fn current() -> Self {
        Self::at(Utc::now())
    }
}

/// Change the caller must apply to its ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerMutation {
    Create(AttendanceRecord),
    Update(AttendanceRecord),
}

impl LedgerMutation {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            LedgerMutation::Create(r) | LedgerMutation::Update(r) => r,
        }
    }

    pub fn into_record(self) -> AttendanceRecord {
        match self {
            LedgerMutation::Create(r) | LedgerMutation::Update(r) => r,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttendanceError {
    #[error("attendance already recorded for person {person_id} on {day}")]
    DuplicateAttendanceToday { person_id: PersonId, day: NaiveDate },
    #[error("face not recognized (confidence {best_score:.2}); check the lighting and try again")]
    NotRecognized { best_score: f32 },
    #[error("invalid approval status {0:?}: expected \"approved\" or \"rejected\"")]
    InvalidApprovalStatus(String),
    #[error("approver {approver_id} is not allowed to approve attendance of person {person_id}")]
    UnauthorizedApproval {
        approver_id: PersonId,
        person_id: PersonId,
    },
    #[error("record is not awaiting approval (approval: {0})")]
    NotPending(Approval),
    #[error("an excuse reason is required")]
    EmptyExcuseReason,
    #[error("cannot submit an excuse for {0}, which is in the future")]
    ExcuseForFutureDay(NaiveDate),
    #[error("the excuse for {day} has already been {approval}")]
    ApprovalFinalized { day: NaiveDate, approval: Approval },
}

/// Decide what a recognition outcome or excuse does to the ledger.
///
/// `existing` must be the record for [`AttendanceInput::ledger_key`], if any.
pub fn decide_attendance(
    input: &AttendanceInput,
    existing: Option<&AttendanceRecord>,
    ctx: &DecisionContext,
) -> Result<LedgerMutation, AttendanceError> {
    match input {
        AttendanceInput::Recognition(MatchResult::NoMatch { best_score }) => {
            Err(AttendanceError::NotRecognized {
                best_score: *best_score,
            })
        }
        AttendanceInput::Recognition(MatchResult::Matched {
            person_id, score, ..
        }) => {
            if existing.is_some() {
                return Err(AttendanceError::DuplicateAttendanceToday {
                    person_id: *person_id,
                    day: ctx.today,
                });
            }
            let mut record = AttendanceRecord::blank(*person_id, ctx.today, AttendanceStatus::Present);
            record.confidence_score = Some(*score);
            record.checked_in_at = Some(ctx.now);
            Ok(LedgerMutation::Create(record))
        }
        AttendanceInput::Excuse(excuse) => decide_excuse(excuse, existing, ctx),
    }
}

fn decide_excuse(
    excuse: &ExcuseSubmission,
    existing: Option<&AttendanceRecord>,
    ctx: &DecisionContext,
) -> Result<LedgerMutation, AttendanceError> {
    let reason = excuse.reason.trim();
    if reason.is_empty() {
        return Err(AttendanceError::EmptyExcuseReason);
    }
    if excuse.day > ctx.today {
        return Err(AttendanceError::ExcuseForFutureDay(excuse.day));
    }
    let note = excuse
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    match existing {
        None => {
            let mut record = AttendanceRecord::blank(excuse.person_id, excuse.day, AttendanceStatus::Pending);
            record.approval = Approval::Pending;
            record.excuse_reason = Some(reason.to_string());
            record.note = note;
            Ok(LedgerMutation::Create(record))
        }
        Some(current) if current.approval.is_final() => Err(AttendanceError::ApprovalFinalized {
            day: current.day,
            approval: current.approval,
        }),
        Some(current) => {
            // Resubmission overwrites in place; the last submission wins.
            let mut record = current.clone();
            record.status = AttendanceStatus::Pending;
            record.approval = Approval::Pending;
            record.excuse_reason = Some(reason.to_string());
            record.note = note;
            Ok(LedgerMutation::Update(record))
        }
    }
}

/// Which records an approver may decide on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApproverScope {
    /// Administrators.
    AnyGroup,
    /// A teacher responsible for one class.
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approver {
    pub id: PersonId,
    pub scope: ApproverScope,
}

impl Approver {
    pub fn may_approve(&self, subject_group: Option<&str>) -> bool {
        match (&self.scope, subject_group) {
            (ApproverScope::AnyGroup, _) => true,
            (ApproverScope::Group(own), Some(subject)) => own == subject,
            (ApproverScope::Group(_), None) => false,
        }
    }
}

/// Apply a teacher's decision to a pending record.
///
/// `status` is validated before anything else, then the approver's scope is
/// checked against the group of the record's owner.
pub fn approve(
    record: &AttendanceRecord,
    subject_group: Option<&str>,
    status: &str,
    approver: &Approver,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<LedgerMutation, AttendanceError> {
    let decision: ApprovalDecision = status.parse()?;

    if !approver.may_approve(subject_group) {
        return Err(AttendanceError::UnauthorizedApproval {
            approver_id: approver.id,
            person_id: record.person_id,
        });
    }
    if record.approval != Approval::Pending {
        return Err(AttendanceError::NotPending(record.approval));
    }

    let mut updated = record.clone();
    updated.approval = decision.approval();
    updated.status = decision.resulting_status();
    updated.approver_id = Some(approver.id);
    updated.approved_at = Some(now);
    updated.teacher_comment = comment.filter(|c| !c.trim().is_empty());

    tracing::info!(
        person_id = record.person_id,
        day = %record.day,
        approver_id = approver.id,
        approval = %updated.approval,
        status = %updated.status,
        "approval applied"
    );
    Ok(LedgerMutation::Update(updated))
}
