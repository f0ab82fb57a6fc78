//! Attendance ledger.

use crate::{group_of, Store, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{
    approve, decide_attendance, AttendanceError, AttendanceInput, AttendanceRecord,
    AttendanceStatus, Approver, DecisionContext, LedgerMutation, PersonId,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;

const RECORD_COLUMNS: &str = "id, person_id, day, status, confidence_score, approval, approver_id, \
     approved_at, note, excuse_reason, teacher_comment, checked_in_at";

/// Attendance counts for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    pub day: NaiveDate,
    pub present: u32,
    pub pending: u32,
    pub absent: u32,
    /// Rostered people with no record at all for the day.
    pub unrecorded: u32,
}

impl Store {
    /// Read the record for (person, day), let `decide` turn it into a
    /// mutation, and apply that mutation, all under the database write lock.
    pub fn transact_day<F>(
        &mut self,
        person_id: PersonId,
        day: NaiveDate,
        decide: F,
    ) -> Result<AttendanceRecord, StoreError>
    where
        F: FnOnce(Option<&AttendanceRecord>) -> Result<LedgerMutation, AttendanceError>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = find_day(&tx, person_id, day)?;
        let mutation = decide(existing.as_ref())?;
        let record = apply(&tx, mutation)?;
        tx.commit()?;
        Ok(record)
    }

    /// Run the attendance state machine for a recognition outcome or excuse
    /// and persist the result.
    pub fn record_attendance(
        &mut self,
        input: &AttendanceInput,
        ctx: &DecisionContext,
    ) -> Result<AttendanceRecord, StoreError> {
        let (person_id, day) = match input.ledger_key(ctx.today) {
            Some(key) => key,
            None => {
                let record = decide_attendance(input, None, ctx)?.into_record();
                (record.person_id, record.day)
            }
        };
        self.transact_day(person_id, day, |existing| {
            decide_attendance(input, existing, ctx)
        })
    }

    /// Apply a teacher's approval decision to record `record_id`.
    pub fn approve_record(
        &mut self,
        record_id: i64,
        status: &str,
        approver: &Approver,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let record = find_id(&tx, record_id)?.ok_or(StoreError::RecordNotFound(record_id))?;
        let group = group_of(&tx, record.person_id)?;
        let mutation = approve(&record, group.as_deref(), status, approver, comment, now)?;
        let updated = apply(&tx, mutation)?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn record(&self, id: i64) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(find_id(&self.conn, id)?)
    }

    /// Records for one person with `from <= day <= to`, oldest first.
    pub fn records_for_person(
        &self,
        person_id: PersonId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance
             WHERE person_id = ?1 AND day BETWEEN ?2 AND ?3 ORDER BY day"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![person_id, from, to], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Records for everyone in `group` with `from <= day <= to`, ordered by
    /// day then person.
    pub fn records_for_group(
        &self,
        group: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let columns = RECORD_COLUMNS
            .split(", ")
            .map(|c| format!("a.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns} FROM attendance a
             JOIN roster r ON r.person_id = a.person_id
             WHERE r.group_name = ?1 AND a.day BETWEEN ?2 AND ?3
             ORDER BY a.day, a.person_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![group, from, to], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn day_summary(&self, day: NaiveDate) -> Result<DaySummary, StoreError> {
        let mut summary = DaySummary {
            day,
            present: 0,
            pending: 0,
            absent: 0,
            unrecorded: 0,
        };

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM attendance WHERE day = ?1 GROUP BY status")?;
        let mut rows = stmt.query([day])?;
        while let Some(row) = rows.next()? {
            let status = parse_column::<AttendanceStatus>(row, 0)?;
            let count: u32 = row.get(1)?;
            match status {
                AttendanceStatus::Present => summary.present = count,
                AttendanceStatus::Pending => summary.pending = count,
                AttendanceStatus::Absent => summary.absent = count,
            }
        }

        summary.unrecorded = self.conn.query_row(
            "SELECT COUNT(*) FROM roster r
             WHERE NOT EXISTS (SELECT 1 FROM attendance a WHERE a.person_id = r.person_id AND a.day = ?1)",
            [day],
            |row| row.get(0),
        )?;
        Ok(summary)
    }
}

fn find_day(
    conn: &Connection,
    person_id: PersonId,
    day: NaiveDate,
) -> rusqlite::Result<Option<AttendanceRecord>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM attendance WHERE person_id = ?1 AND day = ?2");
    conn.query_row(&sql, params![person_id, day], record_from_row)
        .optional()
}

fn find_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<AttendanceRecord>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM attendance WHERE id = ?1");
    conn.query_row(&sql, [id], record_from_row).optional()
}

fn apply(conn: &Connection, mutation: LedgerMutation) -> Result<AttendanceRecord, StoreError> {
    match mutation {
        LedgerMutation::Create(mut record) => {
            let inserted = conn.execute(
                "INSERT INTO attendance (person_id, day, status, confidence_score, approval, approver_id,
                     approved_at, note, excuse_reason, teacher_comment, checked_in_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.person_id,
                    record.day,
                    record.status.as_str(),
                    record.confidence_score.map(f64::from),
                    record.approval.as_str(),
                    record.approver_id,
                    record.approved_at,
                    record.note,
                    record.excuse_reason,
                    record.teacher_comment,
                    record.checked_in_at,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    return Err(AttendanceError::DuplicateAttendanceToday {
                        person_id: record.person_id,
                        day: record.day,
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            }
            record.id = Some(conn.last_insert_rowid());
            tracing::info!(
                id = record.id,
                person_id = record.person_id,
                day = %record.day,
                status = %record.status,
                "attendance record created"
            );
            Ok(record)
        }
        LedgerMutation::Update(record) => {
            let id = record.id.ok_or(StoreError::RecordNotFound(0))?;
            let updated = conn.execute(
                "UPDATE attendance SET status = ?2, confidence_score = ?3, approval = ?4, approver_id = ?5,
                     approved_at = ?6, note = ?7, excuse_reason = ?8, teacher_comment = ?9, checked_in_at = ?10
                 WHERE id = ?1",
                params![
                    id,
                    record.status.as_str(),
                    record.confidence_score.map(f64::from),
                    record.approval.as_str(),
                    record.approver_id,
                    record.approved_at,
                    record.note,
                    record.excuse_reason,
                    record.teacher_comment,
                    record.checked_in_at,
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::RecordNotFound(id));
            }
            tracing::info!(
                id,
                person_id = record.person_id,
                day = %record.day,
                status = %record.status,
                approval = %record.approval,
                "attendance record updated"
            );
            Ok(record)
        }
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: Some(row.get(0)?),
        person_id: row.get(1)?,
        day: row.get(2)?,
        status: parse_column(row, 3)?,
        confidence_score: row.get::<_, Option<f64>>(4)?.map(|s| s as f32),
        approval: parse_column(row, 5)?,
        approver_id: row.get(6)?,
        approved_at: row.get(7)?,
        note: row.get(8)?,
        excuse_reason: row.get(9)?,
        teacher_comment: row.get(10)?,
        checked_in_at: row.get(11)?,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
