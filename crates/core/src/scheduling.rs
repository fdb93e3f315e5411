//! Appointment booking and the double-booking guard.
//!
//! A doctor and a patient may each hold at most one non-cancelled appointment over any instant.
//! Intervals are half-open (`[start, end)`), so an appointment ending at 10:30 and one starting at
//! 10:30 do not clash.

use crate::constants::DEFAULT_APPOINTMENT_MINUTES;
use crate::db::{ts_col, ts_to_sql, Database};
use crate::status::{ensure_transition, AppointmentStatus};
use crate::{HmsError, HmsResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use hms_types::NonEmptyText;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub clinic_id: i64,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub reason: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// A booking request.
#[derive(Clone, Debug, Deserialize)]
pub struct NewAppointment {
    pub patient_id: i64,
    pub doctor_id: i64,
    pub clinic_id: i64,
    pub start_time: DateTime<Utc>,
    /// Defaults to [`DEFAULT_APPOINTMENT_MINUTES`].
    pub duration_minutes: Option<u32>,
    pub reason: NonEmptyText,
    #[serde(default)]
    pub notes: String,
}

/// Fields a reschedule may change. `None` keeps the current value.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AppointmentChanges {
    pub doctor_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub reason: Option<NonEmptyText>,
    pub notes: Option<String>,
}

/// The window a booking would occupy, as checked by [`SchedulingGuard`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub doctor_id: i64,
    pub patient_id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    pub fn new(
        doctor_id: i64,
        patient_id: i64,
        start: DateTime<Utc>,
        duration_minutes: u32,
    ) -> HmsResult<Self> {
        if duration_minutes == 0 {
            return Err(HmsError::Validation(
                "duration must be at least one minute".into(),
            ));
        }
        Ok(Self {
            doctor_id,
            patient_id,
            start,
            end: start + Duration::minutes(i64::from(duration_minutes)),
        })
    }
}

/// Stateless overlap check against stored appointments.
pub struct SchedulingGuard;

impl SchedulingGuard {
    /// Fail with [`HmsError::Conflict`] if the doctor or the patient already has a non-cancelled
    /// appointment overlapping `slot`.
    ///
    /// `exclude_id` skips the appointment being rescheduled.
    pub fn validate(conn: &Connection, slot: &Slot, exclude_id: Option<i64>) -> HmsResult<()> {
        if let Some(clash) = Self::first_overlap(conn, "doctor_id", slot.doctor_id, slot, exclude_id)? {
            tracing::debug!(doctor_id = slot.doctor_id, clash, "doctor slot taken");
            return Err(HmsError::Conflict(format!(
                "doctor {} already has appointment {} in this time slot",
                slot.doctor_id, clash
            )));
        }
        if let Some(clash) =
            Self::first_overlap(conn, "patient_id", slot.patient_id, slot, exclude_id)?
        {
            tracing::debug!(patient_id = slot.patient_id, clash, "patient slot taken");
            return Err(HmsError::Conflict(format!(
                "patient {} already has appointment {} in this time slot",
                slot.patient_id, clash
            )));
        }
        Ok(())
    }

    fn first_overlap(
        conn: &Connection,
        party_column: &'static str,
        party_id: i64,
        slot: &Slot,
        exclude_id: Option<i64>,
    ) -> HmsResult<Option<i64>> {
        // Only rows starting before the candidate ends can overlap; the end comparison needs the
        // duration and is done here.
        let sql = format!(
            "SELECT id, start_time, duration_minutes FROM appointments
             WHERE {party_column} = ?1 AND status != ?2 AND start_time < ?3 AND id != ?4
             ORDER BY start_time"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                party_id,
                AppointmentStatus::Cancelled,
                ts_to_sql(slot.end),
                exclude_id.unwrap_or(-1),
            ],
            |row| {
                let id: i64 = row.get(0)?;
                let start = ts_col(row, 1)?;
                let minutes: u32 = row.get(2)?;
                Ok((id, start + Duration::minutes(i64::from(minutes))))
            },
        )?;

        for row in rows {
            let (id, end) = row?;
            if end > slot.start {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }
}

/// Appointment operations. Every write re-runs the guard inside the same transaction.
#[derive(Clone, Debug)]
pub struct AppointmentService {
    db: Arc<Database>,
}

impl AppointmentService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Book a new appointment in `scheduled` state.
    ///
    /// # Errors
    ///
    /// - [`HmsError::Validation`] for a zero duration.
    /// - [`HmsError::Conflict`] when the doctor or patient is already booked.
    pub fn book(&self, new: NewAppointment, now: DateTime<Utc>) -> HmsResult<Appointment> {
        let duration = new.duration_minutes.unwrap_or(DEFAULT_APPOINTMENT_MINUTES);
        let slot = Slot::new(new.doctor_id, new.patient_id, new.start_time, duration)?;

        self.db.write(|tx| {
            SchedulingGuard::validate(tx, &slot, None)?;
            tx.execute(
                "INSERT INTO appointments (patient_id, doctor_id, clinic_id, start_time,
                     duration_minutes, status, reason, notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    new.patient_id,
                    new.doctor_id,
                    new.clinic_id,
                    ts_to_sql(new.start_time),
                    duration,
                    AppointmentStatus::Scheduled,
                    new.reason.as_str(),
                    new.notes,
                    ts_to_sql(now),
                ],
            )?;
            let id = tx.last_insert_rowid();
            tracing::info!(id, doctor_id = new.doctor_id, "appointment booked");
            load(tx, id)
        })
    }

    /// Change the time, doctor or details of an existing appointment.
    pub fn reschedule(
        &self,
        id: i64,
        changes: AppointmentChanges,
        now: DateTime<Utc>,
    ) -> HmsResult<Appointment> {
        self.db.write(|tx| {
            let mut current = load(tx, id)?;
            if !current.status.blocks_slot() {
                return Err(HmsError::Validation(
                    "a cancelled appointment cannot be rescheduled".into(),
                ));
            }

            if let Some(doctor_id) = changes.doctor_id {
                current.doctor_id = doctor_id;
            }
            if let Some(start) = changes.start_time {
                current.start_time = start;
            }
            if let Some(minutes) = changes.duration_minutes {
                current.duration_minutes = minutes;
            }
            if let Some(reason) = changes.reason {
                current.reason = reason.into_inner();
            }
            if let Some(notes) = changes.notes {
                current.notes = notes;
            }

            let slot = Slot::new(
                current.doctor_id,
                current.patient_id,
                current.start_time,
                current.duration_minutes,
            )?;
            SchedulingGuard::validate(tx, &slot, Some(id))?;

            tx.execute(
                "UPDATE appointments SET doctor_id = ?1, start_time = ?2, duration_minutes = ?3,
                     reason = ?4, notes = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    current.doctor_id,
                    ts_to_sql(current.start_time),
                    current.duration_minutes,
                    current.reason,
                    current.notes,
                    ts_to_sql(now),
                    id,
                ],
            )?;
            load(tx, id)
        })
    }

    /// Move an appointment along its lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`HmsError::InvalidTransition`] for moves outside the appointment transition
    /// table (for example out of `completed`).
    pub fn transition_status(
        &self,
        id: i64,
        next: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> HmsResult<Appointment> {
        self.db.write(|tx| {
            let current = load(tx, id)?;
            ensure_transition(
                "appointment",
                current.status,
                next,
                current.status.can_transition_to(next),
            )?;
            tx.execute(
                "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![next, ts_to_sql(now), id],
            )?;
            load(tx, id)
        })
    }

    pub fn get(&self, id: i64) -> HmsResult<Appointment> {
        self.db.read(|conn| load(conn, id))
    }

    /// A doctor's appointments starting on `day` (UTC), in start order.
    pub fn list_for_doctor_on(&self, doctor_id: i64, day: NaiveDate) -> HmsResult<Vec<Appointment>> {
        let from = day.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        let to = day
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());
        let (Some(from), Some(to)) = (from, to) else {
            return Err(HmsError::Validation(format!("date out of range: {day}")));
        };

        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_APPOINTMENT} WHERE doctor_id = ?1 AND start_time >= ?2 AND start_time < ?3
                 ORDER BY start_time"
            ))?;
            let rows = stmt.query_map(
                params![doctor_id, ts_to_sql(from), ts_to_sql(to)],
                map_appointment,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn delete(&self, id: i64) -> HmsResult<()> {
        self.db.write(|tx| {
            let removed = tx.execute("DELETE FROM appointments WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(HmsError::not_found("appointment", id));
            }
            Ok(())
        })
    }
}

const SELECT_APPOINTMENT: &str = "SELECT id, patient_id, doctor_id, clinic_id, start_time,
    duration_minutes, status, reason, notes, created_at, updated_at FROM appointments";

fn map_appointment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        doctor_id: row.get(2)?,
        clinic_id: row.get(3)?,
        start_time: ts_col(row, 4)?,
        duration_minutes: row.get(5)?,
        status: row.get(6)?,
        reason: row.get(7)?,
        notes: row.get(8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

fn load(conn: &Connection, id: i64) -> HmsResult<Appointment> {
    conn.query_row(
        &format!("{SELECT_APPOINTMENT} WHERE id = ?1"),
        params![id],
        map_appointment,
    )
    .optional()?
    .ok_or_else(|| HmsError::not_found("appointment", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::{seed, Seed};
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, minute, 0).unwrap()
    }

    fn setup() -> (AppointmentService, Seed) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let seed = seed(&db);
        (AppointmentService::new(db), seed)
    }

    fn request(doctor_id: i64, patient_id: i64, clinic_id: i64, start: DateTime<Utc>) -> NewAppointment {
        NewAppointment {
            patient_id,
            doctor_id,
            clinic_id,
            start_time: start,
            duration_minutes: None,
            reason: NonEmptyText::new("Follow-up").unwrap(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_overlapping_slot_is_rejected_and_boundary_accepted() {
        let (service, s) = setup();
        service
            .book(request(s.doctor_id, s.patient_id, s.clinic_id, at(10, 0)), at(8, 0))
            .expect("first booking should succeed");

        let err = service
            .book(request(s.doctor_id, s.other_patient_id, s.clinic_id, at(10, 15)), at(8, 0))
            .expect_err("10:15 should clash with 10:00-10:30");
        assert!(matches!(err, HmsError::Conflict(_)));
        assert!(err.is_business_rule());

        let accepted = service
            .book(request(s.doctor_id, s.other_patient_id, s.clinic_id, at(10, 30)), at(8, 0))
            .expect("back-to-back booking should succeed");
        assert_eq!(accepted.end_time(), at(11, 0));
    }

    #[test]
    fn test_enclosing_appointment_is_a_conflict() {
        let (service, s) = setup();
        let mut long = request(s.doctor_id, s.other_patient_id, s.clinic_id, at(10, 0));
        long.duration_minutes = Some(120);
        service.book(long, at(8, 0)).expect("long booking should succeed");

        // 10:30-11:00 sits entirely inside the existing 10:00-12:00 appointment.
        let err = service
            .book(request(s.other_doctor_id, s.other_patient_id, s.clinic_id, at(10, 30)), at(8, 0))
            .expect_err("patient already booked 10:00-12:00");
        assert!(matches!(err, HmsError::Conflict(msg) if msg.contains("patient")));
    }

    #[test]
    fn test_cancelled_appointments_free_the_slot() {
        let (service, s) = setup();
        let first = service
            .book(request(s.doctor_id, s.patient_id, s.clinic_id, at(10, 0)), at(8, 0))
            .unwrap();
        service
            .transition_status(first.id, AppointmentStatus::Cancelled, at(8, 5))
            .expect("cancel should succeed");

        service
            .book(request(s.doctor_id, s.other_patient_id, s.clinic_id, at(10, 0)), at(8, 10))
            .expect("slot should be free after cancellation");
    }

    #[test]
    fn test_reschedule_excludes_itself() {
        let (service, s) = setup();
        let booked = service
            .book(request(s.doctor_id, s.patient_id, s.clinic_id, at(10, 0)), at(8, 0))
            .unwrap();

        let moved = service
            .reschedule(
                booked.id,
                AppointmentChanges {
                    start_time: Some(at(10, 15)),
                    ..Default::default()
                },
                at(8, 30),
            )
            .expect("moving within its own slot should succeed");
        assert_eq!(moved.start_time, at(10, 15));
        assert_eq!(moved.updated_at, at(8, 30));

        service
            .book(request(s.other_doctor_id, s.other_patient_id, s.clinic_id, at(14, 0)), at(8, 0))
            .unwrap();
        let err = service
            .reschedule(
                booked.id,
                AppointmentChanges {
                    doctor_id: Some(s.other_doctor_id),
                    start_time: Some(at(14, 10)),
                    ..Default::default()
                },
                at(9, 0),
            )
            .expect_err("other doctor is busy at 14:10");
        assert!(matches!(err, HmsError::Conflict(_)));
    }

    #[test]
    fn test_no_two_accepted_appointments_overlap() {
        let (service, s) = setup();
        let starts = [(9, 0), (9, 20), (9, 30), (9, 45), (10, 0), (10, 29), (10, 30)];
        for (h, m) in starts {
            let _ = service.book(request(s.doctor_id, s.patient_id, s.clinic_id, at(h, m)), at(8, 0));
        }

        let booked = service
            .list_for_doctor_on(s.doctor_id, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap())
            .expect("list should succeed");
        assert_eq!(
            booked.iter().map(|a| a.start_time).collect::<Vec<_>>(),
            vec![at(9, 0), at(9, 30), at(10, 0), at(10, 30)]
        );
        for pair in booked.windows(2) {
            assert!(pair[0].end_time() <= pair[1].start_time);
        }
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let (service, s) = setup();
        let booked = service
            .book(request(s.doctor_id, s.patient_id, s.clinic_id, at(10, 0)), at(8, 0))
            .unwrap();
        service
            .transition_status(booked.id, AppointmentStatus::InProgress, at(10, 0))
            .unwrap();
        service
            .transition_status(booked.id, AppointmentStatus::Completed, at(10, 30))
            .unwrap();

        let err = service
            .transition_status(booked.id, AppointmentStatus::Scheduled, at(11, 0))
            .expect_err("completed is terminal");
        assert!(matches!(err, HmsError::InvalidTransition { entity: "appointment", .. }));
    }

    #[test]
    fn test_zero_duration_is_rejected() {
        let (service, s) = setup();
        let mut req = request(s.doctor_id, s.patient_id, s.clinic_id, at(10, 0));
        req.duration_minutes = Some(0);
        assert!(matches!(service.book(req, at(8, 0)), Err(HmsError::Validation(_))));
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let (service, _) = setup();
        assert!(matches!(service.delete(99), Err(HmsError::NotFound { .. })));
    }

    #[test]
    fn test_concurrent_bookings_of_one_slot_admit_exactly_one() {
        let (service, s) = setup();
        let (doctor_id, clinic_id) = (s.doctor_id, s.clinic_id);
        let results: Vec<HmsResult<Appointment>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let service = &service;
                    let patient_id = if i % 2 == 0 { s.patient_id } else { s.other_patient_id };
                    scope.spawn(move || {
                        service.book(request(doctor_id, patient_id, clinic_id, at(14, 0)), at(8, 0))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("booking thread should not panic"))
                .collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(err, HmsError::Conflict(_)), "unexpected error: {err}");
        }
    }
}
