//! Attendance ledger updater.
//!
//! Applies one [`SubmissionBatch`] at a time to the registration and
//! check-in/out sheets. All reads and writes of a batch happen while the
//! ledger lock is held, so two batches never interleave their
//! read-modify-write sequences.
//!
//! Every cell written for one ID on one sheet goes through a single
//! [`Sheet::write_row`] call and lands together or not at all. A store failure
//! part way through a batch leaves the IDs already processed in place.

use chrono::Local;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::LedgerError;
use crate::lock::LedgerLock;
use crate::masterlist::Masterlist;
use crate::model::{Action, Report, StudentId, SubmissionBatch, CHECKOUT_INVALID_ERROR};
use crate::sheet::{Layout, Sheet};

/// Format of the time cells written to the sheets, e.g. `12 Aug 05:30 PM`.
pub const TIMESTAMP_FORMAT: &str = "%d %b %I:%M %p";

/// Produces the text written to time cells.
pub type Clock = Arc<dyn Fn() -> String + Send + Sync>;

pub fn local_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Clone)]
pub struct LedgerUpdater {
    registration: Arc<dyn Sheet>,
    check_inout: Arc<dyn Sheet>,
    masterlist: Masterlist,
    lock: Arc<dyn LedgerLock>,
    layout: Layout,
    clock: Clock,
}

impl LedgerUpdater {
    pub fn new(
        registration: Arc<dyn Sheet>,
        check_inout: Arc<dyn Sheet>,
        masterlist: Masterlist,
        lock: Arc<dyn LedgerLock>,
        layout: Layout,
    ) -> Self {
        Self {
            registration,
            check_inout,
            masterlist,
            lock,
            layout,
            clock: Arc::new(local_timestamp),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn masterlist(&self) -> &Masterlist {
        &self.masterlist
    }

    /// Apply `batch` and describe the result.
    ///
    /// Shape and masterlist checks run before the lock is taken; a rejected
    /// batch never touches the sheets.
    #[instrument(skip_all, fields(action = batch.action.as_str(), count = batch.ids.len()))]
    pub async fn update(&self, batch: &SubmissionBatch) -> Result<Report, LedgerError> {
        batch.validate()?;
        let unknown = self.masterlist.unknown_ids(&batch.ids).await?;
        if !unknown.is_empty() {
            return Err(LedgerError::UnknownIds(unknown));
        }

        let guard = self.lock.acquire().await?;
        let outcome = self.apply(batch).await;
        if let Err(err) = guard.release().await {
            warn!(?err, "failed to release ledger lock");
        }

        match &outcome {
            Ok(_) => info!("attendance batch recorded"),
            Err(err) => warn!(%err, kind = ?err.kind(), "attendance batch failed"),
        }
        outcome
    }

    /// [`update`](Self::update) flattened to the `(success, message)` pair the
    /// chat handlers display.
    pub async fn submit(&self, batch: &SubmissionBatch) -> (bool, String) {
        match self.update(batch).await {
            Ok(report) => (true, report.render()),
            Err(err) => (false, err.user_message()),
        }
    }

    async fn apply(&self, batch: &SubmissionBatch) -> Result<Report, LedgerError> {
        let now = (self.clock)();
        let layout = self.layout;
        match batch.action {
            Action::Registration => self.register(&batch.ids).await?,
            Action::LateSignIn => {
                self.upsert_attendance(&batch.ids, &[(layout.late_sign_in, now)])
                    .await?
            }
            Action::EarlyCheckOut => {
                let Some(details) = &batch.details else {
                    return Err(LedgerError::InvalidFormat(CHECKOUT_INVALID_ERROR.into()));
                };
                let fields = [
                    (layout.checkout_time, now),
                    (layout.expected_return, details.expected_return.clone()),
                    (layout.reason, details.reason.clone()),
                ];
                self.upsert_attendance(&batch.ids, &fields).await?
            }
        }

        let names = self.masterlist.names(&batch.ids).await?;
        Ok(Report {
            action: batch.action,
            entries: batch.ids.iter().cloned().zip(names).collect(),
        })
    }

    /// Append one ID-only row per ID, unless any of them is already there.
    async fn register(&self, ids: &[StudentId]) -> Result<(), LedgerError> {
        let existing = self.registration.column_values(self.layout.id).await?;
        let mut seen: HashSet<&str> = existing.iter().map(String::as_str).collect();
        let mut conflicts = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                conflicts.push(id.to_string());
            }
        }
        if !conflicts.is_empty() {
            return Err(LedgerError::AlreadyRegistered(conflicts));
        }

        for (offset, id) in ids.iter().enumerate() {
            let row = self.layout.next_row(existing.len() + offset);
            self.registration
                .write_row(row, &[(self.layout.id, id.to_string())])
                .await?;
            debug!(%id, row, "registered");
        }
        Ok(())
    }

    /// Update `fields` on each ID's check-in/out row, appending the row when
    /// missing, and make sure the ID is also on the registration sheet.
    async fn upsert_attendance(
        &self,
        ids: &[StudentId],
        fields: &[(u32, String)],
    ) -> Result<(), LedgerError> {
        let layout = self.layout;

        // Index 0 of a column is row 1.
        let existing = self.check_inout.column_values(layout.id).await?;
        let mut next = existing.len();
        let mut rows: HashMap<String, u32> = HashMap::new();
        for (idx, value) in existing.into_iter().enumerate() {
            if !value.is_empty() {
                rows.entry(value).or_insert(idx as u32 + 1);
            }
        }

        let registered = self.registration.column_values(layout.id).await?;
        let mut next_registered = registered.len();
        let mut registered: HashSet<String> = registered.into_iter().collect();

        for id in ids {
            match rows.get(id.as_str()) {
                Some(&row) => {
                    self.check_inout.write_row(row, fields).await?;
                    debug!(%id, row, "updated attendance row");
                }
                None => {
                    let row = layout.next_row(next);
                    let mut cells = Vec::with_capacity(fields.len() + 1);
                    cells.push((layout.id, id.to_string()));
                    cells.extend_from_slice(fields);
                    self.check_inout.write_row(row, &cells).await?;
                    rows.insert(id.to_string(), row);
                    next += 1;
                    debug!(%id, row, "appended attendance row");
                }
            }

            if registered.insert(id.to_string()) {
                let row = layout.next_row(next_registered);
                self.registration
                    .write_row(row, &[(layout.id, id.to_string())])
                    .await?;
                next_registered += 1;
                debug!(%id, row, "backfilled registration");
            }
        }
        Ok(())
    }
}
