// Application state + form/edit controllers
//
// The app holds one explicit state object synchronized with the store: every
// write (submit, edit, wipe) is followed by a reload, and every reload runs
// the recompute engine over the full record set. That is what keeps the
// freight divisors honest - one record's save can change the settlement of
// every sibling in its (partner, date) group.

use std::fmt;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::db::{self, PartnerStats, RawFields, Record};
use crate::preview::{self, FormInput};
use crate::recompute::{RecomputeEngine, RecomputeOutcome};

/// Input rejected before any persistence call.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

/// Outcome of a form submission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// The record as stored (before the post-save recompute pass).
    pub record: Record,

    /// True when exits > 0: the caller should collect exit reasons from
    /// the user and pass them to [`Ledger::record_exit_reasons`].
    pub needs_exit_reasons: bool,
}

/// In-memory application state, explicitly reloaded after every write.
pub struct Ledger {
    pub records: Vec<Record>,
    pub selected_partner: Option<String>,
    engine: RecomputeEngine,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger {
            records: Vec::new(),
            selected_partner: None,
            engine: RecomputeEngine::new(),
        }
    }

    /// Fetch the full record set, recompute derived fields, persist the
    /// corrections. Auto-selects the first partner when none is selected.
    pub fn load(&mut self, conn: &Connection) -> Result<RecomputeOutcome> {
        let stored = db::get_all_records(conn).context("Failed to load records")?;
        let outcome = self.engine.run(conn, &stored);
        self.records = outcome.records.clone();

        if self.selected_partner.is_none() {
            self.selected_partner = self.records.first().map(|r| r.partner.clone());
        }

        Ok(outcome)
    }

    /// Validate, normalize, insert, reload. The stored derived values come
    /// from the live preview; the reload's recompute pass then settles the
    /// whole group against the persisted count.
    pub fn submit(&mut self, conn: &Connection, input: &FormInput) -> Result<Submission> {
        let partner = input.partner.trim().to_uppercase();
        if partner.is_empty() {
            return Err(ValidationError("Partner name is required".to_string()).into());
        }

        let p = preview::preview(input, &self.records);
        let raw = raw_from_input(input)?;
        let derived = db::Derived {
            balance: p.balance,
            settlement: p.settlement,
            value_per_animal: p.value_per_animal,
        };

        let record = db::insert_record(conn, &raw, &derived)?;
        let needs_exit_reasons = record.exits > 0;

        // Reload auto-selects the new partner when nothing was selected yet
        self.load(conn)?;

        Ok(Submission {
            record,
            needs_exit_reasons,
        })
    }

    /// Overwrite one record's raw fields and reload. Derived fields are not
    /// written here - the reload's recompute corrects them for the edited
    /// record and for both its old and new groups.
    pub fn save_edit(&mut self, conn: &Connection, id: &str, input: &FormInput) -> Result<()> {
        let raw = raw_from_input(input)?;
        db::update_raw_fields(conn, id, &raw)?;
        self.load(conn)?;

        Ok(())
    }

    /// Persist reason/quantity rows collected for a record's exits.
    pub fn record_exit_reasons(
        &self,
        conn: &Connection,
        record_id: &str,
        reasons: &[(String, i64)],
    ) -> Result<usize> {
        db::insert_exit_details(conn, record_id, reasons)
    }

    /// Delete everything: exit details, records, in-memory state.
    pub fn wipe(&mut self, conn: &Connection) -> Result<(usize, usize)> {
        let deleted = db::delete_all(conn).context("Failed to delete records")?;
        self.records.clear();
        self.selected_partner = None;

        Ok(deleted)
    }

    /// Distinct partner names in the loaded set, alphabetical.
    pub fn partners(&self) -> Vec<String> {
        let mut partners: Vec<String> = self.records.iter().map(|r| r.partner.clone()).collect();
        partners.sort();
        partners.dedup();
        partners
    }

    pub fn select_partner(&mut self, partner: Option<String>) {
        self.selected_partner = partner;
    }

    /// The selected partner's history (already newest-first from the load).
    pub fn records_for_selected(&self) -> Vec<&Record> {
        match &self.selected_partner {
            Some(partner) => self
                .records
                .iter()
                .filter(|r| &r.partner == partner)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Size of a record's (partner, date) group in the loaded set. This is
    /// the divisor its freight was split by.
    pub fn group_size(&self, record: &Record) -> usize {
        self.records
            .iter()
            .filter(|r| r.group_key() == record.group_key())
            .count()
    }

    /// Aggregates for the selected partner's stats panel.
    pub fn stats_for_selected(&self) -> Option<PartnerStats> {
        let partner = self.selected_partner.clone()?;
        let records = self.records_for_selected();

        Some(PartnerStats {
            record_count: records.len() as i64,
            total_entries: records.iter().map(|r| r.entries).sum(),
            total_exits: records.iter().map(|r| r.exits).sum(),
            total_settlement: records.iter().map(|r| r.settlement).sum(),
            partner,
        })
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse form strings into typed raw fields. Partner is trimmed and
/// uppercased, numerics degrade to zero; only the date can reject, since
/// the store needs a real calendar day.
fn raw_from_input(input: &FormInput) -> Result<RawFields> {
    let date = preview::parse_date(&input.date)
        .ok_or_else(|| ValidationError("Date must be YYYY-MM-DD".to_string()))?;

    Ok(RawFields {
        partner: input.partner.trim().to_uppercase(),
        date,
        entries: preview::parse_count(&input.entries),
        exits: preview::parse_count(&input.exits),
        total_kg: preview::parse_amount(&input.total_kg),
        price_per_kg: preview::parse_amount(&input.price_per_kg),
        freight: preview::parse_amount(&input.freight),
        commission: preview::parse_amount(&input.commission),
    })
}
