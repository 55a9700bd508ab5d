use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// One logged trade event for a partner on a calendar day.
///
/// Raw fields are what the user typed into the form; derived fields
/// (`balance`, `value_per_animal`, `settlement`) are owned by the
/// recompute engine and overwritten whenever the record set changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier, assigned by the store on insert.
    pub id: String,

    /// Partner name, normalized to uppercase before persistence.
    pub partner: String,

    /// Calendar day of the shipment, no time component.
    pub date: NaiveDate,

    /// Animals received.
    pub entries: i64,

    /// Animals dispatched.
    pub exits: i64,

    /// Derived: entries - exits. May be negative.
    pub balance: i64,

    /// Shipment weight in kilograms.
    pub total_kg: f64,

    /// Agreed price per kilogram.
    pub price_per_kg: f64,

    /// Freight cost for the shipment, split across same-day records.
    pub freight: f64,

    /// Commission, recorded but not used by any calculation.
    pub commission: f64,

    /// Derived: settlement / entries, 0 when entries is 0.
    pub value_per_animal: f64,

    /// Derived: total_kg * price_per_kg + freight / group size.
    pub settlement: f64,

    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Grouping key for the freight split: records of the same partner
    /// on the same day share a truck.
    pub fn group_key(&self) -> (&str, NaiveDate) {
        (self.partner.as_str(), self.date)
    }
}

/// Raw input fields, already parsed and normalized by a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFields {
    pub partner: String,
    pub date: NaiveDate,
    pub entries: i64,
    pub exits: i64,
    pub total_kg: f64,
    pub price_per_kg: f64,
    pub freight: f64,
    pub commission: f64,
}

/// Derived values computed from raw fields and group membership.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Derived {
    pub balance: i64,
    pub settlement: f64,
    pub value_per_animal: f64,
}

/// One reason/quantity row explaining part of a record's exits.
/// Audit and display only; the recompute engine never reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitDetail {
    pub id: String,
    pub record_id: String,
    pub reason: String,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

/// Per-partner aggregates for the history view.
#[derive(Debug, Clone, Serialize)]
pub struct PartnerStats {
    pub partner: String,
    pub record_count: i64,
    pub total_entries: i64,
    pub total_exits: i64,
    pub total_settlement: f64,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            partner TEXT NOT NULL,
            date TEXT NOT NULL,
            entries INTEGER NOT NULL DEFAULT 0,
            exits INTEGER NOT NULL DEFAULT 0,
            balance INTEGER NOT NULL DEFAULT 0,
            total_kg REAL NOT NULL DEFAULT 0,
            price_per_kg REAL NOT NULL DEFAULT 0,
            freight REAL NOT NULL DEFAULT 0,
            commission REAL NOT NULL DEFAULT 0,
            value_per_animal REAL NOT NULL DEFAULT 0,
            settlement REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exit_details (
            id TEXT PRIMARY KEY,
            record_id TEXT NOT NULL REFERENCES records(id),
            reason TEXT NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_partner ON records(partner)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_date ON records(date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_partner_date ON records(partner, date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exit_details_record ON exit_details(record_id)",
        [],
    )?;

    Ok(())
}

const RECORD_COLUMNS: &str = "id, partner, date, entries, exits, balance, total_kg, \
     price_per_kg, freight, commission, value_per_animal, settlement, created_at";

fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    let date_str: String = row.get(2)?;
    let created_at_str: String = row.get(12)?;

    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|_| rusqlite::Error::InvalidQuery)?
        .with_timezone(&Utc);

    Ok(Record {
        id: row.get(0)?,
        partner: row.get(1)?,
        date,
        entries: row.get(3)?,
        exits: row.get(4)?,
        balance: row.get(5)?,
        total_kg: row.get(6)?,
        price_per_kg: row.get(7)?,
        freight: row.get(8)?,
        commission: row.get(9)?,
        value_per_animal: row.get(10)?,
        settlement: row.get(11)?,
        created_at,
    })
}

/// Insert one record and return it with its store-assigned identity.
pub fn insert_record(conn: &Connection, raw: &RawFields, derived: &Derived) -> Result<Record> {
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO records (
            id, partner, date, entries, exits, balance, total_kg,
            price_per_kg, freight, commission, value_per_animal, settlement, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id,
            raw.partner,
            raw.date.format("%Y-%m-%d").to_string(),
            raw.entries,
            raw.exits,
            derived.balance,
            raw.total_kg,
            raw.price_per_kg,
            raw.freight,
            raw.commission,
            derived.value_per_animal,
            derived.settlement,
            created_at.to_rfc3339(),
        ],
    )
    .context("Failed to insert record")?;

    Ok(Record {
        id,
        partner: raw.partner.clone(),
        date: raw.date,
        entries: raw.entries,
        exits: raw.exits,
        balance: derived.balance,
        total_kg: raw.total_kg,
        price_per_kg: raw.price_per_kg,
        freight: raw.freight,
        commission: raw.commission,
        value_per_animal: derived.value_per_animal,
        settlement: derived.settlement,
        created_at,
    })
}

/// All records, newest day first.
pub fn get_all_records(conn: &Connection) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records ORDER BY date DESC, created_at DESC"
    ))?;

    let records = stmt
        .query_map([], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

/// One partner's history, newest day first.
pub fn get_records_for_partner(conn: &Connection, partner: &str) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE partner = ?1 ORDER BY date DESC, created_at DESC"
    ))?;

    let records = stmt
        .query_map([partner], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

pub fn get_record(conn: &Connection, id: &str) -> Result<Option<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"
    ))?;

    let mut rows = stmt.query_map([id], record_from_row)?;
    match rows.next() {
        Some(record) => Ok(Some(record?)),
        None => Ok(None),
    }
}

/// Overwrite a record's raw input fields. Derived fields are left alone
/// on purpose: the next recompute pass corrects them together with every
/// sibling whose freight divisor the edit may have shifted.
pub fn update_raw_fields(conn: &Connection, id: &str, raw: &RawFields) -> Result<()> {
    conn.execute(
        "UPDATE records
         SET partner = ?1, date = ?2, entries = ?3, exits = ?4,
             total_kg = ?5, price_per_kg = ?6, freight = ?7, commission = ?8
         WHERE id = ?9",
        params![
            raw.partner,
            raw.date.format("%Y-%m-%d").to_string(),
            raw.entries,
            raw.exits,
            raw.total_kg,
            raw.price_per_kg,
            raw.freight,
            raw.commission,
            id,
        ],
    )
    .context("Failed to update record")?;

    Ok(())
}

/// Overwrite a record's derived fields with recomputed values.
pub fn update_derived_fields(conn: &Connection, id: &str, derived: &Derived) -> Result<()> {
    conn.execute(
        "UPDATE records
         SET balance = ?1, settlement = ?2, value_per_animal = ?3
         WHERE id = ?4",
        params![
            derived.balance,
            derived.settlement,
            derived.value_per_animal,
            id
        ],
    )
    .context("Failed to update derived fields")?;

    Ok(())
}

/// Bulk wipe: exit details first (they reference records), then records.
/// Returns (records deleted, exit details deleted).
pub fn delete_all(conn: &Connection) -> Result<(usize, usize)> {
    let details = conn.execute("DELETE FROM exit_details", [])?;
    let records = conn.execute("DELETE FROM records", [])?;

    Ok((records, details))
}

pub fn count_records(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;

    Ok(count)
}

/// Insert reason/quantity rows collected for one record's exits.
pub fn insert_exit_details(
    conn: &Connection,
    record_id: &str,
    reasons: &[(String, i64)],
) -> Result<usize> {
    let mut inserted = 0;

    for (reason, quantity) in reasons {
        conn.execute(
            "INSERT INTO exit_details (id, record_id, reason, quantity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                record_id,
                reason,
                quantity,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to insert exit detail")?;

        inserted += 1;
    }

    Ok(inserted)
}

pub fn get_exit_details(conn: &Connection, record_id: &str) -> Result<Vec<ExitDetail>> {
    let mut stmt = conn.prepare(
        "SELECT id, record_id, reason, quantity, created_at
         FROM exit_details
         WHERE record_id = ?1
         ORDER BY created_at",
    )?;

    let details = stmt
        .query_map([record_id], |row| {
            let created_at_str: String = row.get(4)?;
            let created_at = DateTime::parse_from_rfc3339(&created_at_str)
                .map_err(|_| rusqlite::Error::InvalidQuery)?
                .with_timezone(&Utc);

            Ok(ExitDetail {
                id: row.get(0)?,
                record_id: row.get(1)?,
                reason: row.get(2)?,
                quantity: row.get(3)?,
                created_at,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(details)
}

/// Distinct partner names, alphabetical.
pub fn list_partners(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT partner FROM records ORDER BY partner")?;

    let partners = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(partners)
}

/// Aggregates for one partner's history panel.
pub fn get_partner_stats(conn: &Connection, partner: &str) -> Result<PartnerStats> {
    let stats = conn.query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(entries), 0),
            COALESCE(SUM(exits), 0),
            COALESCE(SUM(settlement), 0.0)
         FROM records
         WHERE partner = ?1",
        [partner],
        |row| {
            Ok(PartnerStats {
                partner: partner.to_string(),
                record_count: row.get(0)?,
                total_entries: row.get(1)?,
                total_exits: row.get(2)?,
                total_settlement: row.get(3)?,
            })
        },
    )?;

    Ok(stats)
}
