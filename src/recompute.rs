// Recompute Engine - keep derived fields consistent with the freight split
//
// Settlement formula for each record:
//   settlement = total_kg * price_per_kg + freight / n
// where n = number of records sharing the record's (partner, date) group.
//
// Changing one record's date or freight can shift n for every sibling in
// its group, so the engine always runs over the complete record set: after
// every load, and after every insert or raw-field edit.

use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db::{self, Derived, Record};

// ============================================================================
// RECOMPUTE OUTCOME
// ============================================================================

/// Result of one full recompute pass over the record set.
#[derive(Debug, Clone)]
pub struct RecomputeOutcome {
    /// The complete record set with derived fields rewritten, input order
    /// preserved.
    pub records: Vec<Record>,

    /// Records whose derived fields moved.
    pub changed: usize,

    /// Changed records successfully written back to the store.
    pub persisted: usize,

    /// Changed records whose write-back failed. Failures are isolated:
    /// one bad write never stops the remaining updates.
    pub failed: usize,
}

impl RecomputeOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

// ============================================================================
// RECOMPUTE ENGINE
// ============================================================================

pub struct RecomputeEngine {
    /// Tolerance for deciding a stored derived value has moved (default: 0.01)
    pub tolerance: f64,
}

impl RecomputeEngine {
    pub fn new() -> Self {
        RecomputeEngine { tolerance: 0.01 }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        RecomputeEngine { tolerance }
    }

    /// Rewrite every record's derived fields from its raw fields and its
    /// (partner, date) group size. Pure: no I/O, raw fields untouched,
    /// input order preserved, and idempotent - reconciling its own output
    /// is a fixed point.
    ///
    /// The divisor is the group size, but the freight being divided is
    /// always the record's own. Two same-day records with freights 100
    /// and 50 both divide by 2: contributions 50 and 25.
    pub fn reconcile(&self, records: &[Record]) -> Vec<Record> {
        let mut group_sizes: HashMap<(&str, NaiveDate), i64> = HashMap::new();
        for record in records {
            *group_sizes.entry(record.group_key()).or_insert(0) += 1;
        }

        records
            .iter()
            .map(|record| {
                let n = group_sizes[&record.group_key()];
                let derived = derive(record, n);

                Record {
                    balance: derived.balance,
                    settlement: derived.settlement,
                    value_per_animal: derived.value_per_animal,
                    ..record.clone()
                }
            })
            .collect()
    }

    /// Reconcile and persist each changed record back to the store, one by
    /// one. A failed write is reported and counted, and the loop moves on -
    /// best effort, non-transactional. A crash mid-loop leaves some records
    /// recomputed and some stale; the next load repairs them.
    pub fn run(&self, conn: &Connection, records: &[Record]) -> RecomputeOutcome {
        let reconciled = self.reconcile(records);

        let mut changed = 0;
        let mut persisted = 0;
        let mut failed = 0;

        for (old, new) in records.iter().zip(&reconciled) {
            if !self.derived_moved(old, new) {
                continue;
            }
            changed += 1;

            let derived = Derived {
                balance: new.balance,
                settlement: new.settlement,
                value_per_animal: new.value_per_animal,
            };

            match db::update_derived_fields(conn, &new.id, &derived) {
                Ok(()) => persisted += 1,
                Err(e) => {
                    eprintln!("Failed to persist recomputed record {}: {:#}", new.id, e);
                    failed += 1;
                }
            }
        }

        RecomputeOutcome {
            records: reconciled,
            changed,
            persisted,
            failed,
        }
    }

    fn derived_moved(&self, old: &Record, new: &Record) -> bool {
        old.balance != new.balance
            || (old.settlement - new.settlement).abs() > self.tolerance
            || (old.value_per_animal - new.value_per_animal).abs() > self.tolerance
    }
}

impl Default for RecomputeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Derived fields for one record given its group size.
fn derive(record: &Record, group_size: i64) -> Derived {
    let settlement = record.total_kg * record.price_per_kg + record.freight / group_size as f64;

    let value_per_animal = if record.entries > 0 {
        settlement / record.entries as f64
    } else {
        0.0
    };

    Derived {
        balance: record.entries - record.exits,
        settlement,
        value_per_animal,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_record(partner: &str, date: &str, entries: i64, exits: i64) -> Record {
        Record {
            id: uuid::Uuid::new_v4().to_string(),
            partner: partner.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            entries,
            exits,
            balance: 0,
            total_kg: 0.0,
            price_per_kg: 0.0,
            freight: 0.0,
            commission: 0.0,
            value_per_animal: 0.0,
            settlement: 0.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_same_day_records_split_their_own_freight() {
        // Two ACME records on the same day: divisor 2 for both, each
        // dividing its own freight
        let mut a = test_record("ACME", "2024-01-01", 10, 0);
        a.total_kg = 100.0;
        a.price_per_kg = 2.0;
        a.freight = 100.0;

        let mut b = test_record("ACME", "2024-01-01", 5, 0);
        b.total_kg = 50.0;
        b.price_per_kg = 2.0;
        b.freight = 50.0;

        let engine = RecomputeEngine::new();
        let out = engine.reconcile(&[a, b]);

        assert!((out[0].settlement - 250.0).abs() < 1e-9); // 200 + 100/2
        assert!((out[1].settlement - 125.0).abs() < 1e-9); // 100 + 50/2
    }

    #[test]
    fn test_singleton_group_keeps_full_freight() {
        let mut r = test_record("ACME", "2024-01-01", 0, 3);
        r.total_kg = 10.0;
        r.price_per_kg = 5.0;
        r.freight = 0.0;

        let engine = RecomputeEngine::new();
        let out = engine.reconcile(&[r]);

        assert_eq!(out[0].settlement, 50.0);
        assert_eq!(out[0].value_per_animal, 0.0, "Zero entries must never divide");
        assert_eq!(out[0].balance, -3);
    }

    #[test]
    fn test_groups_are_partner_and_date_exact() {
        let mut a = test_record("ACME", "2024-01-01", 1, 0);
        a.freight = 90.0;
        let mut b = test_record("ACME", "2024-01-02", 1, 0); // other day
        b.freight = 90.0;
        let mut c = test_record("BRAVO", "2024-01-01", 1, 0); // other partner
        c.freight = 90.0;

        let engine = RecomputeEngine::new();
        let out = engine.reconcile(&[a, b, c]);

        // All three are singleton groups
        for record in &out {
            assert_eq!(record.settlement, 90.0);
        }
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut a = test_record("ACME", "2024-01-01", 10, 2);
        a.total_kg = 300.0;
        a.price_per_kg = 7.0;
        a.freight = 120.0;
        let b = test_record("ACME", "2024-01-01", 4, 6);

        let engine = RecomputeEngine::new();
        let once = engine.reconcile(&[a, b]);
        let twice = engine.reconcile(&once);

        for (x, y) in once.iter().zip(&twice) {
            assert_eq!(x.balance, y.balance);
            assert_eq!(x.settlement, y.settlement);
            assert_eq!(x.value_per_animal, y.value_per_animal);
        }
    }

    #[test]
    fn test_raw_fields_and_order_untouched() {
        let a = test_record("ZETA", "2024-05-05", 3, 1);
        let b = test_record("ACME", "2024-01-01", 8, 0);
        let ids: Vec<String> = [&a, &b].iter().map(|r| r.id.clone()).collect();

        let engine = RecomputeEngine::new();
        let out = engine.reconcile(&[a.clone(), b]);

        let out_ids: Vec<String> = out.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, out_ids, "Input order must be preserved");
        assert_eq!(out[0].partner, "ZETA");
        assert_eq!(out[0].entries, a.entries);
        assert_eq!(out[0].freight, a.freight);
    }

    #[test]
    fn test_date_edit_shrinks_old_group() {
        // Three same-day records: divisor 3. Move one out, divisor
        // becomes 2 for the remaining pair.
        let mut records = Vec::new();
        for _ in 0..3 {
            let mut r = test_record("ACME", "2024-01-01", 1, 0);
            r.freight = 60.0;
            records.push(r);
        }

        let engine = RecomputeEngine::new();
        let out = engine.reconcile(&records);
        for record in &out {
            assert!((record.settlement - 20.0).abs() < 1e-9); // 60/3
        }

        records[2].date = NaiveDate::parse_from_str("2024-01-09", "%Y-%m-%d").unwrap();
        let out = engine.reconcile(&records);
        assert!((out[0].settlement - 30.0).abs() < 1e-9); // 60/2
        assert!((out[1].settlement - 30.0).abs() < 1e-9);
        assert!((out[2].settlement - 60.0).abs() < 1e-9); // now alone
    }

    // ------------------------------------------------------------------
    // Persistence path
    // ------------------------------------------------------------------

    fn open_db_with(records: &[Record]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();

        for r in records {
            conn.execute(
                "INSERT INTO records (id, partner, date, entries, exits, balance, total_kg,
                     price_per_kg, freight, commission, value_per_animal, settlement, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    r.id,
                    r.partner,
                    r.date.format("%Y-%m-%d").to_string(),
                    r.entries,
                    r.exits,
                    r.balance,
                    r.total_kg,
                    r.price_per_kg,
                    r.freight,
                    r.commission,
                    r.value_per_animal,
                    r.settlement,
                    r.created_at.to_rfc3339(),
                ],
            )
            .unwrap();
        }

        conn
    }

    #[test]
    fn test_run_persists_changed_records_only() {
        let mut a = test_record("ACME", "2024-01-01", 10, 2);
        a.total_kg = 100.0;
        a.price_per_kg = 3.0;
        a.freight = 50.0;
        let b = test_record("BRAVO", "2024-02-02", 0, 0); // all-zero, already consistent

        let conn = open_db_with(&[a.clone(), b.clone()]);
        let engine = RecomputeEngine::new();

        let records = db::get_all_records(&conn).unwrap();
        let outcome = engine.run(&conn, &records);
        assert_eq!(outcome.changed, 1);
        assert_eq!(outcome.persisted, 1);
        assert_eq!(outcome.failed, 0);

        let stored = db::get_record(&conn, &a.id).unwrap().unwrap();
        assert!((stored.settlement - 350.0).abs() < 1e-9);
        assert_eq!(stored.balance, 8);

        // Second pass over the already-consistent set writes nothing
        let records = db::get_all_records(&conn).unwrap();
        let outcome = engine.run(&conn, &records);
        assert_eq!(outcome.changed, 0);
        assert_eq!(outcome.persisted, 0);
    }

    #[test]
    fn test_run_isolates_persistence_failures() {
        let mut a = test_record("ACME", "2024-01-01", 10, 2);
        a.total_kg = 100.0;
        a.price_per_kg = 3.0;
        let mut b = test_record("BRAVO", "2024-02-02", 4, 1);
        b.total_kg = 10.0;
        b.price_per_kg = 2.0;

        let conn = open_db_with(&[a.clone(), b.clone()]);

        // Make writes to record `a` blow up
        conn.execute_batch(&format!(
            "CREATE TRIGGER poison BEFORE UPDATE ON records
             WHEN NEW.id = '{}'
             BEGIN SELECT RAISE(ABORT, 'write rejected'); END;",
            a.id
        ))
        .unwrap();

        let engine = RecomputeEngine::new();
        let records = db::get_all_records(&conn).unwrap();
        let outcome = engine.run(&conn, &records);

        assert_eq!(outcome.changed, 2);
        assert_eq!(outcome.failed, 1, "Poisoned record should fail");
        assert_eq!(outcome.persisted, 1, "Sibling update must still land");
        assert!(!outcome.is_clean());

        let stored = db::get_record(&conn, &b.id).unwrap().unwrap();
        assert!((stored.settlement - 20.0).abs() < 1e-9);
    }
}
