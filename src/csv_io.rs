// CSV import/export for the record table.
//
// Import reads raw fields only and inserts with zeroed derived values;
// callers run the recompute engine afterwards so freight divisors come out
// of the full persisted set, not the file order.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{self, Derived, RawFields, Record};

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "Partner")]
    partner: String,

    #[serde(rename = "Date")]
    date: String,

    #[serde(rename = "Entries")]
    entries: i64,

    #[serde(rename = "Exits")]
    exits: i64,

    #[serde(rename = "Total_Kg")]
    total_kg: f64,

    #[serde(rename = "Price_Per_Kg")]
    price_per_kg: f64,

    #[serde(rename = "Freight")]
    freight: f64,

    #[serde(rename = "Commission")]
    commission: f64,

    // Derived columns: written on export, ignored on import
    #[serde(rename = "Balance", default)]
    balance: i64,

    #[serde(rename = "Value_Per_Animal", default)]
    value_per_animal: f64,

    #[serde(rename = "Settlement", default)]
    settlement: f64,
}

/// Write the full record set to a CSV file, raw and derived columns.
pub fn export_csv(path: &Path, records: &[Record]) -> Result<usize> {
    let mut wtr = csv::Writer::from_path(path).context("Failed to create CSV file")?;

    for record in records {
        wtr.serialize(CsvRow {
            partner: record.partner.clone(),
            date: record.date.format("%Y-%m-%d").to_string(),
            entries: record.entries,
            exits: record.exits,
            total_kg: record.total_kg,
            price_per_kg: record.price_per_kg,
            freight: record.freight,
            commission: record.commission,
            balance: record.balance,
            value_per_animal: record.value_per_animal,
            settlement: record.settlement,
        })?;
    }

    wtr.flush()?;
    Ok(records.len())
}

/// Insert every row of a CSV file as a new record. Partner names are
/// normalized to uppercase, derived fields start at zero. Returns the
/// inserted count.
pub fn import_csv(conn: &Connection, path: &Path) -> Result<usize> {
    let mut rdr = csv::Reader::from_path(path).context("Failed to open CSV file")?;

    let mut inserted = 0;

    for result in rdr.deserialize() {
        let row: CsvRow = result.context("Failed to deserialize record row")?;

        let date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d")
            .with_context(|| format!("Bad date in CSV row: {:?}", row.date))?;

        let raw = RawFields {
            partner: row.partner.trim().to_uppercase(),
            date,
            entries: row.entries,
            exits: row.exits,
            total_kg: row.total_kg,
            price_per_kg: row.price_per_kg,
            freight: row.freight,
            commission: row.commission,
        };

        db::insert_record(conn, &raw, &Derived::default())?;
        inserted += 1;
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recompute::RecomputeEngine;
    use std::path::PathBuf;

    fn temp_csv() -> PathBuf {
        std::env::temp_dir().join(format!("herd-ledger-{}.csv", uuid::Uuid::new_v4()))
    }

    fn open_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_export_import_roundtrip() {
        let conn = open_db();

        let raw = RawFields {
            partner: "ACME".to_string(),
            date: NaiveDate::parse_from_str("2024-01-01", "%Y-%m-%d").unwrap(),
            entries: 10,
            exits: 2,
            total_kg: 1234.5,
            price_per_kg: 8.2,
            freight: 300.0,
            commission: 12.0,
        };
        db::insert_record(&conn, &raw, &Derived::default()).unwrap();

        let records = db::get_all_records(&conn).unwrap();
        let reconciled = RecomputeEngine::new().reconcile(&records);

        let path = temp_csv();
        let written = export_csv(&path, &reconciled).unwrap();
        assert_eq!(written, 1);

        // Import into a fresh store and compare raw fields
        let conn2 = open_db();
        let imported = import_csv(&conn2, &path).unwrap();
        assert_eq!(imported, 1);

        let records = db::get_all_records(&conn2).unwrap();
        assert_eq!(records[0].partner, "ACME");
        assert_eq!(records[0].date.to_string(), "2024-01-01");
        assert_eq!(records[0].entries, 10);
        assert_eq!(records[0].exits, 2);
        assert!((records[0].total_kg - 1234.5).abs() < 1e-9);
        assert!((records[0].freight - 300.0).abs() < 1e-9);
        // Derived fields start at zero until the engine runs
        assert_eq!(records[0].settlement, 0.0);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_import_normalizes_partner() {
        let path = temp_csv();
        std::fs::write(
            &path,
            "Partner,Date,Entries,Exits,Total_Kg,Price_Per_Kg,Freight,Commission\n\
             acme ranch,2024-01-01,10,0,100.0,3.0,50.0,0.0\n",
        )
        .unwrap();

        let conn = open_db();
        let imported = import_csv(&conn, &path).unwrap();
        assert_eq!(imported, 1);

        let records = db::get_all_records(&conn).unwrap();
        assert_eq!(records[0].partner, "ACME RANCH");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_import_rejects_bad_date() {
        let path = temp_csv();
        std::fs::write(
            &path,
            "Partner,Date,Entries,Exits,Total_Kg,Price_Per_Kg,Freight,Commission\n\
             ACME,01/09/2024,10,0,100.0,3.0,50.0,0.0\n",
        )
        .unwrap();

        let conn = open_db();
        assert!(import_csv(&conn, &path).is_err());
        assert_eq!(db::count_records(&conn).unwrap(), 0);

        std::fs::remove_file(&path).ok();
    }
}
