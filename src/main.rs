use anyhow::Result;
use rusqlite::Connection;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

use herd_ledger::{csv_io, delete_all, get_all_records, setup_database, RecomputeEngine};

fn db_path() -> PathBuf {
    env::var("HERD_LEDGER_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("herd-ledger.db"))
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("import") => {
            let file = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Usage: herd-ledger import <file.csv>"))?;
            run_import(Path::new(file))?;
        }
        Some("export") => {
            let file = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Usage: herd-ledger export <file.csv>"))?;
            run_export(Path::new(file))?;
        }
        Some("wipe") => run_wipe()?,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Usage: herd-ledger [import <file.csv> | export <file.csv> | wipe]");
            std::process::exit(1);
        }
        None => run_ui_mode()?,
    }

    Ok(())
}

fn open_database() -> Result<Connection> {
    let path = db_path();
    let conn = Connection::open(&path)?;
    setup_database(&conn)?;
    println!("✓ Database ready: {}", path.display());

    Ok(conn)
}

fn run_import(file: &Path) -> Result<()> {
    println!("📂 Importing records from {}", file.display());

    let conn = open_database()?;

    let inserted = csv_io::import_csv(&conn, file)?;
    println!("✓ Inserted {} records", inserted);

    // Settle freight divisors against the full persisted set
    let records = get_all_records(&conn)?;
    let outcome = RecomputeEngine::new().run(&conn, &records);
    println!(
        "✓ Recomputed {} records ({} updated, {} failed)",
        outcome.records.len(),
        outcome.persisted,
        outcome.failed
    );

    Ok(())
}

fn run_export(file: &Path) -> Result<()> {
    let conn = open_database()?;

    let records = get_all_records(&conn)?;
    let outcome = RecomputeEngine::new().run(&conn, &records);

    let written = csv_io::export_csv(file, &outcome.records)?;
    println!("✓ Exported {} records to {}", written, file.display());

    Ok(())
}

fn run_wipe() -> Result<()> {
    print!("This deletes every record and exit detail. Type 'yes' to continue: ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    if answer.trim() != "yes" {
        println!("Aborted.");
        return Ok(());
    }

    let conn = open_database()?;
    let (records, details) = delete_all(&conn)?;
    println!("✓ Deleted {} records and {} exit details", records, details);

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode() -> Result<()> {
    let conn = open_database()?;

    let mut ledger = herd_ledger::Ledger::new();
    let outcome = ledger.load(&conn)?;
    println!(
        "✓ Loaded {} records ({} recomputed)\n",
        ledger.records.len(),
        outcome.persisted
    );
    println!("Starting UI... (Press 'q' to quit)\n");

    herd_ledger::ui::run_ui(&conn, ledger)?;

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode() -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API server: cargo run --bin herd-server --features server");
    std::process::exit(1);
}
