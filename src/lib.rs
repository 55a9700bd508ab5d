// Herd Ledger - Core Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod csv_io;
pub mod db;
pub mod ledger;
pub mod preview;
pub mod recompute;

#[cfg(feature = "tui")]
pub mod ui;

// Re-export commonly used types
pub use db::{
    count_records, delete_all, get_all_records, get_exit_details, get_partner_stats, get_record,
    get_records_for_partner, insert_exit_details, insert_record, list_partners, setup_database,
    update_derived_fields, update_raw_fields, Derived, ExitDetail, PartnerStats, RawFields, Record,
};
pub use ledger::{Ledger, Submission, ValidationError};
pub use preview::{freight_divisor, preview, FormInput, Preview};
pub use recompute::{RecomputeEngine, RecomputeOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
