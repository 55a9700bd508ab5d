// Live Preview Calculator - derived values for the in-progress form
//
// The form holds exactly what the user typed, so every numeric field is a
// string here. Anything that fails to parse counts as zero: the preview
// always renders a number, it never errors.

use chrono::NaiveDate;

use crate::db::Record;

/// Raw form state, one string per input field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormInput {
    pub partner: String,
    pub date: String,
    pub entries: String,
    pub exits: String,
    pub total_kg: String,
    pub price_per_kg: String,
    pub freight: String,
    pub commission: String,
}

/// What the user sees next to the form before saving.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Preview {
    pub balance: i64,
    pub value_per_animal: f64,
    pub settlement: f64,
    pub freight_divisor: usize,
}

pub(crate) fn parse_amount(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

pub(crate) fn parse_count(s: &str) -> i64 {
    s.trim().parse().unwrap_or(0)
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Divisor the preview will divide freight by: persisted records already in
/// the form's (partner, date) group, plus one for the record being typed.
///
/// This intentionally differs from the post-save recompute, which counts
/// only persisted rows - the preview is approximate until the save triggers
/// a full recompute.
pub fn freight_divisor(input: &FormInput, records: &[Record]) -> usize {
    let partner = input.partner.trim().to_uppercase();
    if partner.is_empty() {
        return 1;
    }

    let date = match parse_date(&input.date) {
        Some(date) => date,
        None => return 1,
    };

    let count = records
        .iter()
        .filter(|r| r.partner == partner && r.date == date)
        .count();

    count + 1
}

/// Compute the preview for the current form state against the persisted
/// record set.
pub fn preview(input: &FormInput, records: &[Record]) -> Preview {
    let entries = parse_count(&input.entries);
    let exits = parse_count(&input.exits);
    let total_kg = parse_amount(&input.total_kg);
    let price_per_kg = parse_amount(&input.price_per_kg);
    let freight = parse_amount(&input.freight);

    let balance = entries - exits;

    let mut divisor = 1;
    let mut settlement = 0.0;
    if total_kg > 0.0 && price_per_kg > 0.0 {
        divisor = freight_divisor(input, records);
        settlement = total_kg * price_per_kg + freight / divisor as f64;
    }

    let value_per_animal = if entries > 0 && settlement > 0.0 {
        settlement / entries as f64
    } else {
        0.0
    };

    Preview {
        balance,
        value_per_animal,
        settlement,
        freight_divisor: divisor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn form(partner: &str, date: &str) -> FormInput {
        FormInput {
            partner: partner.to_string(),
            date: date.to_string(),
            ..Default::default()
        }
    }

    fn persisted(partner: &str, date: &str) -> Record {
        Record {
            id: uuid::Uuid::new_v4().to_string(),
            partner: partner.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            entries: 1,
            exits: 0,
            balance: 1,
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
    fn test_preview_formula() {
        let mut input = form("ACME", "2024-01-01");
        input.entries = "10".to_string();
        input.exits = "2".to_string();
        input.total_kg = "100".to_string();
        input.price_per_kg = "3".to_string();
        input.freight = "50".to_string();

        let p = preview(&input, &[]);
        assert_eq!(p.freight_divisor, 1);
        assert!((p.settlement - 350.0).abs() < 1e-9);
        assert!((p.value_per_animal - 35.0).abs() < 1e-9);
        assert_eq!(p.balance, 8);
    }

    #[test]
    fn test_divisor_counts_persisted_group_plus_one() {
        let records = vec![
            persisted("ACME", "2024-01-01"),
            persisted("ACME", "2024-01-01"),
            persisted("ACME", "2024-01-02"),
            persisted("BRAVO", "2024-01-01"),
        ];

        let input = form("ACME", "2024-01-01");
        assert_eq!(freight_divisor(&input, &records), 3);

        // Lowercase form entry still matches the normalized store
        let input = form("acme", "2024-01-01");
        assert_eq!(freight_divisor(&input, &records), 3);

        let input = form("ACME", "2024-01-02");
        assert_eq!(freight_divisor(&input, &records), 2);
    }

    #[test]
    fn test_divisor_defaults_to_one() {
        let records = vec![persisted("ACME", "2024-01-01")];

        assert_eq!(freight_divisor(&form("", "2024-01-01"), &records), 1);
        assert_eq!(freight_divisor(&form("ACME", ""), &records), 1);
        assert_eq!(freight_divisor(&form("ACME", "not-a-date"), &records), 1);
        assert_eq!(freight_divisor(&form("NEWCO", "2024-01-01"), &records), 1);
    }

    #[test]
    fn test_non_numeric_input_degrades_to_zero() {
        let mut input = form("ACME", "2024-01-01");
        input.entries = "10".to_string();
        input.total_kg = "lots".to_string();
        input.price_per_kg = "3".to_string();
        input.freight = "50".to_string();

        let p = preview(&input, &[]);
        assert_eq!(p.settlement, 0.0, "Bad weight previews as zero, not an error");
        assert_eq!(p.value_per_animal, 0.0);
        assert_eq!(p.balance, 10);
    }

    #[test]
    fn test_zero_entries_zero_value_per_animal() {
        let mut input = form("ACME", "2024-01-01");
        input.exits = "4".to_string();
        input.total_kg = "10".to_string();
        input.price_per_kg = "5".to_string();

        let p = preview(&input, &[]);
        assert!((p.settlement - 50.0).abs() < 1e-9);
        assert_eq!(p.value_per_animal, 0.0);
        assert_eq!(p.balance, -4);
    }

    #[test]
    fn test_freight_alone_does_not_settle() {
        // Settlement only kicks in once weight and price are both present
        let mut input = form("ACME", "2024-01-01");
        input.freight = "500".to_string();

        let p = preview(&input, &[]);
        assert_eq!(p.settlement, 0.0);
        assert_eq!(p.freight_divisor, 1);
    }
}
