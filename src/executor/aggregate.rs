//! Record aggregation
//!
//! Turns one batch of raw records into sink updates, one per aggregation key.
//! Records are whitespace-separated fields:
//!
//! | kind                                    | record                    |
//! |-----------------------------------------|---------------------------|
//! | `total_data`, `device_data`, `location_data` | `<id> <type> [amount]` |
//! | `advertiser`                            | `<advertiser> <spend>`    |
//! | `campaign`                              | `<campaign> <spend>`      |
//!
//! Malformed records are skipped and reported back as problems.

use super::types::{SinkUpdate, TaskKind, now_ms};
use serde_json::Value;
use std::collections::BTreeMap;

const WINS: &str = "w";
const SPEND: &str = "sp";
const BIDS: &str = "b";
const CLICKS: &str = "c";
const CLIENT_SIDE_LOAD: &str = "csl";

/// Updates to apply plus a description of every record that was skipped.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub updates: Vec<SinkUpdate>,
    pub problems: Vec<String>,
}

pub fn aggregate(kind: TaskKind, lines: &[String]) -> Aggregation {
    match kind {
        TaskKind::TotalData => event_counts(kind, lines, &TOTAL_DATA_FIELDS),
        TaskKind::Device | TaskKind::Location => event_counts(kind, lines, &DETAIL_FIELDS),
        TaskKind::Advertiser => advertiser_spend(lines),
        TaskKind::Campaign => campaign_spend(lines),
    }
}

// (record counter, sink field)
const TOTAL_DATA_FIELDS: [(&str, &str); 5] = [
    (WINS, "impressions_won"),
    (CLIENT_SIDE_LOAD, CLIENT_SIDE_LOAD),
    (BIDS, "impressions_seen"),
    (CLICKS, "banner_clicks"),
    (SPEND, "spend"),
];

const DETAIL_FIELDS: [(&str, &str); 5] = [
    (WINS, WINS),
    (CLIENT_SIDE_LOAD, CLIENT_SIDE_LOAD),
    (BIDS, BIDS),
    (CLICKS, CLICKS),
    (SPEND, SPEND),
];

fn event_counts(kind: TaskKind, lines: &[String], fields: &[(&str, &str)]) -> Aggregation {
    let mut out = Aggregation::default();
    let mut counts: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();

    for line in lines {
        let record: Vec<&str> = line.split_whitespace().collect();
        if record.len() < 2 {
            out.problems.push(format!(
                "{}: insufficient fields in record '{}', expected at least 2",
                kind.collection(),
                line
            ));
            continue;
        }
        let (id, record_type) = (record[0], record[1]);

        let mut spend = 0.0;
        if record_type == WINS {
            let Some(amount) = record.get(2) else {
                out.problems.push(format!(
                    "{}: win record for {} has no amount",
                    kind.collection(),
                    id
                ));
                continue;
            };
            match amount.parse::<f64>() {
                Ok(value) => spend = value,
                Err(e) => {
                    out.problems
                        .push(format!("{}: parsing spend '{}': {}", kind.collection(), amount, e));
                    continue;
                }
            }
        }

        let entry = counts.entry(id).or_default();
        if record_type == WINS {
            *entry.entry(SPEND).or_default() += spend;
        }
        *entry.entry(record_type).or_default() += 1.0;
    }

    for (id, per_type) in counts {
        let mut update = SinkUpdate::new(kind.collection(), id);
        update
            .set
            .insert("encoded_id".to_string(), Value::from(id));
        for (counter, field) in fields {
            let value = per_type.get(counter).copied().unwrap_or(0.0);
            update.inc.insert(field.to_string(), number(*counter, value));
        }
        out.updates.push(update);
    }

    out
}

fn advertiser_spend(lines: &[String]) -> Aggregation {
    let mut out = Aggregation::default();
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();

    for line in lines {
        match parse_spend(line) {
            Ok((advertiser, spend)) => *totals.entry(advertiser).or_default() += spend,
            Err(problem) => out.problems.push(format!("advertiser: {}", problem)),
        }
    }

    for (advertiser, spend) in totals {
        let mut update = SinkUpdate::new(TaskKind::Advertiser.collection(), advertiser);
        update.inc.insert("funds".to_string(), Value::from(-spend));
        out.updates.push(update);
    }

    out
}

fn campaign_spend(lines: &[String]) -> Aggregation {
    let mut out = Aggregation::default();
    let mut totals: BTreeMap<&str, (u64, f64)> = BTreeMap::new();

    for line in lines {
        match parse_spend(line) {
            Ok((campaign, spend)) => {
                let entry = totals.entry(campaign).or_default();
                entry.0 += 1;
                entry.1 += spend;
            }
            Err(problem) => out.problems.push(format!("campaign: {}", problem)),
        }
    }

    let won_at = now_ms();
    for (campaign, (imps, spend)) in totals {
        let mut update = SinkUpdate::new(TaskKind::Campaign.collection(), campaign);
        for field in ["imps", "daily_imps", "interval_imps"] {
            update.inc.insert(field.to_string(), Value::from(imps));
        }
        for field in ["spend", "daily_spend", "interval_spend"] {
            update.inc.insert(field.to_string(), Value::from(spend));
        }
        update
            .set
            .insert("last_bid_win".to_string(), Value::from(won_at));
        out.updates.push(update);
    }

    out
}

fn parse_spend(line: &str) -> Result<(&str, f64), String> {
    let mut fields = line.split_whitespace();
    let (Some(key), Some(amount)) = (fields.next(), fields.next()) else {
        return Err(format!("too few fields in '{}', expected 2", line));
    };
    amount
        .parse::<f64>()
        .map(|spend| (key, spend))
        .map_err(|e| format!("parsing spend '{}': {}", amount, e))
}

/// Counters go out as integers, spend as a float.
fn number(counter: &str, value: f64) -> Value {
    if counter == SPEND {
        Value::from(value)
    } else {
        Value::from(value as u64)
    }
}
