use std::collections::{BTreeSet, HashSet};

use serde_json::Value;
use xorlist_contracts::{Identifier, WhitelistResponse, WHITELIST_PATH};

pub fn whitelist_endpoint(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), WHITELIST_PATH)
}

// Beyond this an f64 no longer pins down a single integer.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_991.0;

/// Accepts JSON integers, integral floats no larger than 2^53 - 1 in
/// magnitude and decimal strings. Anything else is not an identifier.
pub fn coerce_identifier(value: &Value) -> Option<Identifier> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                return Some(v);
            }
            let f = n.as_f64()?;
            if f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT {
                Some(f as i64)
            } else {
                None
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Decodes a whitelist response body. One bad entry fails the whole body.
pub fn decode_whitelist_body(body: &str) -> Result<Vec<Identifier>, String> {
    let response: WhitelistResponse =
        serde_json::from_str(body).map_err(|e| format!("malformed whitelist body: {e}"))?;
    let ids = response
        .whitelist
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            coerce_identifier(entry)
                .ok_or_else(|| format!("whitelist[{idx}] is not an integer: {entry}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(normalize(ids))
}

pub fn normalize(ids: impl IntoIterator<Item = Identifier>) -> Vec<Identifier> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

pub fn encode_snapshot(ids: &[Identifier]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedSnapshot {
    pub ids: Vec<Identifier>,
    pub skipped: Vec<String>,
}

/// Parses persisted entries, collecting the ones that are not decimal i64
/// instead of failing. Result is ascending and free of duplicates.
pub fn decode_snapshot<I, S>(entries: I) -> DecodedSnapshot
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ids = BTreeSet::new();
    let mut skipped = Vec::new();
    for entry in entries {
        let entry = entry.as_ref();
        match entry.parse::<i64>() {
            Ok(id) => {
                ids.insert(id);
            }
            Err(_) => skipped.push(entry.to_string()),
        }
    }
    DecodedSnapshot {
        ids: ids.into_iter().collect(),
        skipped,
    }
}

pub fn is_fresher(generation: u64, last_applied: u64) -> bool {
    generation > last_applied
}
