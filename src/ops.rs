//! Batch operators over record collections.
//!
//! Filter and compute run a compiled expression once per record. Select,
//! dedupe, sort, rename and limit work from plain field names.

use std::cmp::Ordering;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::expr::CompiledExpr;
use crate::record::Record;
use crate::types::{Value, ValueKey};

/// Keeps the records for which `expr` is truthy, in their original order.
pub fn filter(expr: &CompiledExpr, records: Vec<Record>) -> Vec<Record> {
    let before = records.len();
    let out: Vec<Record> = records.into_iter().filter(|r| expr.matches(r)).collect();
    log::trace!("filter '{}': {} -> {} records", expr.source(), before, out.len());
    out
}

/// Writes the value of `expr` into `field` on every record, overwriting any
/// previous value.
pub fn compute(expr: &CompiledExpr, records: &mut [Record], field: &str) {
    for record in records.iter_mut() {
        let value = expr.evaluate(record);
        record.set(field, value);
    }
    log::trace!("compute '{}' into '{}' on {} records", expr.source(), field, records.len());
}

/// Projects every record onto exactly `fields`, in that order. Missing fields
/// become null.
pub fn select<S: AsRef<str>>(fields: &[S], records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .map(|record| {
            let mut out = Record::with_capacity(fields.len());
            for field in fields {
                let field = field.as_ref();
                out.set(field, record.get_or_null(field).clone());
            }
            out
        })
        .collect()
}

/// Drops every record whose key-field tuple was already seen, keeping the
/// first occurrence. Null is an ordinary key value.
pub fn dedupe<S: AsRef<str>>(keys: &[S], records: Vec<Record>) -> Vec<Record> {
    let keep: Vec<bool> = {
        let mut seen: FxHashSet<SmallVec<[ValueKey<'_>; 4]>> = FxHashSet::default();
        records
            .iter()
            .map(|record| {
                let key = keys
                    .iter()
                    .map(|k| ValueKey(record.get_or_null(k.as_ref())))
                    .collect();
                seen.insert(key)
            })
            .collect()
    };
    let before = records.len();
    let out: Vec<Record> = records
        .into_iter()
        .zip(keep)
        .filter_map(|(record, first)| first.then_some(record))
        .collect();
    log::trace!("dedupe: {} -> {} records", before, out.len());
    out
}

/// Sort key extracted once per record.
#[derive(Debug, Clone, Copy)]
struct SortEntry {
    key: f64,
    missing: bool,
    idx: usize,
}

/// Orders records by `field`. Null and absent values go last in both directions.
///
/// Numbers order by magnitude. Text and booleans order by a fixed structural
/// hash, which groups equal values together in a stable but otherwise
/// arbitrary order. Ties keep their input order.
pub fn sort(field: &str, records: Vec<Record>, descending: bool) -> Vec<Record> {
    if records.len() <= 1 {
        return records;
    }

    // Extract: one pass over the records, nothing but numbers afterwards.
    let mut entries: Vec<SortEntry> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| match sort_projection(record.get_or_null(field)) {
            Some(key) => SortEntry {
                key,
                missing: false,
                idx,
            },
            None => SortEntry {
                key: 0.0,
                missing: true,
                idx,
            },
        })
        .collect();

    // Sort: numeric comparisons only.
    entries.sort_by(|a, b| match (a.missing, b.missing) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = a.key.total_cmp(&b.key);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
    });

    // Gather: move records into their sorted slots.
    let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
    let out: Vec<Record> = entries
        .iter()
        .filter_map(|entry| slots[entry.idx].take())
        .collect();
    log::trace!(
        "sort by '{}' ({}): {} records",
        field,
        if descending { "desc" } else { "asc" },
        out.len()
    );
    out
}

/// Numeric sort projection of a value, `None` for null.
pub fn sort_projection(value: &Value) -> Option<f64> {
    let key = match value {
        Value::Null => return None,
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        // 53 bits fit an f64 exactly, so distinct hashes stay distinct keys
        other => (other.structural_hash() >> 11) as f64,
    };
    Some(if key == 0.0 {
        0.0
    } else if key.is_nan() {
        f64::NAN
    } else {
        key
    })
}

/// Renames fields per `mapping`; unmapped fields keep their names. Field order
/// is preserved. When two fields end up with the same name the later value wins.
pub fn rename(mapping: &IndexMap<String, String>, records: Vec<Record>) -> Vec<Record> {
    if mapping.is_empty() {
        return records;
    }
    records
        .into_iter()
        .map(|record| {
            let mut out = Record::with_capacity(record.len());
            for (name, value) in record {
                match mapping.get(&name) {
                    Some(new_name) => out.set(new_name.as_str(), value),
                    None => out.set(name, value),
                }
            }
            out
        })
        .collect()
}

/// Keeps the first `n` records.
pub fn limit(n: usize, mut records: Vec<Record>) -> Vec<Record> {
    records.truncate(n);
    records
}
