use crate::models::{BookingField, CandidateFields, ColumnMapping, RawRow};
use csv::StringRecord;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Applies `mapping` to one source row. Headers missing from the row leave the field unset;
/// validation decides whether that matters.
pub fn map_row(source_row: &RawRow, mapping: &ColumnMapping) -> CandidateFields {
    let mut candidate = CandidateFields::new();
    for (field, header) in mapping.iter() {
        if let Some(value) = source_row.get(header) {
            candidate.set(field, value);
        }
    }
    candidate
}

/// A mapping bound to the column positions of one file's header record.
///
/// Resolved once per import so rows are mapped by index instead of header lookups.
#[derive(Debug, Clone)]
pub struct ResolvedMapping {
    columns: Vec<(BookingField, Option<usize>)>,
}

impl ResolvedMapping {
    pub fn resolve(mapping: &ColumnMapping, headers: &StringRecord) -> Self {
        // First occurrence wins for repeated headers, as with RawRow::get
        let mut positions: FxHashMap<&str, usize> = FxHashMap::default();
        for (idx, header) in headers.iter().enumerate() {
            positions.entry(header).or_insert(idx);
        }

        let columns = mapping
            .iter()
            .map(|(field, header)| {
                let position = positions.get(header).copied();
                if position.is_none() {
                    debug!(field = %field, header, "Mapped header not present in source");
                }
                (field, position)
            })
            .collect();

        Self { columns }
    }

    pub fn apply(&self, record: &StringRecord) -> CandidateFields {
        let mut candidate = CandidateFields::new();
        for &(field, position) in &self.columns {
            if let Some(value) = position.and_then(|idx| record.get(idx)) {
                candidate.set(field, value);
            }
        }
        candidate
    }

    /// Fields whose header was not found in the source.
    pub fn unresolved(&self) -> impl Iterator<Item = BookingField> + '_ {
        self.columns
            .iter()
            .filter(|(_, position)| position.is_none())
            .map(|(field, _)| *field)
    }
}

/// Pairs each header with the record's value at the same position.
/// Short records yield fewer pairs; surplus values are dropped.
pub fn raw_row(headers: &StringRecord, record: &StringRecord) -> RawRow {
    RawRow::from_pairs(headers.iter().zip(record.iter()))
}
