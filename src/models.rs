use crate::error::ImportError;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Internal booking schema. Source columns are mapped onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingField {
    TicketNumber,
    BookingNumber,
    BookingDate,
    BookingHour,
    EventKey,
    Event,
    ShowKey,
    Show,
    ShowDate,
    ShowHour,
    ShowEndDate,
    ShowEndHour,
    Price,
    ProductType,
    SalesChannel,
    FirstName,
    LastName,
    Email,
    Address,
    PostalCode,
    Country,
    Age,
    Gender,
}

impl BookingField {
    pub const COUNT: usize = 23;

    pub const ALL: [BookingField; Self::COUNT] = [
        BookingField::TicketNumber,
        BookingField::BookingNumber,
        BookingField::BookingDate,
        BookingField::BookingHour,
        BookingField::EventKey,
        BookingField::Event,
        BookingField::ShowKey,
        BookingField::Show,
        BookingField::ShowDate,
        BookingField::ShowHour,
        BookingField::ShowEndDate,
        BookingField::ShowEndHour,
        BookingField::Price,
        BookingField::ProductType,
        BookingField::SalesChannel,
        BookingField::FirstName,
        BookingField::LastName,
        BookingField::Email,
        BookingField::Address,
        BookingField::PostalCode,
        BookingField::Country,
        BookingField::Age,
        BookingField::Gender,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingField::TicketNumber => "ticket_number",
            BookingField::BookingNumber => "booking_number",
            BookingField::BookingDate => "booking_date",
            BookingField::BookingHour => "booking_hour",
            BookingField::EventKey => "event_key",
            BookingField::Event => "event",
            BookingField::ShowKey => "show_key",
            BookingField::Show => "show",
            BookingField::ShowDate => "show_date",
            BookingField::ShowHour => "show_hour",
            BookingField::ShowEndDate => "show_end_date",
            BookingField::ShowEndHour => "show_end_hour",
            BookingField::Price => "price",
            BookingField::ProductType => "product_type",
            BookingField::SalesChannel => "sales_channel",
            BookingField::FirstName => "first_name",
            BookingField::LastName => "last_name",
            BookingField::Email => "email",
            BookingField::Address => "address",
            BookingField::PostalCode => "postal_code",
            BookingField::Country => "country",
            BookingField::Age => "age",
            BookingField::Gender => "gender",
        }
    }

    /// Human label used in validation messages, e.g. "Ticket number".
    pub fn label(self) -> String {
        let name = self.as_str().replace('_', " ");
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Age and gender are often missing from exports.
    pub fn is_optional(self) -> bool {
        matches!(self, BookingField::Age | BookingField::Gender)
    }

    /// Ticket number carries the uniqueness rule and price is numeric; neither may be waived.
    pub fn can_be_waived(self) -> bool {
        !self.is_optional() && !matches!(self, BookingField::TicketNumber | BookingField::Price)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BookingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingField {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| ImportError::UnknownField(s.to_string()))
    }
}

/// Ordered `name -> value` pairs serialized as a JSON object, keeping source order.
mod pairs {
    use super::*;

    pub fn serialize<S, K, V>(
        entries: impl IntoIterator<Item = (K, V)>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        serializer.collect_map(entries)
    }

    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of strings")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, Option<String>>()? {
                entries.push((key, value.unwrap_or_default()));
            }
            Ok(entries)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, String)>, D::Error> {
        deserializer.deserialize_map(PairsVisitor)
    }
}

/// Which source header feeds each internal field, in caller order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    entries: Vec<(BookingField, String)>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects unknown internal field names. A repeated field keeps its last header.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ImportError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut mapping = Self::new();
        for (field, header) in pairs {
            mapping = mapping.with(field.as_ref().parse()?, header);
        }
        Ok(mapping)
    }

    pub fn from_json(json: &str) -> Result<Self, ImportError> {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        let pairs = pairs::deserialize(&mut deserializer)?;
        deserializer.end()?;
        Self::from_pairs(pairs)
    }

    pub fn with(mut self, field: BookingField, header: impl Into<String>) -> Self {
        let header = header.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = header,
            None => self.entries.push((field, header)),
        }
        self
    }

    pub fn without(mut self, field: BookingField) -> Self {
        self.entries.retain(|(f, _)| *f != field);
        self
    }

    pub fn header_for(&self, field: BookingField) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, header)| header.as_str())
    }

    pub fn contains(&self, field: BookingField) -> bool {
        self.header_for(field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BookingField, &str)> {
        self.entries.iter().map(|(f, h)| (*f, h.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ColumnMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        pairs::serialize(self.iter().map(|(f, h)| (f.as_str(), h)), serializer)
    }
}

impl<'de> Deserialize<'de> for ColumnMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = pairs::deserialize(deserializer)?;
        Self::from_pairs(entries).map_err(de::Error::custom)
    }
}

/// One source line as `header -> value`, in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// First value under `header`.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(h, v)| (h.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        pairs::serialize(self.iter(), serializer)
    }
}

impl<'de> Deserialize<'de> for RawRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self {
            fields: pairs::deserialize(deserializer)?,
        })
    }
}

/// Mapped but unvalidated values for one row. Unmapped fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateFields {
    values: [Option<String>; BookingField::COUNT],
}

impl CandidateFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: BookingField, value: impl Into<String>) {
        self.values[field.index()] = Some(value.into());
    }

    pub fn get(&self, field: BookingField) -> Option<&str> {
        self.values[field.index()].as_deref()
    }

    /// Value with surrounding whitespace removed, `None` when blank or unset.
    pub fn present(&self, field: BookingField) -> Option<&str> {
        self.get(field).map(str::trim).filter(|v| !v.is_empty())
    }
}

/// A persisted booking.
#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    pub ticket_number: String,
    pub booking_number: String,
    pub booking_date: String,
    pub booking_hour: String,
    pub event_key: String,
    pub event: String,
    pub show_key: String,
    pub show: String,
    pub show_date: String,
    pub show_hour: String,
    pub show_end_date: String,
    pub show_end_hour: String,
    pub price: f64,
    pub product_type: String,
    pub sales_channel: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub address: String,
    pub postal_code: String,
    pub country: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
    /// Mapping that produced this booking, kept for audit
    pub csv_mapping: Arc<ColumnMapping>,
    pub import_id: Option<ImportId>,
}

/// One rejected row and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: RawRow,
    pub messages: Vec<String>,
}

impl RowError {
    pub fn new(row: RawRow, messages: Vec<String>) -> Self {
        Self { row, messages }
    }

    /// Entry recorded when the whole import aborts; it is not tied to a row.
    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            row: RawRow::new(),
            messages: vec![message.into()],
        }
    }
}

/// Outcome of one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub successes: u64,
    pub errors: Vec<RowError>,
}

impl ImportResult {
    pub fn merge(&mut self, other: ImportResult) {
        self.successes += other.successes;
        self.errors.extend(other.errors);
    }

    pub fn status(&self) -> ImportStatus {
        ImportStatus::for_result(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportId(pub i64);

impl fmt::Display for ImportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ImportId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ImportId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Processing,
    Success,
    PartialSuccess,
    Failed,
}

impl ImportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportStatus::Processing => "processing",
            ImportStatus::Success => "success",
            ImportStatus::PartialSuccess => "partial_success",
            ImportStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ImportStatus::Processing)
    }

    pub fn for_result(result: &ImportResult) -> Self {
        match (result.successes, result.errors.is_empty()) {
            (_, true) => ImportStatus::Success,
            (0, false) => ImportStatus::Failed,
            (_, false) => ImportStatus::PartialSuccess,
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ImportStatus::Processing),
            "success" => Ok(ImportStatus::Success),
            "partial_success" => Ok(ImportStatus::PartialSuccess),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(format!("unknown import status '{other}'")),
        }
    }
}

/// Durable record of one asynchronous import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub id: ImportId,
    pub status: ImportStatus,
    pub successes: u64,
    pub errors: Vec<RowError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportRecord {
    pub fn report(&self) -> StatusReport {
        StatusReport {
            status: self.status,
            successes: self.successes,
            errors: self.errors.clone(),
            started_at: self.created_at,
            finished_at: self.status.is_terminal().then_some(self.updated_at),
        }
    }
}

/// What a polling client sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: ImportStatus,
    pub successes: u64,
    pub errors: Vec<RowError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
