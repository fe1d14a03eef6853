use crate::error::StoreError;
use crate::models::{Booking, BookingField, CandidateFields, ColumnMapping, ImportId};
use crate::store::BookingWriter;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;

pub const TICKET_TAKEN: &str = "Ticket number has already been taken";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Blank,
    NotANumber,
    Taken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationError {
    pub field: BookingField,
    pub reason: Reason,
}

impl ValidationError {
    pub fn new(field: BookingField, reason: Reason) -> Self {
        Self { field, reason }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.field.label();
        match self.reason {
            Reason::Blank => write!(f, "{label} can't be blank"),
            Reason::NotANumber => write!(f, "{label} is not a number"),
            Reason::Taken => write!(f, "{label} has already been taken"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid(Booking),
    Invalid(Vec<ValidationError>),
}

/// Checks candidate rows against the booking schema for one import.
///
/// The uniqueness check goes through the batch writer, so it must run at persistence time.
pub struct Validator {
    mapping: Arc<ColumnMapping>,
    import_id: Option<ImportId>,
    waived: FxHashSet<BookingField>,
}

impl Validator {
    /// Waivers only apply to fields `mapping` leaves out.
    pub fn new(
        mapping: Arc<ColumnMapping>,
        import_id: Option<ImportId>,
        waived: &[BookingField],
    ) -> Self {
        let waived = waived
            .iter()
            .copied()
            .filter(|field| field.can_be_waived() && !mapping.contains(*field))
            .collect();
        Self {
            mapping,
            import_id,
            waived,
        }
    }

    pub fn is_required(&self, field: BookingField) -> bool {
        !field.is_optional() && !self.waived.contains(&field)
    }

    /// Collects every problem with the row rather than stopping at the first one.
    pub fn check_fields(&self, candidate: &CandidateFields) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for field in BookingField::ALL {
            if self.is_required(field) && candidate.present(field).is_none() {
                errors.push(ValidationError::new(field, Reason::Blank));
            }
        }
        if let Some(price) = candidate.present(BookingField::Price) {
            if parse_decimal(price).is_none() {
                errors.push(ValidationError::new(BookingField::Price, Reason::NotANumber));
            }
        }
        errors
    }

    pub fn validate(
        &self,
        candidate: &CandidateFields,
        writer: &dyn BookingWriter,
    ) -> Result<Verdict, StoreError> {
        let mut errors = self.check_fields(candidate);
        if let Some(ticket) = candidate.present(BookingField::TicketNumber) {
            if writer.ticket_number_exists(ticket)? {
                errors.push(ValidationError::new(BookingField::TicketNumber, Reason::Taken));
            }
        }
        if !errors.is_empty() {
            return Ok(Verdict::Invalid(errors));
        }
        Ok(Verdict::Valid(self.build(candidate)))
    }

    fn build(&self, candidate: &CandidateFields) -> Booking {
        let text = |field| candidate.present(field).unwrap_or_default().to_string();
        Booking {
            ticket_number: text(BookingField::TicketNumber),
            booking_number: text(BookingField::BookingNumber),
            booking_date: text(BookingField::BookingDate),
            booking_hour: text(BookingField::BookingHour),
            event_key: text(BookingField::EventKey),
            event: text(BookingField::Event),
            show_key: text(BookingField::ShowKey),
            show: text(BookingField::Show),
            show_date: text(BookingField::ShowDate),
            show_hour: text(BookingField::ShowHour),
            show_end_date: text(BookingField::ShowEndDate),
            show_end_hour: text(BookingField::ShowEndHour),
            price: candidate
                .present(BookingField::Price)
                .and_then(parse_decimal)
                .unwrap_or_default(),
            product_type: text(BookingField::ProductType),
            sales_channel: text(BookingField::SalesChannel),
            first_name: text(BookingField::FirstName),
            last_name: text(BookingField::LastName),
            email: text(BookingField::Email),
            address: text(BookingField::Address),
            postal_code: text(BookingField::PostalCode),
            country: text(BookingField::Country),
            age: candidate
                .present(BookingField::Age)
                .and_then(|age| age.parse().ok()),
            gender: candidate.present(BookingField::Gender).map(str::to_string),
            csv_mapping: Arc::clone(&self.mapping),
            import_id: self.import_id,
        }
    }
}

/// Accepts both `30.5` and the French `30,5`.
pub fn parse_decimal(value: &str) -> Option<f64> {
    let value = value.trim();
    value
        .parse::<f64>()
        .ok()
        .or_else(|| value.replace(',', ".").parse().ok())
        .filter(|n: &f64| n.is_finite())
}
