use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

db_enum! {
    /// Seat category defined by the venue's catalog.
    SeatType {
        Regular => "REGULAR",
        Vip => "VIP",
        Premium => "PREMIUM",
        Accessible => "ACCESSIBLE",
    }
}

impl Default for SeatType {
    fn default() -> Self {
        SeatType::Regular
    }
}

/// Static seat definition of a venue. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub venue_id: Uuid,
    pub section: String,
    pub row_label: String,
    pub seat_number: i32,
    pub seat_type: SeatType,
}

impl Seat {
    /// Catalog uniqueness key: (section, row, number) within a venue.
    pub fn position(&self) -> (&str, &str, i32) {
        (&self.section, &self.row_label, self.seat_number)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewSeat {
    #[validate(length(min = 1, max = 10))]
    pub section: String,
    #[validate(length(min = 1, max = 10))]
    pub row_label: String,
    #[validate(range(min = 1))]
    pub seat_number: i32,
    #[serde(default)]
    pub seat_type: SeatType,
}

impl NewSeat {
    pub fn position(&self) -> (&str, &str, i32) {
        (&self.section, &self.row_label, self.seat_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_type_text_round_trips_through_from_str() {
        for t in [SeatType::Regular, SeatType::Vip, SeatType::Premium, SeatType::Accessible] {
            assert_eq!(t.as_str().parse::<SeatType>().unwrap(), t);
        }
        assert!("BALCONY".parse::<SeatType>().is_err());
    }

    #[test]
    fn new_seat_rejects_long_section_and_zero_number() {
        let seat = NewSeat {
            section: "ORCHESTRA-LEFT".into(),
            row_label: "A".into(),
            seat_number: 0,
            seat_type: SeatType::Regular,
        };
        let errors = seat.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("section"));
        assert!(fields.contains_key("seat_number"));
    }
}
