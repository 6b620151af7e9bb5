use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Claim the monthly check-in for `client_id`. Pure check: the returned
/// row is committed with the booking that consumes it.
pub(super) fn try_consume(
    cs: &CoachState,
    client_id: Ulid,
    month: MonthKey,
    booking_id: Ulid,
) -> Result<CheckinUsage, EngineError> {
    match cs.checkins.get(&(client_id, month)) {
        Some(usage) if usage.used => Err(EngineError::AlreadyUsed { client_id, month }),
        Some(usage) => Ok(CheckinUsage {
            used: true,
            booking_id: Some(booking_id),
            ..usage.clone()
        }),
        None => Ok(CheckinUsage {
            id: Ulid::new(),
            client_id,
            coach_id: cs.id,
            month,
            used: true,
            booking_id: Some(booking_id),
        }),
    }
}

pub(super) fn apply_consume(cs: &mut CoachState, usage: &CheckinUsage) {
    cs.checkins
        .insert((usage.client_id, usage.month), usage.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn consume_once_per_month() {
        let mut cs = CoachState::new(Ulid::new(), None, 0);
        let client = Ulid::new();
        let march = NaiveDate::from_ymd_opt(2030, 3, 1).unwrap();
        let booking = Ulid::new();

        let usage = try_consume(&cs, client, march, booking).unwrap();
        assert!(usage.used);
        assert_eq!(usage.booking_id, Some(booking));
        apply_consume(&mut cs, &usage);

        assert_eq!(
            try_consume(&cs, client, march, Ulid::new()),
            Err(EngineError::AlreadyUsed { client_id: client, month: march })
        );
    }

    #[test]
    fn months_and_clients_are_independent() {
        let mut cs = CoachState::new(Ulid::new(), None, 0);
        let client = Ulid::new();
        let march = NaiveDate::from_ymd_opt(2030, 3, 1).unwrap();
        let april = NaiveDate::from_ymd_opt(2030, 4, 1).unwrap();
        let usage = try_consume(&cs, client, march, Ulid::new()).unwrap();
        apply_consume(&mut cs, &usage);

        assert!(try_consume(&cs, client, april, Ulid::new()).is_ok());
        assert!(try_consume(&cs, Ulid::new(), march, Ulid::new()).is_ok());
    }

    #[test]
    fn unused_row_is_reclaimed_in_place() {
        let mut cs = CoachState::new(Ulid::new(), None, 0);
        let client = Ulid::new();
        let march = NaiveDate::from_ymd_opt(2030, 3, 1).unwrap();
        let row = CheckinUsage {
            id: Ulid::new(),
            client_id: client,
            coach_id: cs.id,
            month: march,
            used: false,
            booking_id: None,
        };
        apply_consume(&mut cs, &row);

        let claimed = try_consume(&cs, client, march, Ulid::new()).unwrap();
        assert_eq!(claimed.id, row.id);
        assert!(claimed.used);
    }
}
