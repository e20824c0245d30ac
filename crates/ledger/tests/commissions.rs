mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;

use common::{eur, ledger_with, ledger_with_db};
use ledger::{
    BookingCompleted, CommissionRate, CommissionSettings, CommissionStatus, Currency,
    EntryStatus, LedgerConfig, LedgerError, Money, PackageUsage, RateOverride, RateSource,
    RentalCompleted, SourceType, StaticRateConverter, TransactionType,
};

fn booking(id: &str, instructor: &str, minor: i64) -> BookingCompleted {
    BookingCompleted {
        booking_id: id.to_string(),
        beneficiary_id: instructor.to_string(),
        service_id: None,
        amount: Money::new(minor),
        currency: Currency::Eur,
        duration_hours: Some(dec!(2)),
        package: None,
        rate_override: None,
        completed_at: Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap(),
    }
}

fn rental(id: &str, owner: &str, minor: i64) -> RentalCompleted {
    RentalCompleted {
        rental_id: id.to_string(),
        beneficiary_id: owner.to_string(),
        service_id: Some("board".to_string()),
        amount: Money::new(minor),
        currency: Currency::Eur,
        duration_hours: Some(dec!(3)),
        rate_override: None,
        completed_at: Utc.with_ymd_and_hms(2026, 4, 2, 16, 30, 0).unwrap(),
    }
}

#[tokio::test]
async fn booking_commission_uses_system_default() {
    let (ledger, _db) = ledger_with_db().await;

    let outcome = ledger
        .record_booking_commission(booking("bk-1", "ines", 40_00))
        .await
        .unwrap();
    assert!(outcome.is_created());
    let commission = outcome.commission();
    assert_eq!(commission.source_type, SourceType::Booking);
    assert_eq!(commission.rate_source, RateSource::SystemDefault);
    assert_eq!(commission.computed_amount, eur(20_00));
    assert_eq!(commission.computed_currency, Currency::Eur);
    assert_eq!(commission.period, "2026-03");
    assert_eq!(commission.status, CommissionStatus::Pending);
}

#[tokio::test]
async fn repeated_completion_yields_one_commission() {
    let (ledger, _db) = ledger_with_db().await;
    let first = ledger
        .record_booking_commission(booking("bk-2", "ines", 40_00))
        .await
        .unwrap();
    let second = ledger
        .record_booking_commission(booking("bk-2", "ines", 40_00))
        .await
        .unwrap();

    assert!(!second.is_created());
    assert_eq!(second.commission().id, first.commission().id);
    assert_eq!(ledger.commissions_for("ines", None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_deliveries_create_one_commission() {
    let (ledger, _db, _dir) = common::ledger_with_file_db(4).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .record_booking_commission(booking("bk-race", "ines", 40_00))
                .await
        }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_created() {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(ledger.commissions_for("ines", None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rate_resolution_takes_the_most_specific_match() {
    let (ledger, _db) = ledger_with_db().await;
    ledger
        .set_commission_rate(RateOverride {
            beneficiary_id: "jon".to_string(),
            service_id: None,
            rate: CommissionRate::percentage(dec!(30)).unwrap(),
        })
        .await
        .unwrap();
    ledger
        .set_commission_rate(RateOverride {
            beneficiary_id: "jon".to_string(),
            service_id: Some("kite".to_string()),
            rate: CommissionRate::fixed(dec!(25)).unwrap(),
        })
        .await
        .unwrap();

    let (rate, source) = ledger
        .resolve_commission_rate("jon", Some("kite"), None)
        .await
        .unwrap();
    assert_eq!(source, RateSource::ServiceOverride);
    assert_eq!(rate, CommissionRate::fixed(dec!(25)).unwrap());

    let (rate, source) = ledger
        .resolve_commission_rate("jon", Some("surf"), None)
        .await
        .unwrap();
    assert_eq!(source, RateSource::BeneficiaryDefault);
    assert_eq!(rate.value, dec!(30));

    let (_, source) = ledger
        .resolve_commission_rate(
            "jon",
            Some("kite"),
            Some(CommissionRate::percentage(dec!(10)).unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(source, RateSource::SourceOverride);

    let (_, source) = ledger.resolve_commission_rate("kim", None, None).await.unwrap();
    assert_eq!(source, RateSource::SystemDefault);

    let kite = ledger
        .record_booking_commission(BookingCompleted {
            service_id: Some("kite".to_string()),
            ..booking("bk-3", "jon", 90_00)
        })
        .await
        .unwrap();
    // Fixed rates are per hour when a duration is known.
    assert_eq!(kite.commission().computed_amount, eur(50_00));

    let surf = ledger
        .record_booking_commission(BookingCompleted {
            service_id: Some("surf".to_string()),
            ..booking("bk-4", "jon", 90_00)
        })
        .await
        .unwrap();
    assert_eq!(surf.commission().computed_amount, eur(27_00));
}

#[tokio::test]
async fn stored_rate_is_replaced_not_duplicated() {
    let (ledger, _db) = ledger_with_db().await;
    for value in [dec!(30), dec!(35)] {
        ledger
            .set_commission_rate(RateOverride {
                beneficiary_id: "liv".to_string(),
                service_id: None,
                rate: CommissionRate::percentage(value).unwrap(),
            })
            .await
            .unwrap();
    }
    let (rate, _) = ledger.resolve_commission_rate("liv", None, None).await.unwrap();
    assert_eq!(rate.value, dec!(35));

    let err = ledger
        .set_commission_rate(RateOverride {
            beneficiary_id: "liv".to_string(),
            service_id: None,
            rate: CommissionRate {
                rate_type: ledger::RateType::Percentage,
                value: dec!(120),
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRate(_)));
}

#[tokio::test]
async fn package_booking_is_pro_rated() {
    let (ledger, _db) = ledger_with_db().await;
    let outcome = ledger
        .record_booking_commission(BookingCompleted {
            amount: Money::ZERO,
            duration_hours: Some(dec!(1.5)),
            package: Some(PackageUsage {
                package_id: "pk-1".to_string(),
                purchase_price: Money::new(300_00),
                currency: Currency::Eur,
                total_hours: Some(dec!(10)),
                total_sessions: None,
            }),
            ..booking("bk-5", "max", 0)
        })
        .await
        .unwrap();
    let commission = outcome.commission();
    assert_eq!(commission.source_amount, eur(45_00));
    assert_eq!(commission.computed_amount, eur(22_50));
}

#[tokio::test]
async fn foreign_amounts_are_converted_to_the_canonical_currency() {
    let converter = StaticRateConverter::new(Currency::Eur).rate(Currency::Usd, dec!(0.9));
    let (ledger, _db) = ledger_with(
        LedgerConfig::default(),
        CommissionSettings::default(),
        Some(Arc::new(converter)),
    )
    .await;

    let converted = ledger
        .record_booking_commission(BookingCompleted {
            currency: Currency::Usd,
            ..booking("bk-6", "ned", 100_00)
        })
        .await
        .unwrap();
    let commission = converted.commission();
    assert_eq!(commission.source_currency, Currency::Usd);
    assert_eq!(commission.source_amount, Money::new(100_00));
    assert_eq!(commission.computed_currency, Currency::Eur);
    assert_eq!(commission.computed_amount, eur(45_00));

    // No GBP rate: the commission stays in the source currency.
    let fallback = ledger
        .record_booking_commission(BookingCompleted {
            currency: Currency::Gbp,
            ..booking("bk-7", "ned", 60_00)
        })
        .await
        .unwrap();
    assert_eq!(fallback.commission().computed_currency, Currency::Gbp);
    assert_eq!(fallback.commission().computed_amount, Money::new(30_00));

    // A fixed rate is a canonical amount: no conversion needed, even without a GBP rate.
    let fixed = ledger
        .record_booking_commission(BookingCompleted {
            currency: Currency::Gbp,
            rate_override: Some(CommissionRate::fixed(dec!(12)).unwrap()),
            ..booking("bk-8", "ned", 60_00)
        })
        .await
        .unwrap();
    assert_eq!(fixed.commission().computed_currency, Currency::Eur);
    assert_eq!(fixed.commission().computed_amount, eur(24_00));
}

#[tokio::test]
async fn oversized_duration_is_rejected_without_a_commission() {
    let (ledger, db) = ledger_with_db().await;
    let err = ledger
        .record_booking_commission(BookingCompleted {
            duration_hours: Some(rust_decimal::Decimal::MAX / dec!(10)),
            rate_override: Some(CommissionRate::fixed(dec!(1000)).unwrap()),
            ..booking("bk-huge", "ned", 40_00)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
    assert_eq!(err.kind(), "invalid_amount");
    assert_eq!(common::count_rows(&db, "commissions").await, 0);
}

#[tokio::test]
async fn paying_a_commission_credits_the_beneficiary_once() {
    let (ledger, _db) = ledger_with_db().await;
    let commission = ledger
        .record_rental_commission(rental("rt-1", "ola", 60_00))
        .await
        .unwrap()
        .commission()
        .clone();
    assert_eq!(commission.source_type, SourceType::Rental);
    assert_eq!(commission.computed_amount, eur(30_00));
    assert_eq!(commission.period, "2026-04");

    let paid = ledger.mark_commission_paid(commission.id).await.unwrap();
    assert_eq!(paid.status, CommissionStatus::Paid);
    let again = ledger.mark_commission_paid(commission.id).await.unwrap();
    assert_eq!(again.status, CommissionStatus::Paid);

    let entries = ledger
        .ledger_entries("ola", Currency::Eur, Some(EntryStatus::Completed))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].transaction_type, TransactionType::CommissionPayout);
    assert_eq!(
        entries[0].idempotency_key.as_deref(),
        Some(format!("commission-payout:{}", commission.id).as_str())
    );
    assert_eq!(
        ledger.balance("ola", Currency::Eur).await.unwrap().available,
        eur(30_00)
    );
}

#[tokio::test]
async fn cancelling_a_paid_commission_reverses_the_payout() {
    let (ledger, _db) = ledger_with_db().await;
    let commission = ledger
        .record_rental_commission(rental("rt-2", "pat", 40_00))
        .await
        .unwrap()
        .commission()
        .clone();
    ledger.mark_commission_paid(commission.id).await.unwrap();

    let cancelled = ledger
        .cancel_commission(SourceType::Rental, "rt-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, CommissionStatus::Cancelled);

    let balance = ledger.balance("pat", Currency::Eur).await.unwrap();
    assert_eq!(balance.available, Money::ZERO);
    let kinds: Vec<TransactionType> = ledger
        .ledger_entries("pat", Currency::Eur, None)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.transaction_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransactionType::CommissionPayout,
            TransactionType::CommissionReversal
        ]
    );

    let err = ledger.mark_commission_paid(commission.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStatus(_)));
}

#[tokio::test]
async fn cancelled_source_can_be_recorded_again() {
    let (ledger, _db) = ledger_with_db().await;
    ledger
        .record_booking_commission(booking("bk-8", "quin", 40_00))
        .await
        .unwrap();

    assert!(
        ledger
            .cancel_commission(SourceType::Booking, "bk-8")
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        ledger
            .cancel_commission(SourceType::Booking, "bk-8")
            .await
            .unwrap()
            .is_none()
    );

    let again = ledger
        .record_booking_commission(booking("bk-8", "quin", 40_00))
        .await
        .unwrap();
    assert!(again.is_created());
    assert_eq!(ledger.commissions_for("quin", None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn summary_groups_by_currency_and_status() {
    let converter = StaticRateConverter::new(Currency::Eur);
    let (ledger, _db) = ledger_with(
        LedgerConfig::default(),
        CommissionSettings::default(),
        Some(Arc::new(converter)),
    )
    .await;

    let paid = ledger
        .record_booking_commission(booking("bk-9", "rob", 40_00))
        .await
        .unwrap()
        .commission()
        .id;
    ledger.mark_commission_paid(paid).await.unwrap();
    ledger
        .record_booking_commission(booking("bk-10", "rob", 20_00))
        .await
        .unwrap();
    ledger
        .record_booking_commission(booking("bk-11", "rob", 10_00))
        .await
        .unwrap();
    ledger
        .cancel_commission(SourceType::Booking, "bk-11")
        .await
        .unwrap();
    ledger
        .record_booking_commission(BookingCompleted {
            currency: Currency::Try,
            ..booking("bk-12", "rob", 100_00)
        })
        .await
        .unwrap();

    let summary = ledger.commission_summary("rob", Some("2026-03")).await.unwrap();
    let eur_totals = summary.totals[&Currency::Eur];
    assert_eq!(eur_totals.paid, eur(20_00));
    assert_eq!(eur_totals.pending, eur(10_00));
    assert_eq!(eur_totals.count, 2);
    assert_eq!(eur_totals.cancelled, 1);
    assert_eq!(summary.totals[&Currency::Try].pending, Money::new(50_00));

    let other_period = ledger.commission_summary("rob", Some("2026-05")).await.unwrap();
    assert!(other_period.totals.is_empty());
}

#[tokio::test]
async fn negative_source_amount_is_rejected() {
    let (ledger, _db) = ledger_with_db().await;
    let err = ledger
        .record_booking_commission(booking("bk-13", "sue", -1_00))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}
