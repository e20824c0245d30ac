//! Commission schema.
//!
//! - `commission_rates`: beneficiary defaults and per-service overrides
//! - `commissions`: one live row per `(source_type, source_id)`

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum CommissionRates {
    Table,
    Id,
    BeneficiaryId,
    ServiceId,
    RateType,
    Rate,
    UpdatedAt,
}

#[derive(Iden)]
enum Commissions {
    Table,
    Id,
    BeneficiaryId,
    SourceType,
    SourceId,
    SourceAmountMinor,
    SourceCurrency,
    Rate,
    RateType,
    RateSource,
    ComputedAmountMinor,
    ComputedCurrency,
    Period,
    Status,
    CreatedAt,
    UpdatedAt,
}

// Partial index: cancelled rows keep their history without blocking a new
// commission for the same source. Same syntax on SQLite and Postgres.
const LIVE_SOURCE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS \
    \"uidx-commissions-source-live\" ON commissions (source_type, source_id) \
    WHERE status <> 'cancelled'";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CommissionRates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CommissionRates::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CommissionRates::BeneficiaryId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CommissionRates::ServiceId).string())
                    .col(ColumnDef::new(CommissionRates::RateType).string().not_null())
                    .col(ColumnDef::new(CommissionRates::Rate).string().not_null())
                    .col(
                        ColumnDef::new(CommissionRates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-commission_rates-beneficiary_id")
                    .table(CommissionRates::Table)
                    .col(CommissionRates::BeneficiaryId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Commissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Commissions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Commissions::BeneficiaryId).string().not_null())
                    .col(ColumnDef::new(Commissions::SourceType).string().not_null())
                    .col(ColumnDef::new(Commissions::SourceId).string().not_null())
                    .col(
                        ColumnDef::new(Commissions::SourceAmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Commissions::SourceCurrency).string().not_null())
                    .col(ColumnDef::new(Commissions::Rate).string().not_null())
                    .col(ColumnDef::new(Commissions::RateType).string().not_null())
                    .col(ColumnDef::new(Commissions::RateSource).string().not_null())
                    .col(
                        ColumnDef::new(Commissions::ComputedAmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Commissions::ComputedCurrency)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Commissions::Period).string().not_null())
                    .col(
                        ColumnDef::new(Commissions::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Commissions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Commissions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(LIVE_SOURCE_INDEX)
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-commissions-beneficiary_id-period")
                    .table(Commissions::Table)
                    .col(Commissions::BeneficiaryId)
                    .col(Commissions::Period)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Commissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CommissionRates::Table).to_owned())
            .await?;
        Ok(())
    }
}
