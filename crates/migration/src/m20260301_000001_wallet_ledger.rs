//! Wallet ledger schema.
//!
//! - `wallet_accounts`: per-account policy (overdraft, multi-currency)
//! - `wallet_balances`: balance cache, one row per `(user_id, currency)`
//! - `wallet_transactions`: append-only ledger entries
//! - `balance_audits`: before/after trail of mutations and corrections

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum WalletAccounts {
    Table,
    UserId,
    AllowOverdraft,
    MultiCurrency,
    UpdatedAt,
}

#[derive(Iden)]
enum WalletBalances {
    Table,
    UserId,
    Currency,
    AvailableMinor,
    PendingMinor,
    NonWithdrawableMinor,
    TotalCreditsMinor,
    TotalDebitsMinor,
    TotalSpentMinor,
    LastPaymentAt,
    UpdatedAt,
}

#[derive(Iden)]
enum WalletTransactions {
    Table,
    Id,
    UserId,
    Currency,
    AmountMinor,
    TransactionType,
    Status,
    IdempotencyKey,
    ReferenceNumber,
    Metadata,
    CreatedAt,
    CreatedBy,
}

#[derive(Iden)]
enum BalanceAudits {
    Table,
    Id,
    UserId,
    Currency,
    PreviousBalanceMinor,
    NewBalanceMinor,
    DiffMinor,
    Reason,
    TriggeredBy,
    TransactionId,
    CreatedAt,
}

fn money(column: impl IntoIden) -> ColumnDef {
    ColumnDef::new(column)
        .big_integer()
        .not_null()
        .default(0)
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WalletAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WalletAccounts::UserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WalletAccounts::AllowOverdraft)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(WalletAccounts::MultiCurrency)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(WalletAccounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WalletBalances::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(WalletBalances::UserId).string().not_null())
                    .col(ColumnDef::new(WalletBalances::Currency).string().not_null())
                    .col(&mut money(WalletBalances::AvailableMinor))
                    .col(&mut money(WalletBalances::PendingMinor))
                    .col(&mut money(WalletBalances::NonWithdrawableMinor))
                    .col(&mut money(WalletBalances::TotalCreditsMinor))
                    .col(&mut money(WalletBalances::TotalDebitsMinor))
                    .col(&mut money(WalletBalances::TotalSpentMinor))
                    .col(ColumnDef::new(WalletBalances::LastPaymentAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(WalletBalances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(WalletBalances::UserId)
                            .col(WalletBalances::Currency),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WalletTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WalletTransactions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WalletTransactions::UserId).string().not_null())
                    .col(ColumnDef::new(WalletTransactions::Currency).string().not_null())
                    .col(
                        ColumnDef::new(WalletTransactions::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WalletTransactions::TransactionType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WalletTransactions::Status)
                            .string()
                            .not_null()
                            .default("completed"),
                    )
                    .col(ColumnDef::new(WalletTransactions::IdempotencyKey).string())
                    .col(ColumnDef::new(WalletTransactions::ReferenceNumber).string())
                    .col(ColumnDef::new(WalletTransactions::Metadata).text())
                    .col(
                        ColumnDef::new(WalletTransactions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WalletTransactions::CreatedBy).string().not_null())
                    .to_owned(),
            )
            .await?;

        // NULL keys never collide, so entries without a key are unconstrained.
        manager
            .create_index(
                Index::create()
                    .name("uidx-wallet_transactions-idempotency_key")
                    .table(WalletTransactions::Table)
                    .col(WalletTransactions::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-wallet_transactions-user_id-currency-created_at")
                    .table(WalletTransactions::Table)
                    .col(WalletTransactions::UserId)
                    .col(WalletTransactions::Currency)
                    .col(WalletTransactions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-wallet_transactions-created_at")
                    .table(WalletTransactions::Table)
                    .col(WalletTransactions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BalanceAudits::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BalanceAudits::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BalanceAudits::UserId).string().not_null())
                    .col(ColumnDef::new(BalanceAudits::Currency).string().not_null())
                    .col(
                        ColumnDef::new(BalanceAudits::PreviousBalanceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BalanceAudits::NewBalanceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BalanceAudits::DiffMinor).big_integer().not_null())
                    .col(ColumnDef::new(BalanceAudits::Reason).string().not_null())
                    .col(ColumnDef::new(BalanceAudits::TriggeredBy).string().not_null())
                    .col(ColumnDef::new(BalanceAudits::TransactionId).string())
                    .col(
                        ColumnDef::new(BalanceAudits::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-balance_audits-user_id-created_at")
                    .table(BalanceAudits::Table)
                    .col(BalanceAudits::UserId)
                    .col(BalanceAudits::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BalanceAudits::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WalletTransactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WalletBalances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WalletAccounts::Table).to_owned())
            .await?;
        Ok(())
    }
}
