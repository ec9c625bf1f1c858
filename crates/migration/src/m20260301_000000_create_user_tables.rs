//! Canonical users and their federated account links.
//!
//! - user: one row per person, unique by email
//! - user_account: `(id, type)` at an identity provider pointing at a user

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(User::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(User::Email).string().not_null().unique_key())
                    .col(
                        ColumnDef::new(User::EmailVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(User::GivenName).string().null())
                    .col(ColumnDef::new(User::FamilyName).string().null())
                    .col(ColumnDef::new(User::MiddleName).string().null())
                    .col(ColumnDef::new(User::Nickname).string().null())
                    .col(ColumnDef::new(User::PreferredUsername).string().null())
                    .col(ColumnDef::new(User::Profile).string().null())
                    .col(ColumnDef::new(User::Picture).string().null())
                    .col(ColumnDef::new(User::Website).string().null())
                    .col(ColumnDef::new(User::Gender).string().null())
                    .col(ColumnDef::new(User::Birthdate).string().null())
                    .col(ColumnDef::new(User::Zoneinfo).string().null())
                    .col(ColumnDef::new(User::Locale).string().null())
                    .col(ColumnDef::new(User::PhoneNumber).string().null())
                    .col(
                        ColumnDef::new(User::PhoneNumberVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(User::Address).text().null())
                    .col(
                        ColumnDef::new(User::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(User::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserAccount::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UserAccount::Id).string().not_null())
                    .col(ColumnDef::new(UserAccount::Type).string().not_null())
                    .col(ColumnDef::new(UserAccount::UserId).string().not_null())
                    .col(
                        ColumnDef::new(UserAccount::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserAccount::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(UserAccount::Id)
                            .col(UserAccount::Type),
                    )
                    .to_owned(),
            )
            .await?;

        // Users may live in a remote directory, so user_id carries no foreign key.
        manager
            .create_index(
                Index::create()
                    .name("idx_user_account_user_id")
                    .table(UserAccount::Table)
                    .col(UserAccount::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserAccount::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum User {
    Table,
    Id,
    Email,
    EmailVerified,
    GivenName,
    FamilyName,
    MiddleName,
    Nickname,
    PreferredUsername,
    Profile,
    Picture,
    Website,
    Gender,
    Birthdate,
    Zoneinfo,
    Locale,
    PhoneNumber,
    PhoneNumberVerified,
    Address,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum UserAccount {
    Table,
    Id,
    Type,
    UserId,
    CreatedAt,
    UpdatedAt,
}
