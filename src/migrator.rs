use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_products_table::Migration),
            Box::new(m20240301_000002_create_users_table::Migration),
            Box::new(m20240301_000003_create_orders_table::Migration),
            Box::new(m20240301_000004_create_coupon_tables::Migration),
            Box::new(m20240301_000005_create_refunds_table::Migration),
        ]
    }
}

mod m20240301_000001_create_products_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Price).decimal_len(12, 2).not_null())
                        .col(
                            ColumnDef::new(Products::Stock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::BookingCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::IsPublished)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Products::MinAge).integer().null())
                        .col(ColumnDef::new(Products::MaxAge).integer().null())
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Name,
        Price,
        Stock,
        BookingCount,
        IsPublished,
        MinAge,
        MaxAge,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_users_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Users::Nickname).string().not_null())
                        .col(ColumnDef::new(Users::PaymentAccountId).string().null())
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Users {
        Table,
        Id,
        Nickname,
        PaymentAccountId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNo).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ProductId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::PaidAmount)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::ParticipantName).string().not_null())
                        .col(ColumnDef::new(Orders::ParticipantAge).integer().null())
                        .col(ColumnDef::new(Orders::ParticipantPhone).string().not_null())
                        .col(
                            ColumnDef::new(Orders::ParticipantCount)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::TravelDate).date().not_null())
                        .col(ColumnDef::new(Orders::Remark).text().null())
                        .col(ColumnDef::new(Orders::TransactionId).string().null())
                        .col(
                            ColumnDef::new(Orders::StockDeducted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::StockShortfall)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::ReminderSent)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::ReminderSentAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::PaidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // The retry loop in order creation relies on this index to detect collisions
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_orders_order_no")
                        .table(Orders::Table)
                        .col(Orders::OrderNo)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status_travel_date")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .col(Orders::TravelDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderCoupons::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderCoupons::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderCoupons::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderCoupons::CouponId).uuid().not_null())
                        .col(ColumnDef::new(OrderCoupons::UserCouponId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderCoupons::DiscountAmount)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderCoupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_order_coupons_order_id")
                        .table(OrderCoupons::Table)
                        .col(OrderCoupons::OrderId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderCoupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNo,
        UserId,
        ProductId,
        Status,
        TotalAmount,
        PaidAmount,
        ParticipantName,
        ParticipantAge,
        ParticipantPhone,
        ParticipantCount,
        TravelDate,
        Remark,
        TransactionId,
        StockDeducted,
        StockShortfall,
        ReminderSent,
        ReminderSentAt,
        CreatedAt,
        UpdatedAt,
        PaidAt,
        ConfirmedAt,
        CompletedAt,
        CancelledAt,
    }

    #[derive(DeriveIden)]
    enum OrderCoupons {
        Table,
        Id,
        OrderId,
        CouponId,
        UserCouponId,
        DiscountAmount,
        CreatedAt,
    }
}

mod m20240301_000004_create_coupon_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_coupon_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Coupons::Name).string().not_null())
                        .col(ColumnDef::new(Coupons::CouponType).string_len(16).not_null())
                        .col(ColumnDef::new(Coupons::Value).decimal_len(12, 2).not_null())
                        .col(ColumnDef::new(Coupons::MinAmount).decimal_len(12, 2).null())
                        .col(
                            ColumnDef::new(Coupons::MaxDiscount)
                                .decimal_len(12, 2)
                                .null(),
                        )
                        .col(ColumnDef::new(Coupons::TotalQuantity).integer().not_null())
                        .col(
                            ColumnDef::new(Coupons::ClaimedQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::LimitPerUser)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Coupons::ValidFrom)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::ValidUntil)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::IsEnabled)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UserCoupons::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserCoupons::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UserCoupons::UserId).uuid().not_null())
                        .col(ColumnDef::new(UserCoupons::CouponId).uuid().not_null())
                        .col(ColumnDef::new(UserCoupons::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(UserCoupons::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UserCoupons::UsedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(UserCoupons::OrderId).uuid().null())
                        .col(
                            ColumnDef::new(UserCoupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One claim per user and coupon; concurrent duplicate claims fail here
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_user_coupons_user_coupon")
                        .table(UserCoupons::Table)
                        .col(UserCoupons::UserId)
                        .col(UserCoupons::CouponId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UserCoupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        Name,
        CouponType,
        Value,
        MinAmount,
        MaxDiscount,
        TotalQuantity,
        ClaimedQuantity,
        LimitPerUser,
        ValidFrom,
        ValidUntil,
        IsEnabled,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum UserCoupons {
        Table,
        Id,
        UserId,
        CouponId,
        Status,
        ExpiresAt,
        UsedAt,
        OrderId,
        CreatedAt,
    }
}

mod m20240301_000005_create_refunds_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_refunds_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Refunds::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Refunds::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Refunds::RefundNo).string_len(32).not_null())
                        .col(ColumnDef::new(Refunds::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Refunds::UserId).uuid().not_null())
                        .col(ColumnDef::new(Refunds::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Refunds::Amount).decimal_len(12, 2).not_null())
                        .col(ColumnDef::new(Refunds::Reason).string().not_null())
                        .col(ColumnDef::new(Refunds::Description).text().null())
                        .col(ColumnDef::new(Refunds::AdminNote).text().null())
                        .col(ColumnDef::new(Refunds::GatewayRefundId).string().null())
                        .col(ColumnDef::new(Refunds::FailureReason).text().null())
                        .col(
                            ColumnDef::new(Refunds::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Refunds::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Refunds::ApprovedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Refunds::RejectedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Refunds::ProcessingAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Refunds::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Refunds::FailedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_refunds_refund_no")
                        .table(Refunds::Table)
                        .col(Refunds::RefundNo)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_refunds_order_id")
                        .table(Refunds::Table)
                        .col(Refunds::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Refunds::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Refunds {
        Table,
        Id,
        RefundNo,
        OrderId,
        UserId,
        Status,
        Amount,
        Reason,
        Description,
        AdminNote,
        GatewayRefundId,
        FailureReason,
        CreatedAt,
        UpdatedAt,
        ApprovedAt,
        RejectedAt,
        ProcessingAt,
        CompletedAt,
        FailedAt,
    }
}
