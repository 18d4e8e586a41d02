use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_access_tables::Migration),
            Box::new(m20240301_000002_create_routing_tables::Migration),
            Box::new(m20240301_000003_create_parts_tables::Migration),
            Box::new(m20240301_000004_create_event_tables::Migration),
        ]
    }
}

mod m20240301_000001_create_access_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_access_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Roles::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Roles::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Roles::Name).string_len(64).not_null().unique_key())
                        .col(
                            ColumnDef::new(Roles::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Roles::Permissions)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Users::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Users::Username)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Users::PasswordHash).string_len(256).not_null())
                        .col(ColumnDef::new(Users::RoleId).integer().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_users_role_id")
                                .from(Users::Table, Users::RoleId)
                                .to(Roles::Table, Roles::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Roles::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Roles {
        Table,
        Id,
        Name,
        IsDefault,
        Permissions,
    }

    #[derive(DeriveIden)]
    pub enum Users {
        Table,
        Id,
        Username,
        PasswordHash,
        RoleId,
    }
}

mod m20240301_000002_create_routing_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_routing_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Stages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Stages::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Stages::Name).string_len(100).not_null().unique_key())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RouteTemplates::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RouteTemplates::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(RouteTemplates::Name)
                                .string_len(150)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(RouteTemplates::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RouteStages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RouteStages::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(RouteStages::TemplateId).integer().not_null())
                        .col(ColumnDef::new(RouteStages::StageId).integer().not_null())
                        .col(ColumnDef::new(RouteStages::Position).integer().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_route_stages_template_id")
                                .from(RouteStages::Table, RouteStages::TemplateId)
                                .to(RouteTemplates::Table, RouteTemplates::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_route_stages_stage_id")
                                .from(RouteStages::Table, RouteStages::StageId)
                                .to(Stages::Table, Stages::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_route_stages_template_position")
                        .table(RouteStages::Table)
                        .col(RouteStages::TemplateId)
                        .col(RouteStages::Position)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RouteStages::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RouteTemplates::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Stages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Stages {
        Table,
        Id,
        Name,
    }

    #[derive(DeriveIden)]
    pub enum RouteTemplates {
        Table,
        Id,
        Name,
        IsDefault,
    }

    #[derive(DeriveIden)]
    pub enum RouteStages {
        Table,
        Id,
        TemplateId,
        StageId,
        Position,
    }
}

mod m20240301_000003_create_parts_tables {
    use super::m20240301_000001_create_access_tables::Users;
    use super::m20240301_000002_create_routing_tables::RouteTemplates;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_parts_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Parts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Parts::PartId)
                                .string_len(100)
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Parts::ProductDesignation)
                                .string_len(200)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Parts::Name).string_len(200).not_null())
                        .col(ColumnDef::new(Parts::Material).string_len(100).not_null())
                        .col(ColumnDef::new(Parts::Size).string_len(100).null())
                        .col(
                            ColumnDef::new(Parts::DateAdded)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Parts::CurrentStatus)
                                .string_len(100)
                                .not_null()
                                .default("На складе"),
                        )
                        .col(
                            ColumnDef::new(Parts::LastUpdate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Parts::QuantityTotal)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Parts::QuantityCompleted)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Parts::QuantityScrapped)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Parts::DrawingFilename).string_len(255).null())
                        .col(ColumnDef::new(Parts::RouteTemplateId).integer().null())
                        .col(ColumnDef::new(Parts::ResponsibleId).integer().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_parts_route_template_id")
                                .from(Parts::Table, Parts::RouteTemplateId)
                                .to(RouteTemplates::Table, RouteTemplates::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_parts_responsible_id")
                                .from(Parts::Table, Parts::ResponsibleId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_parts_product_designation")
                        .table(Parts::Table)
                        .col(Parts::ProductDesignation)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(AssemblyComponents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AssemblyComponents::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(AssemblyComponents::ParentId)
                                .string_len(100)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssemblyComponents::ChildId)
                                .string_len(100)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssemblyComponents::Quantity)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_assembly_components_parent_id")
                                .from(AssemblyComponents::Table, AssemblyComponents::ParentId)
                                .to(Parts::Table, Parts::PartId)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_assembly_components_child_id")
                                .from(AssemblyComponents::Table, AssemblyComponents::ChildId)
                                .to(Parts::Table, Parts::PartId)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_assembly_components_parent_child")
                        .table(AssemblyComponents::Table)
                        .col(AssemblyComponents::ParentId)
                        .col(AssemblyComponents::ChildId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AssemblyComponents::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Parts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Parts {
        Table,
        PartId,
        ProductDesignation,
        Name,
        Material,
        Size,
        DateAdded,
        CurrentStatus,
        LastUpdate,
        QuantityTotal,
        QuantityCompleted,
        QuantityScrapped,
        DrawingFilename,
        RouteTemplateId,
        ResponsibleId,
    }

    #[derive(DeriveIden)]
    pub enum AssemblyComponents {
        Table,
        Id,
        ParentId,
        ChildId,
        Quantity,
    }
}

mod m20240301_000004_create_event_tables {
    use super::m20240301_000001_create_access_tables::Users;
    use super::m20240301_000002_create_routing_tables::Stages;
    use super::m20240301_000003_create_parts_tables::Parts;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_event_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StatusHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StatusHistory::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StatusHistory::PartId).string_len(100).not_null())
                        .col(ColumnDef::new(StatusHistory::Status).string_len(100).not_null())
                        .col(
                            ColumnDef::new(StatusHistory::OperatorName)
                                .string_len(100)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StatusHistory::Timestamp)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StatusHistory::Quantity)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(StatusHistory::StatusType)
                                .string_len(16)
                                .not_null()
                                .default("completed"),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_status_history_part_id")
                                .from(StatusHistory::Table, StatusHistory::PartId)
                                .to(Parts::Table, Parts::PartId)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_status_history_part_timestamp")
                        .table(StatusHistory::Table)
                        .col(StatusHistory::PartId)
                        .col(StatusHistory::Timestamp)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(AuditLogs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AuditLogs::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(AuditLogs::PartId).string_len(100).null())
                        .col(ColumnDef::new(AuditLogs::UserId).integer().not_null())
                        .col(
                            ColumnDef::new(AuditLogs::Timestamp)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AuditLogs::Action).string_len(100).not_null())
                        .col(ColumnDef::new(AuditLogs::Details).text().null())
                        .col(
                            ColumnDef::new(AuditLogs::Category)
                                .string_len(50)
                                .not_null()
                                .default("general"),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_audit_logs_user_id")
                                .from(AuditLogs::Table, AuditLogs::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_audit_logs_category_timestamp")
                        .table(AuditLogs::Table)
                        .col(AuditLogs::Category)
                        .col(AuditLogs::Timestamp)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PartNotes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PartNotes::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PartNotes::PartId).string_len(100).not_null())
                        .col(ColumnDef::new(PartNotes::UserId).integer().not_null())
                        .col(ColumnDef::new(PartNotes::StageId).integer().null())
                        .col(
                            ColumnDef::new(PartNotes::Timestamp)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PartNotes::Text).text().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_part_notes_part_id")
                                .from(PartNotes::Table, PartNotes::PartId)
                                .to(Parts::Table, Parts::PartId)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_part_notes_user_id")
                                .from(PartNotes::Table, PartNotes::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_part_notes_stage_id")
                                .from(PartNotes::Table, PartNotes::StageId)
                                .to(Stages::Table, Stages::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ResponsibleHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ResponsibleHistory::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ResponsibleHistory::PartId)
                                .string_len(100)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ResponsibleHistory::UserId).integer().null())
                        .col(
                            ColumnDef::new(ResponsibleHistory::Timestamp)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_responsible_history_part_id")
                                .from(ResponsibleHistory::Table, ResponsibleHistory::PartId)
                                .to(Parts::Table, Parts::PartId)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_responsible_history_user_id")
                                .from(ResponsibleHistory::Table, ResponsibleHistory::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ResponsibleHistory::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PartNotes::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(AuditLogs::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StatusHistory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StatusHistory {
        Table,
        Id,
        PartId,
        Status,
        OperatorName,
        Timestamp,
        Quantity,
        StatusType,
    }

    #[derive(DeriveIden)]
    enum AuditLogs {
        Table,
        Id,
        PartId,
        UserId,
        Timestamp,
        Action,
        Details,
        Category,
    }

    #[derive(DeriveIden)]
    enum PartNotes {
        Table,
        Id,
        PartId,
        UserId,
        StageId,
        Timestamp,
        Text,
    }

    #[derive(DeriveIden)]
    enum ResponsibleHistory {
        Table,
        Id,
        PartId,
        UserId,
        Timestamp,
    }
}
