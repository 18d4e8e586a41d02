use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use parts_tracker::{
    config::{self, AppConfig},
    db::{self, DbPool},
    services::seed::{self, SeedReport},
};

#[derive(Parser)]
#[command(
    name = "tracker-cli",
    about = "Maintenance commands for the parts tracker database",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Database URL overriding the configured one"
    )]
    database_url: Option<String>,
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Skip applying pending migrations before seeding"
    )]
    no_migrate: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the built-in roles and the first administrator
    Seed,
    /// Wipe the database and load the end-to-end test fixture
    SeedCypress,
    /// Apply pending migrations
    Migrate,
}

struct CliContext {
    config: AppConfig,
    db: DbPool,
}

impl CliContext {
    async fn initialize(database_url: Option<String>) -> Result<Self> {
        let mut config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);
        if let Some(url) = database_url {
            config.database_url = url;
        }

        let db = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        Ok(Self { config, db })
    }

    async fn migrate(&self) -> Result<()> {
        db::run_migrations(&self.db)
            .await
            .context("failed to apply migrations")
    }
}

fn print_report(report: &SeedReport) {
    for line in &report.lines {
        println!("{}", line);
    }
    if let Some(password) = &report.admin_password {
        println!("Пароль: {}", password);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize(cli.database_url).await?;

    match cli.command {
        Commands::Migrate => {
            context.migrate().await?;
            println!("Миграции применены.");
        }
        Commands::Seed => {
            if !cli.no_migrate {
                context.migrate().await?;
            }
            let report = seed::seed(
                &context.db,
                context.config.is_production(),
                context.config.default_admin_password.as_deref(),
            )
            .await
            .context("seeding failed")?;
            print_report(&report);
            if report.admin_password.is_some() {
                println!(
                    "ВАЖНО: Этот пароль отображается только один раз. Сохраните его в надежном месте."
                );
            }
        }
        Commands::SeedCypress => {
            if !cli.no_migrate {
                context.migrate().await?;
            }
            let report = seed::seed_cypress(&context.db)
                .await
                .context("seeding the test fixture failed")?;
            print_report(&report);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["tracker-cli", "seed-cypress", "--no-migrate"]);
        assert!(matches!(cli.command, Commands::SeedCypress));
        assert!(cli.no_migrate);
    }
}
