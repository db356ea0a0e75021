use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use chrono::{DateTime, Utc};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use regatta::authz::{
    GrantStatus, PermissionChecker, ResourceContext, ResourceState, Role, TemporaryAccessGrant, UserContext,
};
use regatta::config::AccessConfig;
use regatta::db::SqliteConfigStore;
use regatta::utils::{Clock, ManualClock, SystemClock};

#[derive(Parser, Debug)]
#[command(author, version, about = "regatta operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Print the current event phase
    Phase,
    /// Grant a user temporary editing access
    Grant {
        user_id: String,
        #[arg(long)]
        hours: Option<i64>,
        #[arg(long, default_value = "cli")]
        admin: String,
    },
    /// Revoke a user's temporary editing access
    Revoke {
        user_id: String,
        #[arg(long, default_value = "cli")]
        admin: String,
    },
    /// List temporary access grants
    Grants {
        #[arg(long)]
        status: Option<GrantStatus>,
    },
    /// Restore the default permission matrix
    ResetPermissions {
        #[arg(long, default_value = "cli")]
        admin: String,
    },
    /// Evaluate one permission check and print the decision
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(long)]
    user: String,
    #[arg(long, default_value = "team_manager")]
    role: Role,
    #[arg(long)]
    action: String,
    #[arg(long, default_value = "unspecified")]
    resource_type: String,
    #[arg(long)]
    resource_id: Option<String>,
    /// Crew member state: already assigned to a boat
    #[arg(long, conflicts_with = "paid")]
    assigned: Option<bool>,
    /// Boat registration state: already paid
    #[arg(long)]
    paid: Option<bool>,
    /// Act as this team manager (admin role only)
    #[arg(long)]
    impersonate: Option<String>,
    /// Evaluate as of this RFC 3339 instant instead of now
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::Phase => {
            let checker = get_checker().await?;
            println!("{:?}", checker.phases().current_phase().await);
        }
        Commands::Grant { user_id, hours, admin } => {
            let checker = get_checker().await?;
            let grant = checker.grants().grant(&user_id, &admin, hours).await?;
            print_grant(&grant);
        }
        Commands::Revoke { user_id, admin } => {
            let checker = get_checker().await?;
            let grant = checker.grants().revoke(&user_id, &admin).await?;
            print_grant(&grant);
        }
        Commands::Grants { status } => {
            let checker = get_checker().await?;
            let grants = checker.grants().list(status).await?;
            println!("{:<24} {:<8} {:<26} {}", "User", "Status", "Expires", "Granted by");
            for grant in &grants {
                print_grant(grant);
            }
        }
        Commands::ResetPermissions { admin } => {
            let checker = get_checker().await?;
            checker.permissions().reset_permissions(&admin).await?;
            println!("Permission matrix reset to defaults");
        }
        Commands::Check(args) => {
            let clock: Arc<dyn Clock> = match args.at {
                Some(at) => Arc::new(ManualClock::new(at)),
                None => Arc::new(SystemClock),
            };
            let checker = get_checker_at(clock).await?;
            let user = build_user(&checker, &args).await?;
            let resource = build_resource(&args);
            let result = checker.check_named(&user, &args.action, &resource).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

async fn build_user(checker: &PermissionChecker, args: &CheckArgs) -> anyhow::Result<UserContext> {
    match (&args.impersonate, args.role) {
        (Some(team_manager), Role::Admin) => {
            Ok(UserContext::new(args.user.as_str(), Role::Admin).impersonating(team_manager.as_str()))
        }
        (Some(_), _) => anyhow::bail!("only admins may impersonate"),
        (None, Role::TeamManager) => {
            let has_grant = checker.grants().is_active(&args.user).await;
            Ok(UserContext::team_manager(args.user.as_str()).with_temporary_access(has_grant))
        }
        (None, role) => Ok(UserContext::new(args.user.as_str(), role)),
    }
}

fn build_resource(args: &CheckArgs) -> ResourceContext {
    let state = match (args.assigned, args.paid) {
        (Some(assigned), _) => ResourceState::CrewMember { assigned },
        (None, Some(paid)) => ResourceState::BoatRegistration { paid },
        (None, None) => ResourceState::None,
    };
    let resource = ResourceContext::new(args.resource_type.as_str()).with_state(state);
    match &args.resource_id {
        Some(id) => resource.with_id(id.as_str()),
        None => resource,
    }
}

fn print_grant(grant: &TemporaryAccessGrant) {
    let status = serde_json::to_value(grant.status)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();
    println!(
        "{:<24} {:<8} {:<26} {}",
        grant.user_id,
        status,
        grant.expiration_timestamp.to_rfc3339(),
        grant.granted_by_admin_id
    );
}

async fn get_checker() -> anyhow::Result<PermissionChecker> {
    get_checker_at(Arc::new(SystemClock)).await
}

async fn get_checker_at(clock: Arc<dyn Clock>) -> anyhow::Result<PermissionChecker> {
    let pool = get_pool().await?;
    let access = AccessConfig::from_env()?;
    Ok(PermissionChecker::new(Arc::new(SqliteConfigStore::new(pool)), clock, &access))
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let status = if applied_versions.contains(&version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when run from the repo root, else the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
