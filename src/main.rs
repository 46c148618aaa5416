use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use ostov::auth::{ensure_default_admin, register, Registration};
use ostov::config::Cfg;
use ostov::store::{self, Accounts};
use ostov::{app, AppState};

#[derive(Parser)]
#[command(name = "ostov", version, about = "Education records dashboard")]
struct Cli {
    #[command(flatten)]
    cfg: Cfg,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default)
    Serve,
    /// Create a user account
    CreateUser {
        username: String,
        password: String,
        #[arg(long)]
        staff: bool,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Delete a user account; linked students and teachers are kept, unlinked
    DeleteUser { username: String },
    /// Record an exam for a course
    AddExam { course_id: i64 },
}

/// Account and exam commands must reach the database; on the in-memory
/// store their changes would vanish with the process.
fn check_persistent(command: &Command, cfg: &Cfg) -> anyhow::Result<()> {
    if matches!(command, Command::Serve) || cfg.database_url.is_some() {
        return Ok(());
    }
    bail!("DATABASE_URL is not set; this command would only change a throwaway in-memory store")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    cli.cfg.check()?;
    let command = cli.command.unwrap_or(Command::Serve);
    check_persistent(&command, &cli.cfg)?;
    let store = store::connect(&cli.cfg).await?;

    match command {
        Command::Serve => {
            ensure_default_admin(store.as_ref(), &cli.cfg).await?;
            let addr = cli.cfg.bind;
            let app = app(AppState::new(store, cli.cfg));
            log::info!("Starting Ostov dashboard on http://{}", addr);
            axum::Server::bind(&addr)
                .serve(app.into_make_service())
                .await?;
        }
        Command::CreateUser {
            username,
            password,
            staff,
            first_name,
            last_name,
            email,
        } => {
            let user = register(
                store.as_ref(),
                Registration {
                    username,
                    password,
                    first_name,
                    last_name,
                    email,
                    is_staff: staff,
                },
            )
            .await?;
            println!("Created user {} (id {})", user.username, user.id);
        }
        Command::DeleteUser { username } => {
            let user = store
                .user_by_username(&username)
                .await?
                .with_context(|| format!("No user named `{}`", username))?;
            if !store.delete_user(user.id).await? {
                bail!("User `{}` vanished before it could be deleted", username);
            }
            println!("Deleted user {}", username);
        }
        Command::AddExam { course_id } => {
            let exam = store.insert_exam(course_id).await?;
            println!("Created exam {} for course {}", exam.id, exam);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_other_than_serve_need_a_database() {
        let cfg = Cfg::default();
        assert!(check_persistent(&Command::Serve, &cfg).is_ok());
        assert!(check_persistent(&Command::AddExam { course_id: 1 }, &cfg).is_err());
        assert!(check_persistent(
            &Command::DeleteUser {
                username: "jdoe".into()
            },
            &cfg
        )
        .is_err());

        let cfg = Cfg {
            database_url: Some("postgres://localhost/ostov".into()),
            ..Cfg::default()
        };
        assert!(check_persistent(&Command::AddExam { course_id: 1 }, &cfg).is_ok());
    }
}
