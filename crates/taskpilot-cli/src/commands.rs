//! Command execution.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use taskpilot_core::auth::CredentialStore;
use taskpilot_core::models::{Task, TaskDraft, TaskUpdate};
use taskpilot_core::utils::{format_date, task_line};
use taskpilot_core::{ApiClient, ApiError, Config, SessionEndReason, SessionEvent};

use crate::cli::{Command, USAGE};

/// Width of the title column in task listings.
const TITLE_WIDTH: usize = 40;

pub struct App {
    config: Config,
    client: ApiClient,
    events: broadcast::Receiver<SessionEvent>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let client = ApiClient::from_config(&config)?;
        let events = client.subscribe();
        Ok(Self {
            config,
            client,
            events,
        })
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        let result = self.dispatch(command).await;
        self.report_session_end();
        if let Err(e) = &result {
            if let Some(ApiError::Unauthorized(_)) = e.downcast_ref::<ApiError>() {
                if !self.client.is_authenticated() {
                    bail!("{:#}\nRun `taskpilot login` to sign in.", e);
                }
            }
        }
        result
    }

    async fn dispatch(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Register { email } => self.register(&email).await,
            Command::Login { email, remember } => self.login(email, remember).await,
            Command::Logout => self.logout(),
            Command::Status => {
                self.status();
                Ok(())
            }
            Command::List => self.list().await,
            Command::Add {
                title,
                description,
                due_date,
            } => {
                let draft = TaskDraft {
                    title,
                    description,
                    due_date,
                };
                self.add(draft).await
            }
            Command::Edit {
                id,
                title,
                description,
                due_date,
            } => {
                let update = TaskUpdate {
                    title,
                    description,
                    due_date,
                    completed: None,
                };
                self.edit(&id, update).await
            }
            Command::Done { id } => self.done(&id).await,
            Command::Delete { id } => self.delete(&id).await,
            Command::Help => {
                println!("{}", USAGE);
                Ok(())
            }
        }
    }

    // ===== Account =====

    async fn register(&mut self, email: &str) -> Result<()> {
        let password = prompt_password("Password: ")?;
        let confirm = prompt_password("Confirm password: ")?;
        if password != confirm {
            bail!("Passwords do not match");
        }

        self.client.register(email, &password).await?;
        println!("Account created for {}. Run `taskpilot login` to sign in.", email);

        self.config.last_email = Some(email.to_string());
        self.config.save()?;
        Ok(())
    }

    async fn login(&mut self, email: Option<String>, remember: bool) -> Result<()> {
        let email = match email {
            Some(email) => email,
            None => prompt_email(self.config.last_email.as_deref())?,
        };
        if email.is_empty() {
            bail!("Email is required");
        }

        let password = login_password(&email, CredentialStore::get_password, || {
            prompt_password("Password: ")
        })?;

        println!("Authenticating...");
        match self.client.login(&email, &password).await {
            Ok(_) => {}
            Err(e) => {
                // A remembered password that no longer works should not be retried.
                if let Some(ApiError::Unauthorized(_)) = e.downcast_ref::<ApiError>() {
                    if let Err(forget_err) = CredentialStore::forget(&email) {
                        warn!("{:#}", forget_err);
                    }
                }
                return Err(e);
            }
        }

        if remember {
            CredentialStore::store(&email, &password)?;
        }
        self.config.last_email = Some(email.clone());
        self.config.save()?;

        println!("Logged in as {}", email);
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.client.logout();
        if let Some(email) = &self.config.last_email {
            CredentialStore::forget(email)?;
        }
        println!("Logged out");
        Ok(())
    }

    fn status(&self) {
        let who = self.config.last_email.as_deref().unwrap_or("unknown user");
        if self.client.is_authenticated() {
            let id = self.client.user_id().unwrap_or_default();
            println!("Logged in as {} (user {})", who, id);
        } else if self.client.user_id().is_some() {
            println!("Session for {} has expired; it will be renewed on the next request", who);
        } else {
            println!("Not logged in");
        }
        println!("API: {}", self.config.api_base_url);
    }

    // ===== Tasks =====

    async fn list(&self) -> Result<()> {
        let tasks = self.client.list_tasks().await?;
        print_tasks(&tasks, today());
        Ok(())
    }

    async fn add(&self, draft: TaskDraft) -> Result<()> {
        let task = draft.validate()?;
        let created = self.client.create_task(&task).await?;
        println!("Created task {}", created.id);
        self.list().await
    }

    async fn edit(&self, id: &str, update: TaskUpdate) -> Result<()> {
        if update.is_empty() {
            bail!("Nothing to change; pass --title, --desc or --due");
        }
        update.validate()?;
        let task = self.client.update_task(id, &update).await?;
        println!("Updated task {}", task.id);
        self.list().await
    }

    async fn done(&self, id: &str) -> Result<()> {
        let task = self.client.toggle_complete(id).await?;
        if task.completed {
            println!("Completed \"{}\"", task.title);
        } else {
            println!("Reopened \"{}\"", task.title);
        }
        self.list().await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.client.delete_task(id).await?;
        println!("Deleted task {}", id);
        self.list().await
    }

    /// Tell the user, once, when the pipeline tore the session down
    /// mid-command.
    fn report_session_end(&mut self) {
        if forced_session_end(&mut self.events).is_some() {
            eprintln!("Session ended, please log in again");
        }
    }
}

/// Drain pending session events and return the first teardown the user
/// did not ask for.
fn forced_session_end(
    events: &mut broadcast::Receiver<SessionEvent>,
) -> Option<SessionEndReason> {
    let mut forced = None;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Ended { reason }) => {
                debug!(%reason, "Session ended");
                if reason != SessionEndReason::LoggedOut && forced.is_none() {
                    forced = Some(reason);
                }
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return forced,
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn print_tasks(tasks: &[Task], today: NaiveDate) {
    if tasks.is_empty() {
        println!("No tasks yet. Add one with `taskpilot add`.");
        return;
    }
    for task in tasks {
        println!("{}", task_line(task, today, TITLE_WIDTH));
    }
    let open = tasks.iter().filter(|t| !t.completed).count();
    let overdue = tasks.iter().filter(|t| t.is_overdue(today)).count();
    println!(
        "\n{} tasks, {} open, {} overdue (as of {})",
        tasks.len(),
        open,
        overdue,
        format_date(&today.format("%Y-%m-%d").to_string())
    );
}

/// The remembered password for `email`, or a typed one when the keychain
/// has none (or cannot be reached).
fn login_password(
    email: &str,
    remembered: impl FnOnce(&str) -> Result<String>,
    prompt: impl FnOnce() -> Result<String>,
) -> Result<String> {
    match remembered(email) {
        Ok(password) => {
            debug!("Using remembered password");
            Ok(password)
        }
        Err(e) => {
            debug!(error = %format!("{:#}", e), "No remembered password");
            prompt()
        }
    }
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Failed to read email")?;
    let input = input.trim();
    Ok(match (input.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

fn prompt_password(prompt: &str) -> Result<String> {
    let password = rpassword::prompt_password(prompt)?;
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_login_password_prefers_remembered() {
        let password = login_password(
            "a@b.com",
            |_| Ok("saved".to_string()),
            || panic!("should not prompt"),
        )
        .expect("password");
        assert_eq!(password, "saved");
    }

    #[test]
    fn test_login_password_prompts_when_lookup_fails() {
        let password = login_password(
            "a@b.com",
            |_| Err(anyhow!("No matching entry found in secure storage")),
            || Ok("typed".to_string()),
        )
        .expect("password");
        assert_eq!(password, "typed");

        let err = login_password("a@b.com", |_| Err(anyhow!("locked")), || Err(anyhow!("no tty")))
            .unwrap_err();
        assert_eq!(err.to_string(), "no tty");
    }

    #[test]
    fn test_login_password_falls_back_from_empty_keychain() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());

        let password = login_password("nobody@example.com", CredentialStore::get_password, || {
            Ok("typed".to_string())
        })
        .expect("password");
        assert_eq!(password, "typed");
    }

    #[test]
    fn test_forced_session_end_is_reported_once() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(SessionEvent::Ended { reason: SessionEndReason::RefreshFailed })
            .expect("send");
        tx.send(SessionEvent::Ended { reason: SessionEndReason::MissingRefreshToken })
            .expect("send");

        assert_eq!(forced_session_end(&mut rx), Some(SessionEndReason::RefreshFailed));
        assert_eq!(forced_session_end(&mut rx), None);
    }

    #[test]
    fn test_logout_is_not_a_forced_end() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(SessionEvent::Ended { reason: SessionEndReason::LoggedOut })
            .expect("send");

        assert_eq!(forced_session_end(&mut rx), None);
    }
}
