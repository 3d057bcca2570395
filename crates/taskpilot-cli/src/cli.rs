//! Command-line parsing.

use anyhow::{anyhow, bail, Result};

pub const USAGE: &str = "\
Usage: taskpilot <command> [args]

Commands:
  register <email>                         Create an account
  login [email] [--remember]               Log in (remembers the password in the OS keychain)
  logout                                   Forget the saved session
  status                                   Show who is logged in
  list                                     List tasks
  add <title> --desc <text> --due <date>   Create a task (date as YYYY-MM-DD)
  edit <id> [--title <t>] [--desc <d>] [--due <date>]
                                           Change a task
  done <id>                                Toggle a task's completed flag
  delete <id>                              Delete a task";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { email: String },
    Login { email: Option<String>, remember: bool },
    Logout,
    Status,
    List,
    Add { title: String, description: String, due_date: String },
    Edit {
        id: String,
        title: Option<String>,
        description: Option<String>,
        due_date: Option<String>,
    },
    Done { id: String },
    Delete { id: String },
    Help,
}

impl Command {
    /// Parse everything after the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            return Ok(Command::Help);
        }
        let name = args.remove(0);
        let mut rest = Args::new(args);

        let command = match name.as_str() {
            "register" => Command::Register {
                email: rest.positional("email")?,
            },
            "login" => {
                let remember = rest.flag("--remember");
                Command::Login {
                    email: rest.optional_positional(),
                    remember,
                }
            }
            "logout" => Command::Logout,
            "status" | "whoami" => Command::Status,
            "list" | "ls" => Command::List,
            "add" => {
                let description = rest.option("--desc")?;
                let due_date = rest.option("--due")?;
                Command::Add {
                    title: rest.positional("title")?,
                    description: description.unwrap_or_default(),
                    due_date: due_date.unwrap_or_default(),
                }
            }
            "edit" => {
                let title = rest.option("--title")?;
                let description = rest.option("--desc")?;
                let due_date = rest.option("--due")?;
                Command::Edit {
                    id: rest.positional("id")?,
                    title,
                    description,
                    due_date,
                }
            }
            "done" | "complete" => Command::Done {
                id: rest.positional("id")?,
            },
            "delete" | "rm" => Command::Delete {
                id: rest.positional("id")?,
            },
            "help" | "--help" | "-h" => Command::Help,
            other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
        };
        rest.finish()?;
        Ok(command)
    }
}

/// Remaining arguments of one command. Options are taken out first; what
/// is left is positional.
struct Args {
    items: Vec<String>,
}

impl Args {
    fn new(items: Vec<String>) -> Self {
        Self { items }
    }

    fn flag(&mut self, name: &str) -> bool {
        match self.items.iter().position(|a| a == name) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }

    fn option(&mut self, name: &str) -> Result<Option<String>> {
        let Some(i) = self.items.iter().position(|a| a == name) else {
            return Ok(None);
        };
        if i + 1 >= self.items.len() {
            bail!("{} needs a value", name);
        }
        let value = self.items.remove(i + 1);
        self.items.remove(i);
        Ok(Some(value))
    }

    fn positional(&mut self, what: &str) -> Result<String> {
        self.optional_positional()
            .ok_or_else(|| anyhow!("Missing {}\n\n{}", what, USAGE))
    }

    fn optional_positional(&mut self) -> Option<String> {
        let i = self.items.iter().position(|a| !a.starts_with("--"))?;
        Some(self.items.remove(i))
    }

    fn finish(self) -> Result<()> {
        if self.items.is_empty() {
            Ok(())
        } else {
            bail!("Unexpected arguments: {}", self.items.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_args_is_help() {
        assert_eq!(Command::parse(Vec::<String>::new()).expect("parses"), Command::Help);
    }

    #[test]
    fn test_parse_login() {
        assert_eq!(
            Command::parse(["login", "a@b.com", "--remember"]).expect("parses"),
            Command::Login { email: Some("a@b.com".into()), remember: true }
        );
        assert_eq!(
            Command::parse(["login"]).expect("parses"),
            Command::Login { email: None, remember: false }
        );
    }

    #[test]
    fn test_parse_add_with_options_anywhere() {
        assert_eq!(
            Command::parse(["add", "--due", "2025-01-02", "Buy milk", "--desc", "2L"]).expect("parses"),
            Command::Add {
                title: "Buy milk".into(),
                description: "2L".into(),
                due_date: "2025-01-02".into(),
            }
        );
    }

    #[test]
    fn test_parse_edit() {
        assert_eq!(
            Command::parse(["edit", "5", "--title", "Renamed"]).expect("parses"),
            Command::Edit {
                id: "5".into(),
                title: Some("Renamed".into()),
                description: None,
                due_date: None,
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse(["frobnicate"]).is_err());
        assert!(Command::parse(["done"]).is_err());
        assert!(Command::parse(["add", "title", "--due"]).is_err());
        assert!(Command::parse(["delete", "1", "2"]).is_err());
    }
}
