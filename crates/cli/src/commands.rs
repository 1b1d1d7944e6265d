//! Shell commands.
//!
//! One command per input line, words separated by whitespace:
//!
//! ```text
//! join | leave | list_mem | list_self | store
//! put <local> <remote>
//! get <remote> <local>
//! delete <remote>
//! ls <remote>
//! get-versions <remote> <count> <local>
//! help | exit
//! ```

use membership::{Member, MembershipError};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const USAGE: &str = "commands: join, leave, list_mem, list_self, store, \
put <local> <remote>, get <remote> <local>, delete <remote>, ls <remote>, \
get-versions <remote> <count> <local>, help, exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
    ListMembers,
    ListSelf,
    /// Files stored on this member.
    Store,
    Put { local: PathBuf, remote: String },
    Get { remote: String, local: PathBuf },
    Delete { remote: String },
    /// Versions and holders of a remote file.
    Ls { remote: String },
    GetVersions { remote: String, count: usize, local: PathBuf },
    Help,
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unrecognized command {0:?}; {USAGE}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("version count must be a positive integer, got {0:?}")]
    InvalidCount(String),
}

/// What the shell should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Output(String),
    Exit,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = words.split_first() else {
            return Err(CommandError::Empty);
        };

        let command = match (name, args) {
            ("join", []) => Command::Join,
            ("leave", []) => Command::Leave,
            ("list_mem", []) => Command::ListMembers,
            ("list_self", []) => Command::ListSelf,
            ("store", []) => Command::Store,
            ("help", _) => Command::Help,
            ("exit" | "quit", []) => Command::Exit,
            ("put", [local, remote]) => Command::Put {
                local: PathBuf::from(local),
                remote: remote.to_string(),
            },
            ("put", _) => return Err(CommandError::Usage("put <local> <remote>")),
            ("get", [remote, local]) => Command::Get {
                remote: remote.to_string(),
                local: PathBuf::from(local),
            },
            ("get", _) => return Err(CommandError::Usage("get <remote> <local>")),
            ("delete", [remote]) => Command::Delete {
                remote: remote.to_string(),
            },
            ("delete", _) => return Err(CommandError::Usage("delete <remote>")),
            ("ls", [remote]) => Command::Ls {
                remote: remote.to_string(),
            },
            ("ls", _) => return Err(CommandError::Usage("ls <remote>")),
            ("get-versions", [remote, count, local]) => {
                let count = count
                    .parse::<usize>()
                    .ok()
                    .filter(|count| *count > 0)
                    .ok_or_else(|| CommandError::InvalidCount(count.to_string()))?;
                Command::GetVersions {
                    remote: remote.to_string(),
                    count,
                    local: PathBuf::from(local),
                }
            }
            ("get-versions", _) => {
                return Err(CommandError::Usage("get-versions <remote> <count> <local>"))
            }
            (other, _) => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Join => "join",
            Command::Leave => "leave",
            Command::ListMembers => "list_mem",
            Command::ListSelf => "list_self",
            Command::Store => "store",
            Command::Put { .. } => "put",
            Command::Get { .. } => "get",
            Command::Delete { .. } => "delete",
            Command::Ls { .. } => "ls",
            Command::GetVersions { .. } => "get-versions",
            Command::Help => "help",
            Command::Exit => "exit",
        }
    }

    /// Run against `member`. Failures are rendered as output, never returned.
    pub async fn execute(&self, member: &Member) -> CommandResult {
        match self.run(member).await {
            Ok(result) => result,
            Err(MembershipError::NotJoined) => CommandResult::Output("Not joined".to_string()),
            Err(e) => CommandResult::Output(format!("Operation failed: {e}")),
        }
    }

    async fn run(&self, member: &Member) -> membership::Result<CommandResult> {
        let output = match self {
            Command::Join => format!("Joined as {}", member.join().await?),
            Command::Leave => {
                member.leave().await?;
                "Left the group".to_string()
            }
            Command::ListMembers => member.list_members()?.to_string(),
            Command::ListSelf => member.list_self()?.to_string(),
            Command::Store => {
                let files = member.list_local_files()?;
                if files.is_empty() {
                    "No files stored here".to_string()
                } else {
                    files.join("\n")
                }
            }
            Command::Put { local, remote } => {
                let receipt = member.put(local, remote).await?;
                let holders: Vec<String> = receipt.stored_on.iter().map(|m| m.to_string()).collect();
                format!(
                    "Stored {remote} version {} on {}",
                    receipt.version,
                    holders.join(", ")
                )
            }
            Command::Get { remote, local } => {
                let from = member.get(remote, local).await?;
                format!("Fetched {remote} from {from} into {}", local.display())
            }
            Command::Delete { remote } => {
                member.delete(remote).await?;
                format!("Deleted {remote}")
            }
            Command::Ls { remote } => {
                let versions = member.list_versions(remote).await?;
                let mut output = String::new();
                for (version, holders) in versions.iter().rev() {
                    let holders: Vec<String> = holders.iter().map(|m| m.to_string()).collect();
                    let holders = if holders.is_empty() {
                        "(pending)".to_string()
                    } else {
                        holders.join(", ")
                    };
                    let _ = writeln!(output, "version {version}: {holders}");
                }
                output.trim_end().to_string()
            }
            Command::GetVersions { remote, count, local } => {
                let fetched = member.get_versions(remote, *count, local).await?;
                if fetched.is_empty() {
                    format!("No versions of {remote} could be fetched")
                } else {
                    fetched
                        .iter()
                        .map(|(version, path)| format!("version {version} -> {}", path.display()))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Help => USAGE.to_string(),
            Command::Exit => return Ok(CommandResult::Exit),
        };
        Ok(CommandResult::Output(output))
    }
}
