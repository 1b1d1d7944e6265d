//! Interactive line shell.

use membership::Member;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::commands::{Command, CommandResult};

const PROMPT: &str = "member$ ";

/// Read commands from stdin until `exit` or end of input. Leaves the group on
/// the way out if still joined.
pub async fn run(member: &Member) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(PROMPT.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                stdout.write_all(format!("{e}\n").as_bytes()).await?;
                continue;
            }
        };

        let started = Instant::now();
        let result = command.execute(member).await;
        info!(command = command.name(), elapsed_ms = started.elapsed().as_millis() as u64, "command processed");

        match result {
            CommandResult::Output(output) => {
                stdout.write_all(format!("{output}\n").as_bytes()).await?;
            }
            CommandResult::Exit => break,
        }
    }

    if member.is_joined() {
        if let Err(e) = member.leave().await {
            warn!("leave on exit failed: {}", e);
        }
    }
    Ok(())
}
