/*
 * SHM RELAY - TERMINAL CONSOLE
 * =================================================================
 * Component Name: src/console.rs
 * Core Responsibility: Line-oriented front end: stdin lines become writes, observed changes are printed.
 * =================================================================
 */

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::error::RelayResult;
use crate::session::SessionHandle;

/// Run until `/quit`, Ctrl-C, or the session ends. Closing stdin only stops input.
pub async fn run_console(handle: &SessionHandle, label: &str) -> RelayResult<()> {
    let mut updates = handle.updates();
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdin_open = true;

    write_stdout(&format!(
        "*** attached to '{}': type a line to replace the buffer, /read to re-read, /quit to leave",
        label
    ))
    .await?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    write_stdout("*** session ended").await?;
                    break;
                }
                let text = updates.borrow_and_update().clone();
                render_content(label, &text).await?;
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if !handle_input(handle, label, &line).await? {
                        break;
                    }
                }
                None => stdin_open = false,
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_input(handle: &SessionHandle, label: &str, input: &str) -> RelayResult<bool> {
    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving").await?;
        return Ok(false);
    }

    if text.eq_ignore_ascii_case("/read") {
        match handle.read().await {
            Ok(content) => render_content(label, &content).await?,
            Err(e) => write_stderr(&format!("!!! read failed: {}", e)).await?,
        }
        return Ok(true);
    }

    match handle.write(text).await {
        Ok(()) => write_stdout(&format!("*** wrote {} bytes", text.len())).await?,
        Err(e) => write_stderr(&format!("!!! write failed: {}", e)).await?,
    }
    Ok(true)
}

async fn render_content(label: &str, text: &str) -> io::Result<()> {
    write_stdout(&format!("--- {} ({} bytes) ---\n{}", label, text.len(), text)).await
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
