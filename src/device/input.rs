use super::VirtualDeck;
use crate::protocol::ButtonPosition;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A simulated interaction typed on the daemon's stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCommand {
    Down(ButtonPosition),
    Up(ButtonPosition),
    Click(ButtonPosition),
    Press(ButtonPosition),
    Show,
}

/// Parse one line such as `press 1 2` or `show`.
pub fn parse_command(line: &str) -> Option<InputCommand> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;

    if verb == "show" {
        return parts.next().is_none().then_some(InputCommand::Show);
    }

    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let pos = ButtonPosition::new(x, y);

    match verb {
        "down" => Some(InputCommand::Down(pos)),
        "up" => Some(InputCommand::Up(pos)),
        "click" => Some(InputCommand::Click(pos)),
        "press" => Some(InputCommand::Press(pos)),
        _ => None,
    }
}

/// Forward stdin lines into a channel from a plain thread.
///
/// A blocking stdin read cannot be cancelled, so it must not live on the
/// runtime; the thread simply dies with the process.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    return;
                }
            }
        }
    });
    rx
}

/// Apply simulated button input line by line to the deck.
///
/// Returns when the line source closes or `cancel` fires.
pub async fn read_input_loop(
    mut lines: mpsc::Receiver<String>,
    deck: Arc<VirtualDeck>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.recv() => line,
        };

        let Some(line) = line else {
            debug!("input closed");
            return;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Some(InputCommand::Down(pos)) => {
                deck.down(pos);
            }
            Some(InputCommand::Up(pos)) => {
                deck.up(pos);
            }
            Some(InputCommand::Click(pos)) => {
                deck.click(pos);
            }
            Some(InputCommand::Press(pos)) => {
                deck.press(pos);
            }
            Some(InputCommand::Show) => deck.log_state(),
            None => {
                warn!("unknown input {line:?}");
                info!("commands: down X Y | up X Y | click X Y | press X Y | show");
            }
        }
    }
}
