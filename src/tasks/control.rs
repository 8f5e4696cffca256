//! Line-oriented operator console: one command per stdin line.

use std::io::BufRead;

use anyhow::Result;
use tokio::sync::mpsc::{self, Receiver};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::events::Direction;
use crate::tasks::engine::EngineHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Next,
    Previous,
    SwipeForward,
    SwipeBackward,
    Tap,
    Status,
    Quit,
}

/// Parse one console line. Blank lines and unknown words yield `None`.
pub fn parse_command(line: &str) -> Option<ControlCommand> {
    let word = line.trim().to_ascii_lowercase();
    let cmd = match word.as_str() {
        "start" => ControlCommand::Start,
        "stop" => ControlCommand::Stop,
        "pause" => ControlCommand::Pause,
        "resume" => ControlCommand::Resume,
        "next" | "n" => ControlCommand::Next,
        "prev" | "previous" | "p" => ControlCommand::Previous,
        "swipe-forward" | "sf" => ControlCommand::SwipeForward,
        "swipe-backward" | "sb" => ControlCommand::SwipeBackward,
        "tap" | "toggle" => ControlCommand::Tap,
        "status" | "s" => ControlCommand::Status,
        "quit" | "q" | "exit" => ControlCommand::Quit,
        _ => return None,
    };
    Some(cmd)
}

/// Read stdin on a detached thread so a pending read never holds up shutdown.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Feed console lines to the engine until EOF, `quit` or cancellation.
/// Only `quit` cancels `cancel`; a closed input just ends the console.
#[instrument(skip_all)]
pub async fn run(
    mut lines: Receiver<String>,
    engine: EngineHandle,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            info!("control input closed");
            break;
        };
        let Some(cmd) = parse_command(&line) else {
            if !line.trim().is_empty() {
                warn!(input = %line.trim(), "unknown control command");
            }
            continue;
        };
        if cmd == ControlCommand::Quit {
            info!("quit requested");
            cancel.cancel();
            break;
        }
        dispatch(&engine, cmd).await?;
    }
    Ok(())
}

async fn dispatch(engine: &EngineHandle, cmd: ControlCommand) -> Result<()> {
    match cmd {
        ControlCommand::Start => engine.start().await?,
        ControlCommand::Stop => engine.stop().await?,
        ControlCommand::Pause => engine.pause().await?,
        ControlCommand::Resume => engine.resume().await?,
        ControlCommand::Next => engine.advance(Direction::Next, true).await?,
        ControlCommand::Previous => engine.advance(Direction::Previous, true).await?,
        ControlCommand::SwipeForward => engine.on_user_swipe_forward().await?,
        ControlCommand::SwipeBackward => engine.on_user_swipe_backward().await?,
        ControlCommand::Tap => engine.on_user_double_tap().await?,
        ControlCommand::Status => {
            let status = engine.status().await?;
            info!(
                state = ?status.run_state,
                index = ?status.current_index,
                current = ?status.current.as_ref().map(|c| c.uri().to_owned()),
                substate = ?status.substate,
                next_tick_in = ?status.next_tick_in,
                "status"
            );
        }
        ControlCommand::Quit => {}
    }
    Ok(())
}
