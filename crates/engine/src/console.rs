// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented console host for the engine.
//!
//! Reads commands from an input stream and drives the controller; the GUI
//! control panel the engine was built for speaks the same surface. One
//! command per line:
//!
//! ```text
//! start [DELAY_MS]    start the engine (defaults to the current delay)
//! stop                stop the engine
//! delay DELAY_MS      update the hold time
//! status              print a JSON status line
//! quit                stop the engine and exit
//! ```

use std::io::{BufRead, Write};

use crate::engine::Engine;

/// A parsed console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start(Option<u64>),
    Stop,
    Delay(u64),
    Status,
    Quit,
}

/// Parse one input line. Returns `None` for blank or unrecognized lines.
pub fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match (words.next()?, words.next()) {
        ("start", None) => Command::Start(None),
        ("start", Some(arg)) => Command::Start(Some(arg.parse().ok()?)),
        ("stop", None) => Command::Stop,
        ("delay", Some(arg)) => Command::Delay(arg.parse().ok()?),
        ("status", None) => Command::Status,
        ("quit" | "exit", None) => Command::Quit,
        _ => return None,
    };
    if words.next().is_some() {
        return None;
    }
    Some(command)
}

/// Drive `engine` from `input` until end of input or `quit`.
pub fn run(
    engine: &Engine,
    input: impl BufRead,
    mut output: impl Write,
) -> std::io::Result<()> {
    for line in input.lines() {
        let line = line?;
        let Some(command) = parse_command(&line) else {
            if !line.trim().is_empty() {
                writeln!(output, "unrecognized command: {}", line.trim())?;
            }
            continue;
        };

        match command {
            Command::Start(delay_ms) => {
                let delay_ms = delay_ms.unwrap_or_else(|| engine.current_delay());
                if let Err(err) = engine.start(delay_ms) {
                    writeln!(output, "start failed: {err}")?;
                }
            }
            Command::Stop => engine.stop(),
            Command::Delay(delay_ms) => engine.update_delay(delay_ms),
            Command::Status => {
                let status = serde_json::json!({
                    "running": engine.is_running(),
                    "delay_ms": engine.current_delay(),
                    "queued_packets": engine.queued_packets(),
                });
                writeln!(output, "{status}")?;
            }
            Command::Quit => break,
        }
    }

    engine.stop();
    Ok(())
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
