use std::io::{self, Write};

use persona_chat::{ChatSessionHandle, NotificationReceiver, PERSONALITY_PRESETS, preset};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::input::{HELP_TEXT, InputLine};
use crate::render::TranscriptPrinter;
use crate::settings::SettingsStore;

/// Runs the prompt loop until stdin closes or the user quits.
pub async fn run_terminal(
    handle: ChatSessionHandle,
    mut notifications: NotificationReceiver,
    settings: &SettingsStore,
) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut snapshots = handle.subscribe();
    let mut printer = TranscriptPrinter::new();
    let mut stdout = io::stdout();

    writeln!(
        stdout,
        "Chatting with {}. Type /help for commands.",
        handle.snapshot().personality.label
    )?;
    printer.render(&snapshots.borrow_and_update().clone(), &mut stdout)?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !handle_line(&handle, settings, InputLine::parse(&line), &mut stdout)? {
                    break;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                printer.render(&snapshot, &mut stdout)?;
            }
            Some(notification) = notifications.recv() => {
                eprintln!("\n[{}] {}", notification.title(), notification.message);
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Returns false when the loop should exit.
fn handle_line<W: Write>(
    handle: &ChatSessionHandle,
    settings: &SettingsStore,
    line: InputLine,
    out: &mut W,
) -> io::Result<bool> {
    match line {
        InputLine::Message(text) => {
            if handle.snapshot().lifecycle.is_streaming() {
                writeln!(out, "(still replying; use /stop to interrupt)")?;
            } else {
                handle.start_turn(text);
            }
        }
        InputLine::ListPresets => {
            let active = handle.snapshot().personality.label;
            for (index, preset) in PERSONALITY_PRESETS.iter().enumerate() {
                let marker = if preset.label == active { "*" } else { " " };
                writeln!(out, "{marker} {}. {}", index + 1, preset.label)?;
            }
        }
        InputLine::SelectPreset(index) => {
            if preset(index).is_none() {
                writeln!(out, "no preset {}; try /presets", index + 1)?;
            } else {
                handle.select_preset(index);
                if let Err(error) = settings.remember_preset(index) {
                    tracing::warn!(error = %error, "failed to persist preset selection");
                }
            }
        }
        InputLine::NewConversation => handle.new_conversation(),
        InputLine::Stop => handle.stop(),
        InputLine::Help => writeln!(out, "{HELP_TEXT}")?,
        InputLine::Quit => return Ok(false),
        InputLine::Unknown(command) => writeln!(out, "unknown command `{command}`; try /help")?,
        InputLine::Blank => {}
    }

    Ok(true)
}
