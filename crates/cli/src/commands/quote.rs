use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use landcost_agent::turn::{PriorTurn, Role, TurnReply, TurnRequest};
use landcost_server::bootstrap::{bootstrap_with_config, Application};
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::commands::{load_config, runtime, CommandResult};

const CHANNEL: &str = "cli";

#[derive(Debug, Default)]
pub struct QuoteOptions {
    pub session: Option<String>,
    pub messages: Vec<String>,
    pub script: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct TranscriptTurn {
    user: String,
    reply: TurnReply,
}

/// Scripted when messages or a script file are given, otherwise reads turns from stdin.
pub fn run(options: QuoteOptions) -> CommandResult {
    execute(options).unwrap_or_else(|failure| failure)
}

fn execute(options: QuoteOptions) -> Result<CommandResult, CommandResult> {
    let mut messages = options.messages;
    if let Some(path) = &options.script {
        let lines = read_script(path)
            .map_err(|error| CommandResult::failure("quote", "script_read", format!("{error:#}"), 2))?;
        messages.extend(lines);
    }

    let config = load_config("quote")?;
    let runtime = runtime("quote")?;
    let app = runtime
        .block_on(bootstrap_with_config(config))
        .map_err(|error| CommandResult::from_bootstrap("quote", error))?;
    let session_id = options.session.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));

    let outcome = if messages.is_empty() {
        interactive(&runtime, &app, &session_id)
            .map(|turns| CommandResult::success("quote", format!("session {session_id} ended after {turns} turns")))
            .map_err(|error| CommandResult::failure("quote", "io", format!("{error:#}"), 1))
    } else {
        let transcript = scripted(&runtime, &app, &session_id, messages);
        let stage = transcript.last().map(|turn| turn.reply.stage.as_str()).unwrap_or("awaiting_product");
        serde_json::to_value(&transcript)
            .map(|data| {
                CommandResult::success_with_data(
                    "quote",
                    format!("session {session_id} at stage {stage} after {} turns", transcript.len()),
                    Some(data),
                )
            })
            .map_err(|error| CommandResult::failure("quote", "serialization", error.to_string(), 1))
    };

    runtime.block_on(app.db_pool.close());
    outcome
}

fn read_script(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = fs::read_to_string(path).with_context(|| format!("could not read script `{}`", path.display()))?;
    Ok(script_lines(&raw))
}

/// One message per non-blank line; `#` starts a comment line.
fn script_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn turn(runtime: &Runtime, app: &Application, session_id: &str, history: &mut Vec<PriorTurn>, text: &str) -> TurnReply {
    let mut request = TurnRequest::new(session_id, text).with_history(history.clone());
    request.channel = Some(CHANNEL.to_string());
    let reply = runtime.block_on(app.runtime.handle_turn(request));

    history.push(PriorTurn { role: Role::User, text: text.to_string() });
    history.push(PriorTurn { role: Role::Assistant, text: reply.assistant_text.clone() });
    reply
}

fn scripted(runtime: &Runtime, app: &Application, session_id: &str, messages: Vec<String>) -> Vec<TranscriptTurn> {
    let mut history = Vec::new();
    messages
        .into_iter()
        .map(|user| {
            let reply = turn(runtime, app, session_id, &mut history, &user);
            TranscriptTurn { user, reply }
        })
        .collect()
}

fn interactive(runtime: &Runtime, app: &Application, session_id: &str) -> anyhow::Result<usize> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut history = Vec::new();
    let mut turns = 0;

    writeln!(stdout, "Sesión {session_id}. Contame qué querés importar (línea vacía o Ctrl-D para salir).")?;
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("could not read from stdin")? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            break;
        }

        let reply = turn(runtime, app, session_id, &mut history, text);
        turns += 1;
        writeln!(stdout, "{}", reply.assistant_text)?;
        if let Some(breakdown) = &reply.breakdown {
            writeln!(
                stdout,
                "  total estimado: USD {} a {} ({} unidades)",
                breakdown.grand_total.min, breakdown.grand_total.max, breakdown.quantity
            )?;
        }
        if reply.handoff {
            writeln!(stdout, "  [derivado a un especialista]")?;
        }
    }
    Ok(turns)
}
