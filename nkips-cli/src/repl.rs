//! Interactive REPL.

use crate::commands::{format_crosspoint, format_levels, format_set_result};
use colored::Colorize;
use nkips_client::{Config, DeviceSession};
use nkips_core::{LabelUpdate, PortKind};
use nkips_protocol::Level;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use std::path::PathBuf;
use std::time::Duration;

const HELP_TEXT: &str = r#"
Available commands:
  help                              Show this help
  status                            Connection status

  levels                            List the configured levels
  get <dest> [dest...]              Show the sources routed to destinations
  set <level> <dest> <src>          Route a source to a destination

  label <input|output> <id> <label> [description]
                                    Update a port label
  labels                            Print all labels in .lbl format
  save [path]                       Write labels to the label file

  quit, exit                        Exit the REPL
"#;

pub async fn run(
    session: &DeviceSession,
    config: &Config,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "nkips CLI".bold().cyan());
    println!("Connecting to {}...", session.config().endpoint());

    match session.wait_ready(wait).await {
        Ok(()) => println!("{}", "Routing table loaded.".green()),
        Err(e) => println!(
            "{}: {} (status {}, still retrying)",
            "Warning".yellow(),
            e,
            session.status()
        ),
    }

    // Create readline editor
    let rl_config = rustyline::Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(rl_config)?;

    // Load history
    let history_path = home::home_dir()
        .map(|h| h.join(".nkips_history"))
        .unwrap_or_else(|| PathBuf::from(".nkips_history"));
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "nkips>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(session, config, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    session: &DeviceSession,
    config: &Config,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "status" | "st" => {
            let status = session.status();
            let ready = if session.is_ready() {
                "ready".green()
            } else {
                "not ready".yellow()
            };
            Ok(Some(format!(
                "{} {} ({})",
                session.config().endpoint().cyan(),
                status,
                ready
            )))
        }

        "levels" | "lv" => Ok(Some(format_levels(&session.levels(), false)?)),

        "get" | "g" => {
            if args.is_empty() {
                return Ok(Some("Usage: get <dest> [dest...]".to_string()));
            }
            let destinations = args
                .iter()
                .map(|s| s.parse::<u16>())
                .collect::<Result<Vec<_>, _>>()?;
            let views = session.get_crosspoints(&destinations);
            Ok(Some(
                views
                    .iter()
                    .map(format_crosspoint)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        }

        "set" | "s" => {
            if args.len() < 3 {
                return Ok(Some("Usage: set <level> <dest> <src>".to_string()));
            }
            let level: Level = args[0].parse()?;
            let destination: u16 = args[1].parse()?;
            let source: u16 = args[2].parse()?;

            let result = session.set_crosspoint(level, destination, source).await?;
            Ok(Some(format_set_result(level, &result)))
        }

        "label" | "l" => {
            if args.len() < 3 {
                return Ok(Some(
                    "Usage: label <input|output> <id> <label> [description]".to_string(),
                ));
            }
            let kind: PortKind = args[0].parse()?;
            let id: u16 = args[1].parse()?;
            let mut update = LabelUpdate::label(args[2]);
            if args.len() > 3 {
                update = update.with_description(args[3..].join(" "));
            }

            let label = session.set_label(kind, id, update)?;
            Ok(Some(format!(
                "{} {} {} = {}",
                "Updated".green(),
                kind,
                id.to_string().cyan(),
                label.label.yellow()
            )))
        }

        "labels" => Ok(Some(session.labels_lbl())),

        "save" => {
            let path = match args.first() {
                Some(path) => PathBuf::from(path),
                None => match &config.labels.path {
                    Some(path) => path.clone(),
                    None => return Ok(Some("Usage: save <path>".to_string())),
                },
            };
            let count = config.device.inputs.max(config.device.outputs);
            session.labels().save(&path, count)?;
            Ok(Some(format!(
                "{} {}",
                "Saved".green(),
                path.display().to_string().cyan()
            )))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}
