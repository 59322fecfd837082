//! Command execution.

use crate::Commands;
use colored::Colorize;
use nkips_client::{DeviceSession, SetResult};
use nkips_core::CrossPointState;
use nkips_protocol::Level;
use serde_json::{json, Value};

/// Executes a command that needs a live session and returns the formatted
/// output.
pub async fn execute(
    session: &DeviceSession,
    cmd: Commands,
    as_json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Get { destinations } => {
            let destinations = if destinations.is_empty() {
                (1..=session.config().outputs).collect()
            } else {
                destinations
            };
            let views = session.get_crosspoints(&destinations);
            if as_json {
                return Ok(format_json(&serde_json::to_value(&views)?));
            }
            Ok(views
                .iter()
                .map(format_crosspoint)
                .collect::<Vec<_>>()
                .join("\n"))
        }

        Commands::Set {
            level,
            destination,
            source,
        } => {
            let result = session.set_crosspoint(level, destination, source).await?;
            if as_json {
                return Ok(format_json(&serde_json::to_value(&result)?));
            }
            Ok(format_set_result(level, &result))
        }

        Commands::Repl
        | Commands::Watch
        | Commands::Levels
        | Commands::Labels
        | Commands::Label { .. } => Err("command does not run against a session".into()),
    }
}

/// One line per level: position, mask and names.
pub fn format_levels(levels: &[Level], as_json: bool) -> Result<String, serde_json::Error> {
    if as_json {
        let items: Vec<Value> = levels
            .iter()
            .map(|level| {
                json!({
                    "level": level,
                    "position": level.index() + 1,
                    "mask": level.mask(),
                    "name": level.name(),
                    "short_name": level.short_name(),
                })
            })
            .collect();
        return Ok(format_json(&Value::Array(items)));
    }

    Ok(levels
        .iter()
        .map(|level| {
            format!(
                "  {} {:#04x}  {:<16} {}",
                (level.index() + 1).to_string().cyan(),
                level.mask(),
                level.name(),
                level.short_name().dimmed()
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Destination header followed by one line per level.
pub fn format_crosspoint(view: &CrossPointState) -> String {
    let mut output = format!(
        "{} {}",
        format!("#{}", view.id).bold(),
        named(&view.label, &view.description)
    );

    for source in &view.sources {
        let routed = match source.id {
            Some(id) => format!(
                "{} {}",
                id.to_string().yellow(),
                named(&source.label, &source.description)
            ),
            None => "-".dimmed().to_string(),
        };
        output.push_str(&format!("\n  {:<16} {}", source.level.name(), routed));
    }

    output
}

pub fn format_set_result(level: Level, result: &SetResult) -> String {
    let routed = result
        .state
        .source(level)
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let outcome = if result.confirmed {
        "Confirmed".green()
    } else {
        "Unconfirmed".yellow()
    };

    format!(
        "{} {} #{} <- {}",
        outcome,
        level.name().cyan(),
        result.state.id,
        routed
    )
}

fn named(label: &str, description: &str) -> String {
    match (label.is_empty(), description.is_empty()) {
        (true, _) => String::new(),
        (false, true) => label.to_string(),
        (false, false) => format!("{} ({})", label, description.dimmed()),
    }
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
