use std::fmt::Display;
use std::path::Path;

use anyhow::{bail, Context};
use colored::{ColoredString, Colorize};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use difftrack_compaction::{compact_list_diffs, compact_map_diffs, squash_list_diffs, SquashedRun};
use difftrack_core::{
    BoundedProjection, Container, Diff, DiffOf, Dispatcher, ListDiff, ListDispatcher, ListListener,
    MapDiff, MapDispatcher, MapListener,
};

use crate::cli::*;
use crate::config::CliConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    let output = match cli.command {
        Command::Compact(args) => cmd_compact(&args, cli.format)?,
        Command::Squash(args) => cmd_squash(&args, cli.format)?,
        Command::Replay(args) => cmd_replay(&args, &config, cli.format)?,
    };
    println!("{output}");
    Ok(())
}

fn read_log<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading diff log {}", path.display()))?;
    let log: Vec<T> = serde_json::from_str(&text)
        .with_context(|| format!("parsing diff log {}", path.display()))?;
    debug!(path = %path.display(), diffs = log.len(), "diff log loaded");
    Ok(log)
}

fn paint(kind: impl Display) -> ColoredString {
    let kind = kind.to_string();
    match kind.as_str() {
        "INSERT" | "SET" => kind.green(),
        "REPLACE" => kind.yellow(),
        _ => kind.red(),
    }
}

fn render_diffs<K, L>(
    diffs: &[Diff<K, L, Value>],
    original: usize,
    format: OutputFormat,
) -> anyhow::Result<String>
where
    K: Display + Serialize,
    L: Serialize,
{
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(diffs)?);
    }
    let mut lines = vec![format!(
        "{} {} -> {} diffs",
        "✓".green().bold(),
        original,
        diffs.len().to_string().bold()
    )];
    for diff in diffs {
        let locator = serde_json::to_string(&diff.locator)?;
        match &diff.value {
            Some(value) => lines.push(format!("  {} {} = {}", paint(&diff.kind), locator, value)),
            None => lines.push(format!("  {} {}", paint(&diff.kind), locator)),
        }
    }
    Ok(lines.join("\n"))
}

fn cmd_compact(args: &CompactArgs, format: OutputFormat) -> anyhow::Result<String> {
    if args.shape.is_map() {
        let log: Vec<MapDiff<String, Value>> = read_log(&args.log)?;
        let original = log.len();
        let compacted = compact_map_diffs(log);
        debug!(original, compacted = compacted.len(), "map log compacted");
        render_diffs(&compacted, original, format)
    } else {
        let log: Vec<ListDiff<Value>> = read_log(&args.log)?;
        let original = log.len();
        let compacted = compact_list_diffs(log);
        debug!(original, compacted = compacted.len(), "list log compacted");
        render_diffs(&compacted, original, format)
    }
}

fn cmd_squash(args: &SquashArgs, format: OutputFormat) -> anyhow::Result<String> {
    let log: Vec<ListDiff<Value>> = read_log(&args.log)?;
    let runs = squash_list_diffs(log)
        .collect::<Result<Vec<SquashedRun<Value>>, _>>()
        .with_context(|| format!("squashing {}", args.log.display()))?;

    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(&runs)?);
    }
    let lines: Vec<String> = runs
        .iter()
        .map(|run| {
            format!(
                "{} {}..{} {}",
                paint(run.kind),
                run.start,
                run.stop,
                Value::from(run.payload.clone())
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

/// Apply `log` to `dispatcher` as one batch. Returns the number of diffs
/// emitted.
fn replay_into<C: Container>(dispatcher: &Dispatcher<C>, log: Vec<DiffOf<C>>) -> anyhow::Result<u64> {
    let scope = dispatcher.batch()?;
    for (position, diff) in log.into_iter().enumerate() {
        let described = format!("{} {:?}", diff.kind, diff.locator);
        scope
            .apply(diff)
            .with_context(|| format!("applying diff #{position} ({described})"))?;
    }
    scope.finish()?;
    Ok(dispatcher.emitted())
}

fn cmd_replay(args: &ReplayArgs, config: &CliConfig, format: OutputFormat) -> anyhow::Result<String> {
    let (emitted, window, snapshot) = if args.shape.is_map() {
        if args.window.is_some() {
            bail!("--window only applies to list logs");
        }
        let log: Vec<MapDiff<String, Value>> = read_log(&args.log)?;
        let dispatcher = MapDispatcher::<String, Value>::new();
        let listener = MapListener::new();
        dispatcher.add_listener(listener.clone())?;

        let emitted = replay_into(&dispatcher, log)?;
        listener.get_new_diffs().context("draining listener")?;
        (emitted, None, serde_json::to_value(listener.get_snapshot())?)
    } else {
        let log: Vec<ListDiff<Value>> = read_log(&args.log)?;
        let window = args.window.or(config.window);
        let dispatcher = ListDispatcher::<Value>::new();
        let listener = ListListener::new();
        match window {
            Some(max_size) => {
                dispatcher.add_listener(BoundedProjection::new(listener.clone(), max_size))?
            }
            None => dispatcher.add_listener(listener.clone())?,
        };

        let emitted = replay_into(&dispatcher, log)?;
        listener.get_new_diffs().context("draining listener")?;
        (emitted, window, Value::from(listener.get_snapshot()))
    };

    if format == OutputFormat::Json {
        let report = json!({ "emitted": emitted, "window": window, "snapshot": snapshot });
        return Ok(serde_json::to_string_pretty(&report)?);
    }
    let mut out = format!("{} Replayed {} diffs", "✓".green().bold(), emitted.to_string().bold());
    if let Some(max_size) = window {
        out.push_str(&format!(" (window {})", max_size.to_string().cyan()));
    }
    out.push('\n');
    out.push_str(&serde_json::to_string_pretty(&snapshot)?);
    Ok(out)
}
