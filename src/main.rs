use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::warn;
use playtrigger::simulate::{Event, Simulator, Step};
use playtrigger::TriggerConfig;
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "playtrigger", version, about = "Drive one-shot play triggers")]
struct Cli {
    /// JSON file with a TriggerConfig; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Selector of the media element
    #[arg(long, global = true)]
    selector: Option<String>,

    /// Presentation class applied while playing
    #[arg(long = "class", global = true)]
    playing_class: Option<String>,

    /// Watchdog timeout for the end-of-playback event
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run events (activate, ended, reject[:reason], refuse[:reason], expire,
    /// reset, remove-media, state) and print one JSON step per line
    Simulate {
        #[arg(required = true)]
        events: Vec<String>,
    },
    /// Read `{"id": .., "event": ..}` lines on stdin, answer one line each
    Worker,
    /// Report the media element and triggers found in an HTML file
    Scan { file: PathBuf },
}

impl Cli {
    fn trigger_config(&self) -> anyhow::Result<TriggerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
            None => TriggerConfig::default(),
        };
        if let Some(s) = &self.selector {
            config.video_selector = s.clone();
        }
        if let Some(c) = &self.playing_class {
            config.playing_class = c.clone();
        }
        if self.timeout_ms.is_some() {
            config.ended_timeout_ms = self.timeout_ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize)]
struct Job {
    id: u64,
    #[serde(flatten)]
    event: Event,
}

#[derive(Serialize)]
struct Res {
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn handle_line(sim: &mut Simulator, line: &str) -> Res {
    match serde_json::from_str::<Job>(line) {
        Ok(job) => Res {
            id: job.id,
            step: Some(sim.apply(job.event)),
            error: None,
        },
        Err(e) => {
            warn!("malformed worker request: {}", e);
            let id = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_u64()))
                .unwrap_or(0);
            Res {
                id,
                step: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn worker_main(config: TriggerConfig) -> anyhow::Result<()> {
    let mut sim = Simulator::new(config)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let res = handle_line(&mut sim, &line);
        writeln!(out, "{}", serde_json::to_string(&res)?)?;
        out.flush()?;
    }
    Ok(())
}

fn simulate_main(config: TriggerConfig, events: &[String]) -> anyhow::Result<()> {
    let events = events
        .iter()
        .map(|e| e.parse::<Event>())
        .collect::<Result<Vec<_>, _>>()?;
    let mut sim = Simulator::new(config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for step in sim.run(events) {
        writeln!(out, "{}", serde_json::to_string(&step)?)?;
    }
    Ok(())
}

#[cfg(feature = "html")]
fn scan_main(config: TriggerConfig, file: &Path) -> anyhow::Result<()> {
    let html = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let bindings = playtrigger::page::PageBindings::scan(&html, &config)?;
    println!("{}", serde_json::to_string_pretty(&bindings)?);
    Ok(())
}

#[cfg(not(feature = "html"))]
fn scan_main(_config: TriggerConfig, _file: &Path) -> anyhow::Result<()> {
    anyhow::bail!("playtrigger was built without the `html` feature")
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.trigger_config()?;

    match &cli.command {
        Command::Simulate { events } => simulate_main(config, events),
        Command::Worker => worker_main(config),
        Command::Scan { file } => scan_main(config, file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playtrigger::simulate::Outcome;
    use playtrigger::{CycleEnd, PlaybackState};

    #[test]
    fn job_flattens_tagged_event() {
        let job: Job = serde_json::from_str(r#"{"id":7,"event":"reject","reason":"AbortError"}"#).unwrap();
        assert_eq!(job.id, 7);
        assert_eq!(
            job.event,
            Event::Reject {
                reason: "AbortError".into()
            }
        );

        let job: Job = serde_json::from_str(r#"{"id":8,"event":"remove_media"}"#).unwrap();
        assert_eq!(job.event, Event::RemoveMedia);
    }

    #[test]
    fn worker_answers_each_line() {
        let mut sim = Simulator::new(TriggerConfig::default()).unwrap();

        let res = handle_line(&mut sim, r#"{"id":1,"event":"activate"}"#);
        assert_eq!(res.id, 1);
        assert!(res.error.is_none());
        assert_eq!(res.step.as_ref().unwrap().state, PlaybackState::Playing);

        let res = handle_line(&mut sim, r#"{"id":2,"event":"ended"}"#);
        assert_eq!(
            res.step.unwrap().outcome,
            Outcome::Finished { end: CycleEnd::Ended }
        );
    }

    #[test]
    fn malformed_request_keeps_id() {
        let mut sim = Simulator::new(TriggerConfig::default()).unwrap();
        let res = handle_line(&mut sim, r#"{"id":3,"event":"jump"}"#);
        assert_eq!(res.id, 3);
        assert!(res.step.is_none());
        assert!(res.error.is_some());

        let json = serde_json::to_value(&res).unwrap();
        assert!(json.get("step").is_none());
    }
}
