use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use crate::config::Config;
use crate::feed::YahooChartClient;
use crate::logging::init_tracing;
use crate::study::{run_study, StudyScope};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Study {
        scope: StudyScope,
        config_path: Option<PathBuf>,
    },
    Help,
}

pub fn parse_command(args: &[String]) -> Result<Command> {
    let mut scope = None;
    let mut config_path = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "run" | "panel" | "robustness" if scope.is_some() => {
                bail!("only one subcommand may be given (found `{}`)", arg)
            }
            "run" => scope = Some(StudyScope::Full),
            "panel" => scope = Some(StudyScope::Panel),
            "robustness" => scope = Some(StudyScope::Robustness),
            "help" | "--help" | "-h" => return Ok(Command::Help),
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("`--config` requires a path argument"))?;
                config_path = Some(PathBuf::from(path));
            }
            other => bail!(
                "unknown argument `{}`. expected one of: run|panel|robustness|help [--config PATH]",
                other
            ),
        }
    }
    Ok(Command::Study {
        scope: scope.unwrap_or(StudyScope::Full),
        config_path,
    })
}

pub fn run_cli(args: &[String]) -> Result<()> {
    let (scope, config_path) = match parse_command(args)? {
        Command::Help => {
            print_usage();
            return Ok(());
        }
        Command::Study { scope, config_path } => (scope, config_path),
    };

    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };
    init_tracing(&config.logging)?;

    let source = YahooChartClient::new(&config.equity.feed_base_url)
        .context("failed to set up the equity price feed")?;
    let outcome = run_study(&config, &source, scope)?;

    println!(
        "wrote {} artifacts to {} ({} panel rows)",
        outcome.outputs.len(),
        outcome.output_dir.display(),
        outcome.panel_rows
    );
    for name in &outcome.outputs {
        println!("  {name}");
    }
    Ok(())
}

fn print_usage() {
    println!("basis-lab: rolling-regression CDS basis study");
    println!();
    println!("usage: basis-lab [run|panel|robustness|help] [--config PATH]");
    println!("  run         panel, metrics, robustness sweep, charts and summary (default)");
    println!("  panel       panel and metrics only");
    println!("  robustness  window x half-life sweep only");
    println!();
    println!("env: BASIS_LAB_CONFIG, BASIS_LAB_OUTPUT_DIR, EQUITY_FEED_BASE_URL, RUST_LOG");
}
