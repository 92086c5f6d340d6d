use parsefuzz_core::config::HarnessConfig;
use parsefuzz_core::executor::IterationLoop;
use parsefuzz_core::mode::{self, EngineAttachment, Mode};
use parsefuzz_core::source::{HarnessSource, OneShotSource, PersistentSource};
use parsefuzz_core::{
    HarnessSettings, JsonCStrAdapter, JsonInsituAdapter, JsonStreamAdapter, JsonTreeAdapter,
    ParserAdapter, ParserKind, YamlAdapter,
};

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (`tracing` directive syntax).
const LOG_ENV_VAR: &str = "PARSEFUZZ_LOG";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (default: ./parsefuzz.toml if present)
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Parser adapter to drive: json-tree, json-stream, json-insitu, json-cstr, yaml
    #[clap(short, long)]
    parser: Option<ParserKind>,
    /// Maximum bytes read per test case; longer inputs are truncated
    #[clap(long)]
    buffer_capacity: Option<usize>,
    /// Test cases per process in persistent mode
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Read the one-shot test case from this file instead of stdin
    #[clap(long)]
    input: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), anyhow::Error> {
    init_logging();
    let cli = Cli::parse();

    let (mut config, config_path) = HarnessConfig::resolve(cli.config_file.as_deref())?;
    match &config_path {
        Some(path) => info!(?path, "loaded configuration"),
        None => info!("no configuration file, using built-in defaults"),
    }

    if let Some(parser) = cli.parser {
        config.harness.parser = parser;
    }
    if let Some(capacity) = cli.buffer_capacity {
        config.harness.buffer_capacity = capacity;
    }
    if let Some(iterations) = cli.iterations {
        config.harness.max_iterations = iterations;
    }
    config.validate()?;
    debug!(?config, "effective configuration");

    let detection = mode::detect();
    let mode = mode::install(detection.mode);
    if let Some(path) = ignored_input(mode, cli.input.as_deref()) {
        warn!(?path, "--input is ignored while an engine delivers test cases");
    }
    info!(%mode, parser = %config.harness.parser, "starting harness");

    let settings = &config.harness;
    match detection.engine {
        Some(EngineAttachment {
            channel,
            fork_server,
        }) => {
            // Every forked child takes the source out of its own copy of this slot.
            let mut source = Some(HarnessSource::Persistent(PersistentSource::new(channel)));
            fork_server
                .serve(|| match source.take() {
                    Some(source) => exit_code(run_harness(mode, source, settings)),
                    None => 1,
                })
                .context("Engine fork server failed")
        }
        None => {
            let source = match &cli.input {
                Some(path) => HarnessSource::File(
                    OneShotSource::open(path)
                        .with_context(|| format!("Failed to open input file {path:?}"))?,
                ),
                None => HarnessSource::Stdin(OneShotSource::stdin()),
            };
            run_harness(mode, source, settings)
        }
    }
}

/// `--input` only applies to one-shot runs; returns it when it is being dropped.
fn ignored_input(mode: Mode, input: Option<&Path>) -> Option<&Path> {
    match mode {
        Mode::Persistent => input,
        Mode::OneShot => None,
    }
}

fn exit_code(result: Result<(), anyhow::Error>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:#}");
            1
        }
    }
}

fn run_harness(
    mode: Mode,
    source: HarnessSource,
    settings: &HarnessSettings,
) -> Result<(), anyhow::Error> {
    match settings.parser {
        ParserKind::JsonTree => drive(mode, source, JsonTreeAdapter, settings),
        ParserKind::JsonStream => drive(mode, source, JsonStreamAdapter, settings),
        ParserKind::JsonInsitu => drive(mode, source, JsonInsituAdapter::new(), settings),
        ParserKind::JsonCstr => drive(mode, source, JsonCStrAdapter::new(), settings),
        ParserKind::Yaml => drive(mode, source, YamlAdapter, settings),
    }
}

/// Runs the loop monomorphised for one adapter type.
fn drive<A: ParserAdapter>(
    mode: Mode,
    source: HarnessSource,
    adapter: A,
    settings: &HarnessSettings,
) -> Result<(), anyhow::Error> {
    let summary = IterationLoop::new(mode, source, adapter, settings)
        .run()
        .context("Harness input channel failed")?;
    debug!(
        iterations = summary.iterations,
        parsed = summary.parsed,
        rejected = summary.rejected,
        "harness finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::try_parse_from([
            "parsefuzz",
            "--parser",
            "json-insitu",
            "--buffer-capacity",
            "4096",
            "-i",
            "10",
            "--input",
            "case.json",
        ])
        .unwrap();
        assert_eq!(cli.parser, Some(ParserKind::JsonInsitu));
        assert_eq!(cli.buffer_capacity, Some(4096));
        assert_eq!(cli.iterations, Some(10));
        assert_eq!(cli.input, Some(PathBuf::from("case.json")));
    }

    #[test]
    fn rejects_unknown_parser() {
        assert!(Cli::try_parse_from(["parsefuzz", "--parser", "xml"]).is_err());
    }

    #[test]
    fn input_is_only_ignored_in_persistent_mode() {
        let input = Path::new("case.json");
        assert_eq!(ignored_input(Mode::Persistent, Some(input)), Some(input));
        assert_eq!(ignored_input(Mode::OneShot, Some(input)), None);
        assert_eq!(ignored_input(Mode::Persistent, None), None);
    }

    #[test]
    fn failed_run_maps_to_nonzero_exit_code() {
        assert_eq!(exit_code(Ok(())), 0);
        assert_eq!(exit_code(Err(anyhow::anyhow!("engine went away"))), 1);
    }

    #[test]
    fn no_arguments_means_all_defaults() {
        let cli = Cli::try_parse_from(["parsefuzz"]).unwrap();
        assert!(cli.config_file.is_none());
        assert!(cli.parser.is_none());
        assert!(cli.input.is_none());
    }
}
