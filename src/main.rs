use std::fs::{self, File};

use anyhow::{bail, Context, Result};
use kestrel_schedule::cli::CliOptions;
use kestrel_schedule::config::SchedulerConfig;
use kestrel_schedule::harness::{load_fixture, run_fixture_with_config, HarnessOutput};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let options = match CliOptions::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            eprintln!("{}", CliOptions::usage());
            std::process::exit(2);
        }
    };
    if options.help {
        println!("{}", CliOptions::usage());
        return;
    }
    init_tracing(options.verbose);
    if let Err(err) = run(&options) {
        eprintln!("[kestrel-schedule] error: {err:?}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();
}

fn run(options: &CliOptions) -> Result<()> {
    let mut config = match &options.config {
        Some(path) => SchedulerConfig::load_or_default(path),
        None => SchedulerConfig::default(),
    };
    let overrides = options.config_overrides();
    if !overrides.is_empty() {
        tracing::info!(fields = ?overrides.applied_fields(), "applying command-line overrides");
        config.apply_overrides(&overrides);
    }

    let Some(fixture_path) = &options.fixture else { bail!("--fixture <path> is required") };
    let fixture = load_fixture(fixture_path)?;
    let output = run_fixture_with_config(&fixture, &config)?;

    if let Some(path) = &options.write_output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating output directory '{}'", parent.display()))?;
            }
        }
        let file = File::create(path).with_context(|| format!("writing harness output to '{}'", path.display()))?;
        serde_json::to_writer_pretty(file, &output).with_context(|| "serializing harness output")?;
        println!("[kestrel-schedule] wrote {}", path.display());
    }

    if let Some(path) = &options.golden {
        let file = File::open(path).with_context(|| format!("opening golden file '{}'", path.display()))?;
        let expected: HarnessOutput = serde_json::from_reader(file).with_context(|| "parsing golden JSON")?;
        if expected != output {
            bail!(
                "golden mismatch for {} (use --write-output to refresh):\nexpected: {}\nactual:   {}",
                fixture_path.display(),
                serde_json::to_string(&expected).unwrap_or_default(),
                serde_json::to_string(&output).unwrap_or_default(),
            );
        }
        println!("[kestrel-schedule] matched golden {}", path.display());
    } else if options.write_output.is_none() {
        serde_json::to_writer_pretty(std::io::stdout(), &output)?;
        println!();
    }

    Ok(())
}
