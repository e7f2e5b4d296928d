use crate::cache::InvalidationMode;
use crate::config::SchedulerConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOptions {
    pub fixture: Option<PathBuf>,
    pub golden: Option<PathBuf>,
    pub write_output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub help: bool,
    invalidation: Option<InvalidationMode>,
    frame_groups: Option<Vec<String>>,
    catch_panics: Option<bool>,
}

impl CliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            match flag {
                "--verbose" | "-v" => {
                    options.verbose = true;
                    continue;
                }
                "--help" | "-h" => {
                    options.help = true;
                    continue;
                }
                _ => {}
            }
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Run with --help for usage.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "fixture" => options.fixture = Some(PathBuf::from(value)),
                "golden" => options.golden = Some(PathBuf::from(value)),
                "write-output" => options.write_output = Some(PathBuf::from(value)),
                "config" => options.config = Some(PathBuf::from(value)),
                "invalidation" => options.invalidation = Some(parse_invalidation(&value)?),
                "groups" => options.frame_groups = Some(parse_groups(&value)?),
                "catch-panics" => options.catch_panics = Some(parse_bool_flag("catch-panics", &value)?),
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --fixture, --golden, --write-output, --config, \
                     --invalidation, --groups, --catch-panics, --verbose."
                ),
            }
        }
        if !options.help && options.fixture.is_none() {
            bail!("--fixture <path> is required");
        }
        Ok(options)
    }

    pub fn config_overrides(&self) -> SchedulerConfigOverrides {
        SchedulerConfigOverrides {
            invalidation: self.invalidation,
            frame_groups: self.frame_groups.clone(),
            catch_panics: self.catch_panics,
        }
    }

    pub fn usage() -> &'static str {
        "Usage: kestrel_schedule --fixture <path> [--golden <path>] [--write-output <path>] [--config <path>]\n\
         \x20 --invalidation fine|coarse   Cache invalidation granularity\n\
         \x20 --groups a,b,c               Tag groups run each frame, in order\n\
         \x20 --catch-panics on|off        Isolate panicking callbacks\n\
         \x20 -v, --verbose                Debug-level logging"
    }
}

fn parse_invalidation(value: &str) -> Result<InvalidationMode> {
    match value.to_ascii_lowercase().as_str() {
        "fine" => Ok(InvalidationMode::Fine),
        "coarse" => Ok(InvalidationMode::Coarse),
        other => bail!("Invalid invalidation mode '{other}'. Use fine or coarse."),
    }
}

fn parse_groups(value: &str) -> Result<Vec<String>> {
    let groups: Vec<String> =
        value.split(',').map(str::trim).filter(|group| !group.is_empty()).map(str::to_string).collect();
    if groups.is_empty() {
        return Err(anyhow!("empty group list")).with_context(|| format!("Invalid --groups value '{value}'"));
    }
    Ok(groups)
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}
