//! `dongle-sim`: run a dongle through a seeded beacon and risk-broadcast
//! scenario and print the outcome as JSON.
//!
//! ```text
//! dongle-sim [CONFIG.toml] [SEED] [--beacons N] [--loss P] [--duplicate P]
//!            [--window TICKS] [--rounds N] [--pretty]
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

mod scenario;

use std::ffi::OsString;
use std::io::{self, Write as _};
use std::path::PathBuf;

use dongle_core::{Dongle, DongleConfig};
use dongle_error::Result;
use dongle_flash::MemCounterStore;
use tracing_subscriber::EnvFilter;

use crate::scenario::ScenarioParams;

#[derive(Debug, Clone, PartialEq)]
struct Options {
    config: Option<PathBuf>,
    params: ScenarioParams,
    pretty: bool,
}

fn main() {
    let exit_code = run_cli(std::env::args_os());
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run_cli<I>(os_args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let raw: Vec<String> = os_args
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    let tail = if raw.len() > 1 { &raw[1..] } else { &[] };

    if tail.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return 0;
    }
    let options = match parse_args(tail) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("error: {message}");
            return 2;
        }
    };

    init_tracing();
    match simulate(&options) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

fn print_help() {
    println!(
        "dongle-sim [CONFIG.toml] [SEED] [options]\n\
         \n\
         Positional:\n\
         \x20 CONFIG.toml       dongle configuration (defaults when omitted)\n\
         \x20 SEED              scenario seed (default 0)\n\
         \n\
         Options:\n\
         \x20 --beacons N       beacons in the scenario (default 6)\n\
         \x20 --loss P          periodic packet loss probability (default 0.2)\n\
         \x20 --duplicate P     periodic packet duplication probability (default 0.25)\n\
         \x20 --window TICKS    ticks during which beacons come and go (default 40)\n\
         \x20 --rounds N        risk broadcast rounds before giving up (default 16)\n\
         \x20 --pretty          pretty-print the JSON output"
    );
}

fn flag_value<'a>(tail: &'a [String], i: &mut usize, flag: &str) -> std::result::Result<&'a str, String> {
    *i += 1;
    tail.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> std::result::Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{flag}: `{value}` is not a valid number"))
}

fn parse_probability(flag: &str, value: &str) -> std::result::Result<f64, String> {
    let p: f64 = parse_number(flag, value)?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{flag}: {p} is not a probability"))
    }
}

fn parse_args(tail: &[String]) -> std::result::Result<Options, String> {
    let mut options = Options {
        config: None,
        params: ScenarioParams::default(),
        pretty: false,
    };
    let mut seed_given = false;

    let mut i = 0;
    while i < tail.len() {
        let arg = tail[i].as_str();
        match arg {
            "--beacons" => {
                options.params.beacons = parse_number(arg, flag_value(tail, &mut i, arg)?)?;
            }
            "--loss" => {
                options.params.loss = parse_probability(arg, flag_value(tail, &mut i, arg)?)?;
            }
            "--duplicate" => {
                options.params.duplicate = parse_probability(arg, flag_value(tail, &mut i, arg)?)?;
            }
            "--window" => {
                options.params.window = parse_number(arg, flag_value(tail, &mut i, arg)?)?;
            }
            "--rounds" => {
                options.params.max_rounds = parse_number(arg, flag_value(tail, &mut i, arg)?)?;
            }
            "--pretty" => options.pretty = true,
            other if other.starts_with("--") => {
                return Err(format!("unknown option `{other}`"));
            }
            other => {
                if let Ok(seed) = other.parse::<u64>() {
                    if seed_given {
                        return Err(format!("unexpected argument `{other}`"));
                    }
                    options.params.seed = seed;
                    seed_given = true;
                } else if options.config.is_none() {
                    options.config = Some(PathBuf::from(other));
                } else {
                    return Err(format!("unexpected argument `{other}`"));
                }
            }
        }
        i += 1;
    }
    Ok(options)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn simulate(options: &Options) -> Result<()> {
    let config = match &options.config {
        Some(path) => DongleConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => DongleConfig::default(),
    };
    let flash = scenario::device_flash(&config)?;
    let mut dongle = Dongle::open(config, flash, MemCounterStore::new())?;
    let output = scenario::run(&mut dongle, &options.params)?;

    let mut stdout = io::stdout().lock();
    if options.pretty {
        serde_json::to_writer_pretty(&mut stdout, &output).map_err(io::Error::from)?;
    } else {
        serde_json::to_writer(&mut stdout, &output).map_err(io::Error::from)?;
    }
    writeln!(stdout)?;
    Ok(())
}
