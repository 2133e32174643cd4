use std::process;
use std::time::Duration;

use anyhow::Context;
use mutex_pool::{HostMutex, PoolCell};
use mutex_pool_stress::{StressConfig, StressReport};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const POOL_SIZE: usize = 8;

static SLOTS: [HostMutex; POOL_SIZE] = [const { HostMutex::new() }; POOL_SIZE];
static POOL: PoolCell<'static, HostMutex, POOL_SIZE> = PoolCell::new();

#[derive(Debug)]
struct Options {
    config: StressConfig,
    json: bool,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("Usage: mutex-pool-stress [--threads <n>] [--duration-ms <ms>] [--hold-us <us>] [--json]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --threads <n>        Worker threads [default: 8]");
            eprintln!("  --duration-ms <ms>   Run time in milliseconds [default: 1000]");
            eprintln!("  --hold-us <us>       Time each worker holds a locked mutex [default: 50]");
            eprintln!("  --json               Print the report as JSON");
            eprintln!();
            eprintln!("Logging: RUST_LOG, or POOL_LOG=debug|info|warn|error; LOG_FORMAT=json");
            process::exit(2);
        }
    };

    init_tracing();

    match run(&options) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("POOL_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!(
            "mutex_pool={level},mutex_pool_stress={level}"
        ))
    };

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut config = StressConfig::default();
    let mut json = false;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--threads" => {
                i += 1;
                config.threads = parse_number(args.get(i), "--threads")?;
                if config.threads == 0 {
                    return Err("--threads must be at least 1".to_string());
                }
            }
            "--duration-ms" => {
                i += 1;
                config.duration = Duration::from_millis(parse_number(args.get(i), "--duration-ms")?);
            }
            "--hold-us" => {
                i += 1;
                config.hold = Duration::from_micros(parse_number(args.get(i), "--hold-us")?);
            }
            "--json" => json = true,
            "--help" | "-h" => return Err("".to_string()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(Options { config, json })
}

fn parse_number<T: std::str::FromStr>(value: Option<&String>, flag: &str) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .map_err(|_| format!("{flag} expects a number, got '{value}'"))
}

fn run(options: &Options) -> anyhow::Result<bool> {
    let pool = POOL
        .initialize(&SLOTS)
        .context("failed to initialize mutex pool")?;

    let report = mutex_pool_stress::run(pool, &options.config);

    if options.json {
        let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{json}");
    } else {
        print_summary(&report);
    }

    Ok(report.is_clean())
}

fn print_summary(report: &StressReport) {
    println!(
        "{} threads, {} ms: {} cycles, {} violations, {} gave up",
        report.threads, report.elapsed_ms, report.cycles, report.violations, report.gave_up
    );
    println!(
        "pool: capacity {}, high water {}, acquired {}, released {}, exhausted {}",
        report.stats.capacity,
        report.stats.high_water,
        report.stats.acquired_total,
        report.stats.released_total,
        report.stats.exhausted_total
    );
    if !report.is_clean() {
        println!(
            "FAILED: acquire errors {}, lock errors {}, release errors {}, quiescent {}",
            report.acquire_errors, report.lock_errors, report.release_errors, report.quiescent
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("mutex-pool-stress")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_flags() {
        let options = parse_args(&args(&[])).unwrap();
        assert_eq!(options.config.threads, 8);
        assert_eq!(options.config.duration, Duration::from_secs(1));
        assert!(!options.json);
    }

    #[test]
    fn flags_override_defaults() {
        let options = parse_args(&args(&[
            "--threads",
            "3",
            "--duration-ms",
            "250",
            "--hold-us",
            "7",
            "--json",
        ]))
        .unwrap();
        assert_eq!(options.config.threads, 3);
        assert_eq!(options.config.duration, Duration::from_millis(250));
        assert_eq!(options.config.hold, Duration::from_micros(7));
        assert!(options.json);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            parse_args(&args(&["--threads"])).unwrap_err(),
            "--threads requires a value"
        );
        assert_eq!(
            parse_args(&args(&["--threads", "many"])).unwrap_err(),
            "--threads expects a number, got 'many'"
        );
        assert!(parse_args(&args(&["--threads", "0"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
