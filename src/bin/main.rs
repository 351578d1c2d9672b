//! CLI tool for Silicon Monitor performance counters (simon-perf)

#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand};
#[cfg(feature = "cli")]
use colored::Colorize;
#[cfg(feature = "cli")]
use simonperf::perfmon::{CounterSource, PerfContext, PropertyDescriptor, WildcardMatcher};
#[cfg(feature = "cli")]
use simonperf::PerfConfig;
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "cli")]
use std::sync::Arc;
#[cfg(feature = "cli")]
use std::time::Duration;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "simon-perf")]
#[command(about = "Silicon Monitor: read performance counters through native counters or management queries", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Repeat the query every poll interval until Ctrl+C
    #[arg(short, long, global = true)]
    watch: bool,

    /// Skip native counters and read from the management source only
    #[arg(long, global = true)]
    management: bool,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Read one value per counter from a category
    Query {
        #[command(flatten)]
        target: Target,

        /// Instance for every counter (e.g. _Total)
        #[arg(short, long)]
        instance: Option<String>,
    },
    /// Read every counter across all instances matching a filter
    Wildcard {
        #[command(flatten)]
        target: Target,

        /// Instance filter; '*' matches any run, a leading '^' negates
        #[arg(short, long, default_value = "*")]
        filter: String,
    },
    /// Test a candidate instance name against a filter pattern
    Match {
        candidate: String,
        pattern: String,
    },
    /// Show the loaded configuration
    Config {
        /// Print a sample configuration file instead
        #[arg(long)]
        sample: bool,
    },
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct Target {
    /// Counter category (e.g. Processor)
    #[arg(long)]
    category: String,

    /// NAME=COUNTER[:PROPERTY], repeatable
    #[arg(long = "counter", required = true)]
    counters: Vec<String>,

    /// Management class to fall back on (may carry a WHERE clause)
    #[arg(long)]
    class: Option<String>,
}

/// One `--counter` argument.
#[cfg(feature = "cli")]
struct CounterArg {
    name: String,
    counter: String,
    property: String,
}

#[cfg(feature = "cli")]
impl CounterArg {
    fn parse(arg: &str) -> Result<Self, String> {
        let (name, rest) = arg
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=COUNTER[:PROPERTY], got '{}'", arg))?;
        let (counter, property) = match rest.rsplit_once(':') {
            Some((counter, property)) => (counter.to_string(), property.to_string()),
            None => (rest.to_string(), management_property(rest)),
        };
        if name.is_empty() || counter.is_empty() {
            return Err(format!("empty name or counter in '{}'", arg));
        }
        Ok(Self {
            name: name.to_string(),
            counter,
            property,
        })
    }
}

/// Management column for a counter name: `% Processor Time` is
/// `PercentProcessorTime`, `Pages/sec` is `PagesPersec`.
#[cfg(feature = "cli")]
fn management_property(counter: &str) -> String {
    counter
        .replace('%', "Percent")
        .replace('/', "Per")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Default management class for a category.
#[cfg(feature = "cli")]
fn default_class(category: &str) -> String {
    format!("Win32_PerfRawData_PerfOS_{}", management_property(category))
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PerfConfig::from_toml_file(&path.to_string_lossy())?,
        None => PerfConfig::default(),
    };

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default());
    if let Some(level) = forced_log_level(cli.config.as_ref(), &config) {
        logger.filter_level(level);
    }
    logger.init();

    if cli.management {
        config.native.disabled = true;
    }

    match &cli.command {
        Commands::Match { candidate, pattern } => {
            let matcher = WildcardMatcher::new(pattern);
            let matched = matcher.matches(candidate);
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "candidate": candidate,
                        "pattern": pattern,
                        "matches": matched,
                    }))?
                );
            } else if matched {
                println!("{} '{}' matches '{}'", "✓".green(), candidate, pattern);
            } else {
                println!("{} '{}' does not match '{}'", "✗".red(), candidate, pattern);
            }
        }

        Commands::Config { sample } => {
            if *sample {
                print!("{}", PerfConfig::sample_toml());
            } else if cli.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }

        Commands::Query { target, instance } => {
            let ctx = PerfContext::system(config.clone());
            let counters = parse_counters(&target.counters)?;

            let mut builder = PropertyDescriptor::builder(target.category.as_str());
            for c in &counters {
                builder = builder.counter(
                    c.name.clone(),
                    instance.as_deref(),
                    c.counter.as_str(),
                    c.property.as_str(),
                );
            }
            let class = target
                .class
                .clone()
                .unwrap_or_else(|| default_class(&target.category));
            let mut group = ctx.counter_group(builder.build()?, &class)?;

            let running = install_ctrlc(cli.watch)?;
            loop {
                let values = group.query()?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "source": group.source(),
                            "timestamp": group.last_timestamp(),
                            "values": values,
                        }))?
                    );
                } else {
                    print_header(&target.category, group.source(), group.last_timestamp());
                    for c in &counters {
                        match values.get(&c.name) {
                            Some(v) => println!("  {:<24} {}", c.name.white().bold(), v.to_string().green()),
                            None => println!("  {:<24} {}", c.name.white().bold(), "n/a".dimmed()),
                        }
                    }
                }
                if !wait_next(cli.watch, &running, config.poll_interval_ms) {
                    break;
                }
            }
            drop(group);
            ctx.shutdown();
        }

        Commands::Wildcard { target, filter } => {
            const INSTANCE_FIELD: &str = "instance";

            let ctx = PerfContext::system(config.clone());
            let counters = parse_counters(&target.counters)?;
            if counters.iter().any(|c| c.name == INSTANCE_FIELD) {
                return Err(format!("'{}' is reserved for the instance column", INSTANCE_FIELD).into());
            }

            let mut builder = PropertyDescriptor::wildcard(
                target.category.as_str(),
                INSTANCE_FIELD.to_string(),
                filter.as_str(),
                "Name",
            );
            for c in &counters {
                builder = builder.counter(c.name.clone(), None, c.counter.as_str(), c.property.as_str());
            }
            let class = target
                .class
                .clone()
                .unwrap_or_else(|| default_class(&target.category));
            let mut group = ctx.wildcard_group(builder.build()?, &class)?;

            let running = install_ctrlc(cli.watch)?;
            loop {
                let values = group.query_wildcard()?;
                let instances = group.last_matched_instances();
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "source": group.source(),
                            "timestamp": group.last_timestamp(),
                            "instances": instances,
                            "values": values,
                        }))?
                    );
                } else {
                    print_header(&target.category, group.source(), group.last_timestamp());
                    if instances.is_empty() {
                        println!("  {}", "no matching instances".yellow());
                    }
                    for (i, name) in instances.iter().enumerate() {
                        println!("  {}", name.cyan().bold());
                        for c in &counters {
                            let value = values.get(&c.name).and_then(|list| list.get(i));
                            match value {
                                Some(v) => println!("    {:<22} {}", c.name.white(), v.to_string().green()),
                                None => println!("    {:<22} {}", c.name.white(), "n/a".dimmed()),
                            }
                        }
                    }
                }
                if !wait_next(cli.watch, &running, config.poll_interval_ms) {
                    break;
                }
            }
            drop(group);
            ctx.shutdown();
        }
    }

    Ok(())
}

/// Level applied over `RUST_LOG`. Only a `--config` file's `log_level` overrides it.
#[cfg(feature = "cli")]
fn forced_log_level(config_path: Option<&PathBuf>, config: &PerfConfig) -> Option<log::LevelFilter> {
    config_path.map(|_| config.log_level.into())
}

#[cfg(feature = "cli")]
fn parse_counters(args: &[String]) -> Result<Vec<CounterArg>, String> {
    args.iter().map(|a| CounterArg::parse(a)).collect()
}

#[cfg(feature = "cli")]
fn print_header(category: &str, source: CounterSource, timestamp: u64) {
    let when = match chrono::DateTime::from_timestamp_millis(timestamp as i64) {
        Some(t) if timestamp > 0 => t.format("%H:%M:%S%.3f").to_string(),
        _ => "-".to_string(),
    };
    println!(
        "{} {} {}",
        format!("═══ {} ═══", category).cyan().bold(),
        format!("[{}]", source).magenta(),
        when.dimmed()
    );
}

#[cfg(feature = "cli")]
fn install_ctrlc(watch: bool) -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    if watch {
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        })?;
    }
    Ok(running)
}

/// Sleep one poll interval in watch mode. False once the loop should end.
#[cfg(feature = "cli")]
fn wait_next(watch: bool, running: &AtomicBool, interval_ms: u64) -> bool {
    if !watch {
        return false;
    }
    let step = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < Duration::from_millis(interval_ms) {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        std::thread::sleep(step);
        waited += step;
    }
    running.load(Ordering::SeqCst)
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_counter_arg_with_property() {
        let arg = CounterArg::parse("busy=% Processor Time:PercentProcessorTime").unwrap();
        assert_eq!(arg.name, "busy");
        assert_eq!(arg.counter, "% Processor Time");
        assert_eq!(arg.property, "PercentProcessorTime");
    }

    #[test]
    fn test_counter_arg_derives_property() {
        let arg = CounterArg::parse("pages=Pages/sec").unwrap();
        assert_eq!(arg.counter, "Pages/sec");
        assert_eq!(arg.property, "PagesPersec");
    }

    #[test]
    fn test_counter_arg_rejects_malformed() {
        assert!(CounterArg::parse("no-equals").is_err());
        assert!(CounterArg::parse("=Pages/sec").is_err());
    }

    #[test]
    fn test_log_level_follows_env_without_config_file() {
        let mut config = PerfConfig::default();
        config.log_level = simonperf::config::LogLevel::Trace;
        assert_eq!(forced_log_level(None, &config), None);

        let path = PathBuf::from("simon-perf.toml");
        assert_eq!(forced_log_level(Some(&path), &config), Some(log::LevelFilter::Trace));
    }

    #[test]
    fn test_default_class() {
        assert_eq!(default_class("Processor"), "Win32_PerfRawData_PerfOS_Processor");
    }
}
