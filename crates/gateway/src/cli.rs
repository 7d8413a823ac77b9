//! CLI surface (spec §2A: "no admin CLI/TUI is built... but no CLI wiring
//! is required beyond what main needs to invoke it"). Just enough to load
//! a config file, start the daemon, and run the doctor-style self-check —
//! modeled on the teacher's `cli::{Cli, Command}` / `cli::load_config`.

use clap::{Parser, Subcommand};
use hub_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "hubd", version, about = "hub server core daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the daemon (default when no subcommand is given).
    Serve,
    /// Run startup self-checks against the current configuration without
    /// binding a listener.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse and validate the config file, reporting every issue.
    Validate,
    /// Dump the resolved configuration (with defaults filled in) as TOML.
    Show,
}

/// Load configuration from the path named by `HUB_CONFIG` (`hub.toml` by
/// default). File discovery/watching mechanics are out of scope (§1); this
/// is the one-shot parse the daemon needs to get an already-loaded `Config`.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("HUB_CONFIG").unwrap_or_else(|_| "hub.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

pub fn print_validation(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == hub_domain::config::ConfigSeverity::Error)
        .count();
    for issue in &issues {
        println!("{issue}");
    }
    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count,
        issues.len() - error_count
    );
    error_count == 0
}

pub fn show_config(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(text) => print!("{text}"),
        Err(e) => eprintln!("failed to serialize config: {e}"),
    }
}

/// Doctor-style startup self-check (spec §2A): config validation plus a
/// few environment sanity checks. Returns `true` if every check passed.
pub fn run_doctor(config: &Config, config_path: &str) -> bool {
    println!("hub doctor");
    println!("==========\n");

    let mut all_passed = true;

    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );

    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == hub_domain::config::ConfigSeverity::Error)
        .count();
    print_check(
        "config validation",
        error_count == 0,
        format!("{} issue(s), {} error(s)", issues.len(), error_count),
    );
    for issue in &issues {
        println!("      {issue}");
    }
    if error_count > 0 {
        all_passed = false;
    }

    let sandbox_ok = dir_writable(&config.workspace.sandbox_path);
    print_check(
        "sandbox path writable",
        sandbox_ok,
        config.workspace.sandbox_path.display().to_string(),
    );
    all_passed &= sandbox_ok;

    let store_ok = dir_writable(&config.workspace.agent_store_path);
    print_check(
        "agent store path writable",
        store_ok,
        config.workspace.agent_store_path.display().to_string(),
    );
    all_passed &= store_ok;

    let bind_ok = std::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).is_ok();
    print_check(
        "bind address free",
        bind_ok,
        format!("{}:{}", config.server.host, config.server.port),
    );
    all_passed &= bind_ok;

    println!();
    if all_passed {
        println!("all checks passed.");
    } else {
        println!("some checks failed. review the output above.");
    }
    all_passed
}

fn dir_writable(path: &std::path::Path) -> bool {
    std::fs::create_dir_all(path).is_ok()
}

fn print_check(name: &str, passed: bool, detail: String) {
    let mark = if passed { "ok" } else { "FAIL" };
    println!("  [{mark}] {name}: {detail}");
}
