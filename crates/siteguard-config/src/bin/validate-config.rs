//! Config validation CLI tool
//!
//! Validates a siteguardd configuration file and reports any errors.

use siteguard_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a siteguardd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match siteguard_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", siteguard_config::CURRENT_CONFIG_VERSION);
            println!("  Mode: {}", policy.service.mode);
            println!("  Rollover: {}", policy.service.rollover);
            println!("  Tick interval: {}s", policy.service.tick_interval.as_secs());
            if let Some(url) = &policy.service.block_page_url {
                println!("  Block page: {}", url);
            }
            println!(
                "  Global limits: weekday {}, weekend {}",
                format_limit(policy.global_limits.weekday),
                format_limit(policy.global_limits.weekend)
            );
            println!("  Sites: {}", policy.sites.len());

            if !policy.sites.is_empty() {
                println!();
                println!("Sites:");
                for (host, rule) in &policy.sites {
                    if rule.unrestricted {
                        println!("  - {} [unrestricted]", host);
                        continue;
                    }
                    let mut parts = Vec::new();
                    if let Some(weekday) = &rule.weekday {
                        parts.push(format!(
                            "weekday: {} limit, {} range(s)",
                            format_limit(weekday.daily_limit_minutes),
                            weekday.gating_ranges().map_or(0, |r| r.len())
                        ));
                    }
                    if let Some(weekend) = &rule.weekend {
                        parts.push(format!(
                            "weekend: {} limit, {} range(s)",
                            format_limit(weekend.daily_limit_minutes),
                            weekend.gating_ranges().map_or(0, |r| r.len())
                        ));
                    }
                    println!("  - {}: {}", host, parts.join("; "));
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                siteguard_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                siteguard_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                siteguard_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                siteguard_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        siteguard_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

fn format_limit(minutes: Option<u32>) -> String {
    match minutes {
        Some(m) => format!("{} min", m),
        None => "no".into(),
    }
}
