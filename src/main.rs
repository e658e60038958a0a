pub mod models {
    pub mod hue;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
    pub mod store;
}
pub mod discovery;
pub mod schema;
pub mod services {
    pub mod controller;
    pub mod gate;
    pub mod schedule;
}

use crate::client::HueClient;
use crate::config::Config;
use crate::db::store::PgStore;
use crate::services::controller::{BridgeController, ControllerSettings, SsdpLocator};
use crate::services::schedule;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{error, info};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

pub fn run(set_light: Option<(String, bool)>) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (poll_spacing={}s, retry_backoff={}s, discovery_timeout={}s, census_time={})",
        cfg.poll_spacing.as_secs(),
        cfg.retry_backoff.as_secs(),
        cfg.discovery_timeout.as_secs(),
        cfg.census_time
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "-".to_string()),
    );

    // 2) Connect DB
    let mut conn = PgConnection::establish(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");

    // 3) Apply pending database migrations
    apply_database_migrations(&mut conn)?;

    // 4) Build the bridge controller
    let client = HueClient::new(cfg.request_timeout);
    let locator = SsdpLocator {
        timeout: cfg.discovery_timeout,
    };
    let settings = ControllerSettings {
        devicetype: cfg.devicetype.clone(),
        poll_spacing: cfg.poll_spacing,
        retry_backoff: cfg.retry_backoff,
        census_time: cfg.census_time,
    };
    let mut controller = BridgeController::new(PgStore::new(conn), client, locator, settings);

    // 5) Make sure the ability row exists
    controller
        .ensure_ability()
        .map_err(|e| format!("ability registration failed: {}", e))?;

    // 6) Report scheduled light actions on record
    let schedules = schedule::scheduled_lights(controller.store_mut());
    info!("{} scheduled light action(s) on record", schedules.len());

    // 7) One-shot switch, or the poll loop
    if let Some((unique_id, on)) = set_light {
        controller
            .connect_or_discover()
            .map_err(|e| format!("bridge connect failed: {}", e))?;
        controller
            .set_light(&unique_id, on)
            .map_err(|e| format!("switching light failed: {}", e))?;
        return Ok(());
    }

    controller.run()
}

fn configure_env_from_cli() -> Result<(Option<LoadedEnvFile>, Option<(String, bool)>), String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    let mut set_light: Option<(String, bool)> = None;

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--set-light") => {
                if set_light.is_some() {
                    return Err("`--set-light` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--set-light` requires a UNIQUEID=on|off argument".to_string())?;
                let value = value
                    .to_str()
                    .ok_or_else(|| "argument contains invalid UTF-8".to_string())?;
                set_light = Some(parse_set_light(value)?);
            }
            Some(s) if s.starts_with("--set-light=") => {
                if set_light.is_some() {
                    return Err("`--set-light` provided more than once".to_string());
                }
                let raw = &s["--set-light=".len()..];
                if raw.is_empty() {
                    return Err("`--set-light` requires a UNIQUEID=on|off argument".to_string());
                }
                set_light = Some(parse_set_light(raw)?);
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    let loaded = if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Some(LoadedEnvFile { path, explicit: true })
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            load_env_file(&default_path)?;
            Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            })
        } else {
            None
        }
    };

    Ok((loaded, set_light))
}

fn parse_set_light(raw: &str) -> Result<(String, bool), String> {
    let (unique_id, state) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid `--set-light` value (expected UNIQUEID=on|off): {}", raw))?;
    let unique_id = unique_id.trim();
    if unique_id.is_empty() {
        return Err("`--set-light` requires a light unique id".to_string());
    }
    let on = match state.trim() {
        "on" => true,
        "off" => false,
        other => return Err(format!("invalid light state (expected on|off): {}", other)),
    };
    Ok((unique_id.to_string(), on))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    let file = File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
    let reader = BufReader::new(file);

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("failed to read {} at line {}: {}", path.display(), index + 1, e))?;
        match parse_env_assignment(&line) {
            Ok(Some((key, value))) => {
                // Preserve any value that was already supplied via the process environment.
                if std::env::var_os(&key).is_none() {
                    // Updating process-level environment variables is unsafe on some targets.
                    unsafe {
                        std::env::set_var(key, value);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                return Err(format!("{}:{}: {}", path.display(), index + 1, e));
            }
        }
    }

    Ok(())
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let without_export = trimmed
        .strip_prefix("export ")
        .map(|s| s.trim_start())
        .unwrap_or(trimmed);

    let mut parts = without_export.splitn(2, '=');
    let key = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| "missing environment variable name".to_string())?;
    let value_part = parts.next().ok_or_else(|| "missing '=' in assignment".to_string())?;

    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(|c| c.is_whitespace()) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let value = parse_env_value(value_part)?;
    Ok(Some((key.to_string(), value)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    if let Some(rest) = trimmed.strip_prefix('"') {
        parse_double_quoted(rest)
    } else if let Some(rest) = trimmed.strip_prefix('\'') {
        parse_single_quoted(rest)
    } else {
        let value = trimmed.splitn(2, '#').next().unwrap_or_default().trim_end();
        Ok(value.to_string())
    }
}

fn parse_double_quoted(input: &str) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if escape {
            let value = match ch {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                '\\' => '\\',
                '"' => '"',
                other => other,
            };
            result.push(value);
            escape = false;
            continue;
        }

        match ch {
            '\\' => escape = true,
            '"' => {
                let remainder = chars.as_str().trim();
                if remainder.is_empty() || remainder.starts_with('#') {
                    return Ok(result);
                } else {
                    return Err("unexpected characters after closing double quote".to_string());
                }
            }
            other => result.push(other),
        }
    }

    if escape {
        Err("unterminated escape sequence in double-quoted value".to_string())
    } else {
        Err("unterminated double-quoted value".to_string())
    }
}

fn parse_single_quoted(input: &str) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if ch == '\'' {
            let remainder = chars.as_str().trim();
            if remainder.is_empty() || remainder.starts_with('#') {
                return Ok(result);
            } else {
                return Err("unexpected characters after closing single quote".to_string());
            }
        } else {
            result.push(ch);
        }
    }

    Err("unterminated single-quoted value".to_string())
}

fn main() {
    let (loaded_env, set_light) = match configure_env_from_cli() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "hue-postgres {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(set_light) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
