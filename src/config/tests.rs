use super::{
    EnvResolver, FleetRole, MapEnv, NamingConfig, Settings, load_config_file,
    parse_duration_value,
};
use crate::error::AppError;
use crate::retry::Jitter;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn parse_toml_config_with_retry_and_tags() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let path = dir.path().join("fleetlink.toml");
    let content = r#"
role = "controller"

[naming]
controller_env = "staging"

[poll]
interval = "250ms"

[retry]
max_attempts = 3
base_delay = "2s"
max_jitter_ms = 0

[queue]
wait_time_secs = 5
visibility_timeout_secs = 60

[tags]
team = "perf"
"#;
    std::fs::write(&path, content).map_err(|err| format!("write failed: {}", err))?;

    let config = load_config_file(&path).map_err(|err| err.to_string())?;
    let settings = Settings::from_config(Some(config)).map_err(|err| err.to_string())?;
    if settings.role != FleetRole::Controller {
        return Err(format!("Unexpected role: {:?}", settings.role));
    }
    if settings.naming.controller_env.as_deref() != Some("staging") {
        return Err("Expected controller_env override".to_owned());
    }
    if settings.poll_interval != Duration::from_millis(250) {
        return Err(format!("Unexpected interval: {:?}", settings.poll_interval));
    }
    if settings.upload_retry.max_attempts != 3
        || settings.upload_retry.base_delay != Duration::from_secs(2)
        || settings.upload_retry.jitter != Jitter::None
    {
        return Err(format!("Unexpected retry: {:?}", settings.upload_retry));
    }
    if settings.queue_timing.wait_time_secs != 5
        || settings.queue_timing.visibility_timeout_secs != Some(60)
    {
        return Err(format!("Unexpected queue timing: {:?}", settings.queue_timing));
    }
    if settings.default_tags.get("team") != Some("perf") {
        return Err("Expected default tag".to_owned());
    }
    Ok(())
}

#[test]
fn parse_json_config_with_millis_interval() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let path = dir.path().join("fleetlink.json");
    let content = r#"{ "role": "agent", "poll": { "interval": 50 } }"#;
    std::fs::write(&path, content).map_err(|err| format!("write failed: {}", err))?;

    let config = load_config_file(&path).map_err(|err| err.to_string())?;
    let settings = Settings::from_config(Some(config)).map_err(|err| err.to_string())?;
    if settings.role != FleetRole::Agent {
        return Err("Expected agent role".to_owned());
    }
    if settings.poll_interval != Duration::from_millis(50) {
        return Err(format!("Unexpected interval: {:?}", settings.poll_interval));
    }
    Ok(())
}

#[test]
fn unsupported_extension_is_rejected() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let path = dir.path().join("fleetlink.yaml");
    std::fs::write(&path, "role: agent").map_err(|err| format!("write failed: {}", err))?;
    match load_config_file(&path) {
        Err(AppError::Config(_)) => Ok(()),
        Err(err) => Err(format!("Unexpected error: {}", err)),
        Ok(_) => Err("Expected unsupported extension error".to_owned()),
    }
}

#[test]
fn zero_retry_attempts_are_rejected() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let path = dir.path().join("fleetlink.toml");
    std::fs::write(&path, "[retry]\nmax_attempts = 0\n")
        .map_err(|err| format!("write failed: {}", err))?;
    let config = load_config_file(&path).map_err(|err| err.to_string())?;
    if Settings::from_config(Some(config)).is_ok() {
        return Err("Expected invalid retry error".to_owned());
    }
    Ok(())
}

#[test]
fn parse_duration_units() -> Result<(), String> {
    let cases = [
        ("100", Duration::from_millis(100)),
        ("100ms", Duration::from_millis(100)),
        ("3s", Duration::from_secs(3)),
        ("2m", Duration::from_secs(120)),
        ("1h", Duration::from_secs(3600)),
    ];
    for (input, expected) in cases {
        let parsed = parse_duration_value(input)?;
        if parsed != expected {
            return Err(format!("{} parsed as {:?}", input, parsed));
        }
    }
    for input in ["", "0s", "ms", "5d"] {
        if parse_duration_value(input).is_ok() {
            return Err(format!("Expected '{}' to be rejected", input));
        }
    }
    Ok(())
}

#[test]
fn agent_prefix_uses_naming_triple() -> Result<(), String> {
    let env = MapEnv::new()
        .with("APPLICATION_NAME", "pewpewagent")
        .with("SYSTEM_NAME", "perf-test")
        .with("SERVICE_NAME", "blue");
    let resolver = EnvResolver::new(Arc::new(env), &NamingConfig::default());
    if resolver.prefix() != "PEWPEWAGENT_PERF_TEST_BLUE" {
        return Err(format!("Unexpected prefix: {}", resolver.prefix()));
    }
    if resolver.key("BUCKET_NAME") != "PEWPEWAGENT_PERF_TEST_BLUE_BUCKET_NAME" {
        return Err(format!("Unexpected key: {}", resolver.key("BUCKET_NAME")));
    }
    Ok(())
}

#[test]
fn controller_env_overrides_prefix() -> Result<(), String> {
    let env = MapEnv::new()
        .with("APPLICATION_NAME", "ignored")
        .with("CONTROLLER_ENV", "prod")
        .with("PEWPEWCONTROLLER_PROD_BUCKET_NAME", "bucket");
    let naming = NamingConfig {
        controller_application_name: Some("pewpewcontroller".to_owned()),
        ..NamingConfig::default()
    };
    let resolver = EnvResolver::new(Arc::new(env), &naming);
    if resolver.prefix() != "PEWPEWCONTROLLER_PROD" {
        return Err(format!("Unexpected prefix: {}", resolver.prefix()));
    }
    let bucket = resolver.require("BUCKET_NAME").map_err(|err| err.to_string())?;
    if bucket != "bucket" {
        return Err(format!("Unexpected bucket: {}", bucket));
    }
    Ok(())
}

#[test]
fn blank_required_value_fails_fast() -> Result<(), String> {
    let env = MapEnv::new().with("FLEETAGENT_DEV_BUCKET_NAME", "  ");
    let resolver = EnvResolver::new(Arc::new(env), &NamingConfig::default());
    match resolver.require("BUCKET_NAME") {
        Err(AppError::Config(err)) => {
            if !err.to_string().contains("FLEETAGENT_DEV_BUCKET_NAME") {
                return Err(format!("Error should name the key: {}", err));
            }
            Ok(())
        }
        Err(err) => Err(format!("Unexpected error: {}", err)),
        Ok(value) => Err(format!("Expected missing env error, got {}", value)),
    }
}
