//! Run command.
//!
//! `plinth run <name> --arg key=value ...` submits one request through a
//! fully configured broker, exactly as the web panel would, and mirrors the
//! action's exit status.

use anyhow::{Context, Result, bail};
use plinth_core::{ActionResult, ActionSpec, ArgumentType};
use plinth_runtime::{ActionBroker, BrokerError};
use serde_json::{Map, Number, Value, json};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use super::load_config;

/// Exit code reported when the action timed out (matches coreutils `timeout`).
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit code for requests rejected before dispatch.
pub const EXIT_REJECTED: i32 = 2;
/// Exit code for any other broker failure.
pub const EXIT_FAILED: i32 = 1;

/// Build the argument map from `--args-json` and `--arg` pairs.
///
/// Values from `--arg` are coerced to the declared argument type. Names the
/// action does not declare are passed through as strings so the broker can
/// reject them and audit the attempt.
pub fn parse_arguments(
    spec: Option<&ActionSpec>,
    pairs: &[String],
    args_json: Option<&str>,
) -> Result<BTreeMap<String, Value>> {
    let mut arguments = match args_json {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).context("--args-json is not valid JSON")?;
            match value {
                Value::Object(map) => map.into_iter().collect(),
                _ => bail!("--args-json must be a JSON object"),
            }
        }
        None => BTreeMap::new(),
    };

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("--arg '{pair}' is not in key=value form");
        };
        let arg_type = spec
            .and_then(|s| s.argument(key))
            .map(|a| a.arg_type)
            .unwrap_or(ArgumentType::String);
        let value = coerce(arg_type, raw).with_context(|| format!("--arg {key}"))?;
        arguments.insert(key.to_string(), value);
    }

    Ok(arguments)
}

fn coerce(arg_type: ArgumentType, raw: &str) -> Result<Value> {
    Ok(match arg_type {
        ArgumentType::String => Value::String(raw.to_string()),
        ArgumentType::Integer => Value::from(
            raw.parse::<i64>()
                .with_context(|| format!("'{raw}' is not an integer"))?,
        ),
        ArgumentType::Number => {
            let n: f64 = raw
                .parse()
                .with_context(|| format!("'{raw}' is not a number"))?;
            match Number::from_f64(n) {
                Some(n) => Value::Number(n),
                None => bail!("'{raw}' is not a finite number"),
            }
        }
        ArgumentType::Boolean => match raw {
            "true" | "yes" | "1" => Value::Bool(true),
            "false" | "no" | "0" => Value::Bool(false),
            _ => bail!("'{raw}' is not a boolean (true/false)"),
        },
        ArgumentType::StringList if raw.is_empty() => Value::Array(Vec::new()),
        ArgumentType::StringList => Value::Array(
            raw.split(',')
                .map(|item| Value::String(item.to_string()))
                .collect(),
        ),
    })
}

/// Submit one action and print its outcome. Returns the process exit code.
pub async fn run(
    config_path: &Path,
    name: &str,
    pairs: &[String],
    args_json: Option<&str>,
    json: bool,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let broker = ActionBroker::from_config(&config).context("Failed to start the action broker")?;

    let registry = broker.registry();
    let arguments = parse_arguments(registry.lookup(name).ok(), pairs, args_json)?;

    let outcome = broker.submit(name, arguments).await;
    let code = match &outcome {
        Ok(result) => result.exit_status,
        Err(BrokerError::TimedOut(_)) => EXIT_TIMED_OUT,
        Err(e) if e.is_rejection() => EXIT_REJECTED,
        Err(_) => EXIT_FAILED,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary(name, &outcome))?);
    } else {
        match &outcome {
            Ok(result) => passthrough(result)?,
            Err(error) => {
                if let Some(result) = error.result() {
                    passthrough(result)?;
                }
                eprintln!("✘ {error}");
            }
        }
    }

    broker
        .audit()
        .close()
        .await
        .context("Failed to close the audit log")?;

    Ok(code)
}

fn passthrough(result: &ActionResult) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match &result.decoded_payload {
        Some(payload) => writeln!(stdout, "{}", serde_json::to_string_pretty(payload)?)?,
        None => stdout.write_all(&result.stdout)?,
    }
    stdout.flush()?;
    std::io::stderr().write_all(&result.stderr)?;

    if result.stdout_truncated || result.stderr_truncated {
        eprintln!("⚠️  output truncated");
    }
    Ok(())
}

fn summary(name: &str, outcome: &Result<ActionResult, BrokerError>) -> Value {
    let (mut map, result) = match outcome {
        Ok(result) => (Map::new(), Some(result)),
        Err(error) => {
            let mut map = Map::new();
            map.insert("error".to_string(), json!(error.to_string()));
            (map, error.result())
        }
    };
    map.insert("action".to_string(), json!(name));

    if let Some(result) = result {
        map.insert("exit_status".to_string(), json!(result.exit_status));
        map.insert("timed_out".to_string(), json!(result.timed_out));
        map.insert("duration_ms".to_string(), json!(result.duration_ms()));
        map.insert("payload".to_string(), result.decoded_payload.clone().unwrap_or(Value::Null));
        if result.decoded_payload.is_none() {
            map.insert("stdout".to_string(), json!(result.stdout_lossy()));
        }
        map.insert("stderr".to_string(), json!(result.stderr_lossy()));
        map.insert("stdout_truncated".to_string(), json!(result.stdout_truncated));
        map.insert("stderr_truncated".to_string(), json!(result.stderr_truncated));
    }

    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_core::{ArgumentSpec, ResponseFormat};
    use std::time::Duration;

    fn spec() -> ActionSpec {
        ActionSpec {
            name: "pagekite-set-services".to_string(),
            description: None,
            executable_path: "/usr/share/plinth/actions/pagekite".into(),
            argument_schema: vec![
                ArgumentSpec::new("kite_name", ArgumentType::String),
                ArgumentSpec::new("port", ArgumentType::Integer),
                ArgumentSpec::new("enable", ArgumentType::Boolean),
                ArgumentSpec::new("weight", ArgumentType::Number),
                ArgumentSpec::new("services", ArgumentType::StringList),
            ],
            timeout: Duration::from_secs(30),
            privileged: true,
            exclusive: true,
            response: ResponseFormat::Auto,
        }
    }

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_coerces_by_declared_type() {
        let spec = spec();
        let args = parse_arguments(
            Some(&spec),
            &pairs(&[
                "kite_name=mybox.pagekite.me",
                "port=443",
                "enable=true",
                "weight=0.5",
                "services=http,ssh",
            ]),
            None,
        )
        .unwrap();

        assert_eq!(args["kite_name"], json!("mybox.pagekite.me"));
        assert_eq!(args["port"], json!(443));
        assert_eq!(args["enable"], json!(true));
        assert_eq!(args["weight"], json!(0.5));
        assert_eq!(args["services"], json!(["http", "ssh"]));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let spec = spec();
        let args = parse_arguments(Some(&spec), &pairs(&["kite_name=a=b"]), None).unwrap();
        assert_eq!(args["kite_name"], json!("a=b"));
    }

    #[test]
    fn test_bad_values_are_reported() {
        let spec = spec();
        assert!(parse_arguments(Some(&spec), &pairs(&["port=https"]), None).is_err());
        assert!(parse_arguments(Some(&spec), &pairs(&["enable=maybe"]), None).is_err());
        assert!(parse_arguments(Some(&spec), &pairs(&["port"]), None).is_err());
    }

    #[test]
    fn test_undeclared_and_unknown_pass_through_as_strings() {
        let spec = spec();
        let args = parse_arguments(Some(&spec), &pairs(&["extra=1"]), None).unwrap();
        assert_eq!(args["extra"], json!("1"));

        let args = parse_arguments(None, &pairs(&["port=1"]), None).unwrap();
        assert_eq!(args["port"], json!("1"));
    }

    #[test]
    fn test_json_then_pairs() {
        let spec = spec();
        let args = parse_arguments(
            Some(&spec),
            &pairs(&["port=8080", "services="]),
            Some(r#"{"port": 80, "kite_name": "box"}"#),
        )
        .unwrap();
        assert_eq!(args["port"], json!(8080));
        assert_eq!(args["kite_name"], json!("box"));
        assert_eq!(args["services"], json!([]));

        assert!(parse_arguments(Some(&spec), &[], Some("[1, 2]")).is_err());
        assert!(parse_arguments(Some(&spec), &[], Some("{")).is_err());
    }

    #[test]
    fn test_summary_for_rejection() {
        let outcome: Result<ActionResult, BrokerError> =
            Err(BrokerError::UnknownAction("reboot".to_string()));
        let value = summary("reboot", &outcome);
        assert_eq!(value["action"], json!("reboot"));
        assert!(value["error"].as_str().unwrap().contains("unknown action"));
        assert!(value.get("exit_status").is_none());
    }
}
