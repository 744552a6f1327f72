//! Logs configured end to end: writer and encoder modules, routing,
//! filtering, sampling and writer sharing.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tempfile::TempDir;

use module_runtime::logging::{Logging, LoggingError, SinkWriter};
use module_runtime::{Context, Runtime};

mod common;

use common::{config, registry};

fn logging(value: Value) -> Logging {
    serde_json::from_value(value).unwrap()
}

fn file_writer(path: &Path) -> Value {
    json!({"output": "file", "filename": path.to_str().unwrap()})
}

fn read_lines(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_logs_share_one_file_writer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs").join("shared.log");
    let key = format!("file:{}", path.display());

    let (ctx, cancel) = Context::new(registry());
    let mut logging = logging(json!({
        "logs": {
            "default": {"writer": {"output": "discard"}},
            "db": {"writer": file_writer(&path), "encoder": {"format": "json"}, "include": ["db"]},
            "pool": {"writer": file_writer(&path), "encoder": {"format": "json"}, "include": ["db.pool"]},
        }
    }));
    logging.open_logs(&ctx).unwrap();

    assert_eq!(logging.log_names(), vec!["db", "default", "pool"]);
    assert_eq!(logging.writer_keys(), vec![key.clone(), "discard".to_string(), key]);

    logging.logger("db.pool").info("checked out");
    logging.logger("db.query").warn("slow query");
    logging.logger("http").error("not routed to the file");

    let lines = read_lines(&path);
    let messages: Vec<&str> = lines.iter().map(|l| l["msg"].as_str().unwrap()).collect();
    assert_eq!(messages, vec!["checked out", "checked out", "slow query"]);
    assert_eq!(lines[2]["logger"], "db.query");
    assert_eq!(lines[2]["level"], "warn");

    cancel.cancel();
    assert!(logging.writer_keys().is_empty());
}

#[test]
fn test_nested_include_exclude() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("http.log");

    let (ctx, _cancel) = Context::new(registry());
    let mut logging = logging(json!({
        "logs": {
            "default": {"writer": {"output": "discard"}},
            "http": {
                "writer": file_writer(&path),
                "encoder": {"format": "json"},
                "include": ["http"],
                "exclude": ["http.handlers"],
            },
        }
    }));
    logging.open_logs(&ctx).unwrap();

    let http = logging.logger("http");
    http.named("handlers").named("static").info("dropped");
    http.named("server").info("kept");
    logging.logger("tls").info("not included");

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["logger"], "http.server");
}

#[test]
fn test_sampling_through_pipeline() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sampled.log");

    let (ctx, _cancel) = Context::new(registry());
    let mut logging = logging(json!({
        "logs": {
            "default": {"writer": {"output": "discard"}},
            "sampled": {
                "writer": file_writer(&path),
                "encoder": {"format": "json"},
                "sampling": {"interval": "1h", "first": 2, "thereafter": 3},
            },
        }
    }));
    logging.open_logs(&ctx).unwrap();

    let logger = logging.logger("worker");
    for _ in 0..7 {
        logger.info("tick");
    }
    logger.info("tock");

    let messages: Vec<String> = read_lines(&path)
        .iter()
        .map(|l| l["msg"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(messages, vec!["tick", "tick", "tick", "tock"]);
}

#[test]
fn test_level_and_encoder_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keys.log");

    let (ctx, _cancel) = Context::new(registry());
    let mut logging = logging(json!({
        "logs": {
            "default": {"writer": {"output": "discard"}},
            "custom": {
                "writer": file_writer(&path),
                "encoder": {"format": "json", "message_key": "message", "time_key": ""},
                "level": "WARN",
            },
        }
    }));
    logging.open_logs(&ctx).unwrap();

    let logger = logging.logger("app").with("attempt", 3);
    logger.info("quiet");
    logger.error("loud");

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["message"], "loud");
    assert_eq!(lines[0]["attempt"], 3);
    assert!(lines[0].get("ts").is_none());
    assert!(lines[0].get("msg").is_none());
}

#[test]
fn test_conflicting_filter_rejected() {
    let (ctx, _cancel) = Context::new(registry());
    let mut logging = logging(json!({
        "logs": {"mixed": {"include": ["a"], "exclude": ["b"], "writer": {"output": "discard"}}}
    }));
    let err = logging.open_logs(&ctx).unwrap_err();

    assert!(matches!(err, LoggingError::CustomLog { ref name, .. } if name == "mixed"));
    assert!(err.to_string().contains("check 'a' in include"));
}

#[test]
fn test_file_writer_requires_filename() {
    let (ctx, _cancel) = Context::new(registry());
    let mut logging = logging(json!({
        "logs": {"odd": {"writer": {"output": "file"}}}
    }));
    let err = logging.open_logs(&ctx).unwrap_err();
    assert_eq!(
        err.to_string(),
        "setting up custom log 'odd': loading log writer module: field 'writer': \
         loading module 'file': logging.writers.file: invalid configuration: filename is required"
    );
}

#[test]
fn test_app_logs_through_configuration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("apps.log");

    let runtime = Runtime::new(registry());
    runtime
        .load(config(json!({
            "logging": {
                "logs": {
                    "default": {"writer": {"output": "discard"}},
                    "apps": {
                        "writer": file_writer(&path),
                        "encoder": {"format": "json"},
                        "include": ["announcer"],
                    },
                }
            },
            "apps": {"recorder": {"label": "announcer", "announce": "ready"}}
        })))
        .unwrap();

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["logger"], "announcer");
    assert_eq!(lines[0]["msg"], "ready");

    runtime.stop();
}

#[test]
fn test_file_log_defaults_to_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.log");

    let (ctx, _cancel) = Context::new(registry());
    let mut logging = logging(json!({
        "logs": {
            "default": {"writer": {"output": "discard"}},
            "plain": {"writer": file_writer(&path)},
        }
    }));
    logging.open_logs(&ctx).unwrap();
    logging.logger("cache").with("hits", 7).info("warmed");

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["msg"], "warmed");
    assert_eq!(lines[0]["hits"], 7);
}

#[test]
fn test_sink_receives_diagnostics() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sink.log");
    let key = format!("file:{}", path.display());
    let sink_config = || {
        logging(json!({
            "sink": {"writer": file_writer(&path)},
            "logs": {"default": {"writer": {"output": "discard"}}},
        }))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_writer(SinkWriter)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (ctx, cancel) = Context::new(registry());
    let mut first = sink_config();
    first.open_logs(&ctx).unwrap();
    assert_eq!(first.sink_key(), Some(key.as_str()));
    assert!(first.writer_keys().contains(&key));
    first.install_sink();
    tracing::warn!("dependency complaint");

    // Same destination on reload: the writer stays open and nothing is announced.
    let (next_ctx, next_cancel) = Context::new(registry());
    let mut second = sink_config();
    second.open_logs(&next_ctx).unwrap();
    second.install_sink();
    cancel.cancel();
    tracing::warn!("after reload");

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.matches("Redirected sink to here").count(), 1);
    assert!(!text.contains("Redirecting sink"));
    assert!(text.contains("dependency complaint"));
    assert!(text.contains("after reload"));

    next_cancel.cancel();
    tracing::warn!("sink closed");
    assert!(!fs::read_to_string(&path).unwrap().contains("sink closed"));
}
