use std::{path::PathBuf, process::Stdio, time::Duration};
use bstr::ByteSlice;
use log::{debug, warn};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tokio::{process::Command, time::timeout};

use crate::{
    config::{Config, RuntimeConfig},
    directive::{self, Directive, Phase},
    utils::MidnightError
};

/// Message body as the transformer gets to see it
#[derive(Clone, Debug, PartialEq)]
pub enum BodyJson {
    Object(Map<String, Value>),
    Missing,
    Unparsable
}

impl BodyJson {
    pub fn parse(body: &[u8]) -> Self {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return BodyJson::Missing;
        }

        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => BodyJson::Object(map),
            _ => BodyJson::Unparsable
        }
    }

    pub fn object(&self) -> Map<String, Value> {
        match self {
            BodyJson::Object(map) => map.clone(),
            BodyJson::Missing | BodyJson::Unparsable => Map::new()
        }
    }
}

fn serialize_body<S: Serializer>(body: &BodyJson, serializer: S) -> Result<S::Ok, S::Error> {
    match body {
        BodyJson::Object(map) => map.serialize(serializer),
        BodyJson::Missing | BodyJson::Unparsable => Map::new().serialize(serializer)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TransformPayload {
    pub method: String,
    pub url: String,
    pub phase: Phase,
    #[serde(serialize_with = "serialize_body")]
    pub body: BodyJson
}

impl TransformPayload {
    pub fn new(method: &str, url: &str, phase: Phase, body: BodyJson) -> Self {
        TransformPayload {
            method: method.to_string(),
            url: url.to_string(),
            phase,
            body
        }
    }

    /// Positional arguments handed to the script after its source:
    /// method, url, phase and the body as compact JSON.
    pub fn to_args(&self) -> Result<Vec<String>, MidnightError> {
        Ok(
            vec![
                self.method.clone(),
                self.url.clone(),
                self.phase.to_string(),
                serde_json::to_string(&self.body.object())?
            ]
        )
    }
}

// ---------------------------------------------------------------------------------------------- //

#[derive(Clone, Debug)]
pub struct TransformInvoker {
    plugin_path: PathBuf,
    runtime: RuntimeConfig,
    time_limit: Duration
}

impl TransformInvoker {
    pub fn new(plugin_path: PathBuf, runtime: RuntimeConfig, time_limit: Duration) -> Self {
        TransformInvoker {
            plugin_path,
            runtime,
            time_limit
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, MidnightError> {
        let plugin_path = config.plugin_path
            .as_ref()
            .ok_or(MidnightError::ConfigError("Transformer script path is not set".to_string()))?;

        Ok(
            Self::new(
                PathBuf::from(plugin_path),
                config.runtime.clone(),
                Duration::from_secs(config.transform_timeout_secs)
            )
        )
    }

    /// Runs the transformer once for `payload`. Never fails: any problem with the script
    /// or its process means the message is left as is.
    pub async fn invoke(&self, payload: &TransformPayload) -> Directive {
        match self.run(payload).await {
            Ok(output) => {
                debug!(
                    "Transformer output for {} {} ({}):\n{}",
                    &payload.method,
                    &payload.url,
                    payload.phase,
                    output.trim_end()
                );
                directive::extract(&output, payload.phase)
            },
            Err(err) => {
                warn!(
                    "Transformer skipped for {} {} ({}): {}",
                    &payload.method,
                    &payload.url,
                    payload.phase,
                    err
                );
                Directive::NoDirective
            }
        }
    }

    async fn run(&self, payload: &TransformPayload) -> Result<String, MidnightError> {
        // Read on every call, the script may be replaced while the proxy is running
        let script = tokio::fs::read_to_string(&self.plugin_path)
            .await
            .map_err(|e| MidnightError::IOError(format!("Could not read '{}': {}", self.plugin_path.display(), e)))?;

        let mut command = Command::new(&self.runtime.program);
        command
            .args(&self.runtime.args)
            .arg(&script)
            .args(payload.to_args()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| MidnightError::TransformError(format!("Could not launch '{}': {}", &self.runtime.program, e)))?;

        let output = match timeout(self.time_limit, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(
                    MidnightError::TransformError(format!("No result after {:?}, process killed", self.time_limit))
                );
            }
        };

        if !output.status.success() {
            return Err(
                MidnightError::TransformError(format!("Process exited with {}", output.status))
            );
        }

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(combined.to_str_lossy().to_string())
    }
}

// ---------------------------------------------------------------------------------------------- //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_parsing_is_tagged() {
        assert_eq!(
            BodyJson::parse(br#"{"a":1}"#),
            BodyJson::Object(json!({"a": 1}).as_object().unwrap().clone())
        );
        assert_eq!(BodyJson::parse(b""), BodyJson::Missing);
        assert_eq!(BodyJson::parse(b"  \n"), BodyJson::Missing);
        assert_eq!(BodyJson::parse(b"[1,2]"), BodyJson::Unparsable);
        assert_eq!(BodyJson::parse(b"{broken"), BodyJson::Unparsable);
        assert_eq!(BodyJson::parse(&[0xff, 0xfe]), BodyJson::Unparsable);
    }

    #[test]
    fn payload_serializes_empty_object_for_bad_bodies() {
        let payload = TransformPayload::new("POST", "https://api.example.com/x", Phase::Request, BodyJson::Unparsable);
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"method": "POST", "url": "https://api.example.com/x", "phase": "request", "body": {}})
        );
        assert_eq!(
            payload.to_args().unwrap(),
            vec!["POST", "https://api.example.com/x", "request", "{}"]
        );
    }

    #[test]
    fn payload_args_carry_phase_and_body() {
        let body = BodyJson::parse(br#"{"b":"2","a":1}"#);
        let payload = TransformPayload::new("GET", "https://example.com/", Phase::Response, body);
        assert_eq!(
            payload.to_args().unwrap(),
            vec!["GET", "https://example.com/", "response", r#"{"a":1,"b":"2"}"#]
        );
    }

    #[tokio::test]
    async fn unreadable_script_yields_no_directive() {
        let invoker = TransformInvoker::new(
            PathBuf::from("/nonexistent/plugin.js"),
            RuntimeConfig::default(),
            Duration::from_secs(1)
        );
        let payload = TransformPayload::new("POST", "https://example.com/", Phase::Request, BodyJson::Missing);
        assert_eq!(invoker.invoke(&payload).await, Directive::NoDirective);
    }

    #[tokio::test]
    async fn missing_runtime_yields_no_directive() {
        let script = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(script.path(), "console.log('@BODY { a: \"1\" }')").unwrap();

        let invoker = TransformInvoker::new(
            script.path().to_path_buf(),
            RuntimeConfig { program: "midnight-no-such-runtime".to_string(), args: vec![] },
            Duration::from_secs(1)
        );
        let payload = TransformPayload::new("POST", "https://example.com/", Phase::Request, BodyJson::Missing);
        assert_eq!(invoker.invoke(&payload).await, Directive::NoDirective);
    }
}
