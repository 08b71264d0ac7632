//! Tools the agent may call from the command-line client.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use voicelink_core::tools::ToolHandler;
use voicelink_types::FunctionDeclaration;

pub struct DemoTools;

impl DemoTools {
    pub fn declarations() -> Vec<FunctionDeclaration> {
        vec![
            FunctionDeclaration::new(
                "get_time",
                "Returns the current local date and time.",
                json!({ "type": "object", "properties": {} }),
            ),
            FunctionDeclaration::new(
                "echo",
                "Repeats the given text back verbatim.",
                json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            ),
        ]
    }
}

#[async_trait]
impl ToolHandler for DemoTools {
    async fn call(&self, name: &str, args: &Value) -> Result<Value> {
        match name {
            "get_time" => Ok(Value::String(chrono::Local::now().to_rfc3339())),
            "echo" => {
                let text = args
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("echo requires a text argument"))?;
                Ok(json!({ "text": text }))
            }
            other => bail!("unknown tool: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_time_is_rfc3339() {
        let value = DemoTools.call("get_time", &json!({})).await.unwrap();
        let text = value.as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(text).is_ok());
    }

    #[tokio::test]
    async fn echo_requires_text() {
        let value = DemoTools.call("echo", &json!({"text": "hi"})).await.unwrap();
        assert_eq!(value, json!({"text": "hi"}));
        assert!(DemoTools.call("echo", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn unknown_tools_fail() {
        let err = DemoTools.call("launch", &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("launch"));
    }

    #[test]
    fn declarations_match_handled_names() {
        let names: Vec<_> = DemoTools::declarations()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, ["get_time", "echo"]);
    }
}
