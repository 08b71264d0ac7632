/// A function the remote agent may call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionDeclaration {
    /// The name of the function
    name: String,

    /// The description of the function
    description: String,

    /// The parameters of the function in JSON Schema format
    parameters: serde_json::Value,
}

impl FunctionDeclaration {
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }
}

/// A function call issued by the remote agent mid-conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRequest {
    id: String,
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(id: &str, name: &str, args: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            args,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &serde_json::Value {
        &self.args
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Result(String),
    Error(String),
}

/// The single answer sent back for a [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallResponse {
    id: String,
    name: String,
    #[serde(flatten)]
    outcome: ToolOutcome,
}

impl ToolCallResponse {
    pub fn success(request: &ToolCallRequest, result: String) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Result(result),
        }
    }

    pub fn failure(request: &ToolCallRequest, error: &str) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Error(error.to_string()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outcome(&self) -> &ToolOutcome {
        &self.outcome
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_keeps_request_id() {
        let req = ToolCallRequest::new("call-7", "lookup", serde_json::json!({"q": "x"}));
        let resp = ToolCallResponse::failure(&req, "boom");
        assert_eq!(resp.id(), "call-7");
        assert_eq!(resp.name(), "lookup");
        assert!(resp.is_error());

        let json = serde_json::to_value(ToolCallResponse::success(&req, "ok".into())).unwrap();
        assert_eq!(json["id"], "call-7");
        assert_eq!(json["result"], "ok");
    }
}
