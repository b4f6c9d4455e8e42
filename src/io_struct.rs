use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body POSTed to a token service by `rpc_token_call`.
///
/// Exactly one of `input_ids` and `text` is set: ids are forwarded as-is when
/// the op runs with `use_ids`, otherwise the ids are translated through the
/// vocabulary and sent as space separated text.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenCallRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TokenCallRequest {
    pub fn from_ids(ids: Vec<i64>) -> Self {
        TokenCallRequest {
            input_ids: Some(ids),
            text: None,
        }
    }

    pub fn from_tokens(tokens: &[&str]) -> Self {
        TokenCallRequest {
            input_ids: None,
            text: Some(tokens.join(" ")),
        }
    }

    pub fn validate(&self) -> Result<(), actix_web::Error> {
        match (&self.input_ids, &self.text) {
            (Some(_), Some(_)) => Err(actix_web::error::ErrorBadRequest(
                "Both text and input_ids are present in the request".to_string(),
            )),
            (None, None) => Err(actix_web::error::ErrorBadRequest(
                "Either text or input_ids must be present in the request".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Number of tokens carried by the request.
    pub fn token_count(&self) -> usize {
        if let Some(ids) = &self.input_ids {
            return ids.len();
        }
        self.text
            .as_deref()
            .map(|t| t.split_whitespace().count())
            .unwrap_or(0)
    }
}

/// Reply of the bundled loopback token service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenCallResponse {
    pub accepted: bool,
    pub num_tokens: usize,
    #[serde(default)]
    pub echo: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_payload_omits_text() {
        let req = TokenCallRequest::from_ids(vec![3, 7]);
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"input_ids": [3, 7]}));
        assert_eq!(req.token_count(), 2);
    }

    #[test]
    fn test_text_payload() {
        let req = TokenCallRequest::from_tokens(&["hello", "world"]);
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"text": "hello world"}));
        assert_eq!(req.token_count(), 2);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_exactly_one_field() {
        let both: TokenCallRequest =
            serde_json::from_value(json!({"input_ids": [1], "text": "a"})).unwrap();
        assert!(both.validate().is_err());
        let neither: TokenCallRequest = serde_json::from_value(json!({})).unwrap();
        assert!(neither.validate().is_err());
    }
}
