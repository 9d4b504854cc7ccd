use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    errors::FxError,
    models::{CurrencyCode, CurrencyPair},
    runtime::Runtime,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvokeError {
    pub code: String,
    pub message: String,
}

impl From<FxError> for InvokeError {
    fn from(error: FxError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
}

impl Runtime {
    /// Parses a `{command, payload}` request, runs it and serializes the
    /// `{ok, data | error}` response.
    pub async fn invoke_json(&self, request_json: &str) -> String {
        let parsed = serde_json::from_str::<InvokeRequest>(request_json);
        let response = match parsed {
            Ok(request) => self.dispatch(request).await,
            Err(error) => Err(InvokeError {
                code: "invalid_request".to_string(),
                message: format!("invalid request JSON: {error}"),
            }),
        };

        let payload = match response {
            Ok(data) => InvokeResponse {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(error) => InvokeResponse {
                ok: false,
                data: None,
                error: Some(error),
            },
        };

        serde_json::to_string(&payload).unwrap_or_else(|_| {
            r#"{"ok":false,"error":{"code":"serialization_failure","message":"failed to serialize response"}}"#
                .to_string()
        })
    }

    pub async fn dispatch(&self, request: InvokeRequest) -> Result<Value, InvokeError> {
        match request.command.as_str() {
            "get_bootstrap_state" => to_data(self.bootstrap_state()),
            "initialize" => to_data(self.initialize().await),
            "list_currencies" => to_data(self.load_currencies().await),
            "convert" => self.convert_command(request.payload).await,
            "select_pair" => {
                let input = parse_payload::<PairInput>(request.payload)?;
                let pair = input.into_pair()?;
                to_data(self.select_pair(pair).await?)
            }
            "swap_currencies" => to_data(self.swap_currencies().await?),
            "list_popular_pairs" => to_data(self.popular_pairs()),
            "select_popular_pair" => {
                #[derive(Deserialize)]
                struct Input {
                    index: usize,
                }
                let input = parse_payload::<Input>(request.payload)?;
                to_data(self.select_popular_pair(input.index).await?)
            }
            "refresh_rates" => {
                #[derive(Deserialize, Default)]
                struct Input {
                    #[serde(default)]
                    base: Option<String>,
                }
                let input = parse_optional_payload::<Input>(request.payload)?;
                let base = input.base.as_deref().map(parse_code).transpose()?;
                to_data(self.refresh_rates(base).await?)
            }
            "get_rate_snapshot" => to_data(self.ticker()),
            "list_history" => to_data(self.history()),
            "load_from_history" => {
                #[derive(Deserialize)]
                struct Input {
                    id: u64,
                }
                let input = parse_payload::<Input>(request.payload)?;
                to_data(self.load_from_history(input.id).await?)
            }
            "clear_history" => {
                self.clear_history()?;
                Ok(json!({ "cleared": true }))
            }
            "list_favorites" => to_data(self.favorites()),
            "toggle_favorite" => {
                #[derive(Deserialize)]
                struct Input {
                    code: String,
                }
                let input = parse_payload::<Input>(request.payload)?;
                let code = parse_code(&input.code)?;
                to_data(self.toggle_favorite(&code)?)
            }
            "evaluate_expression" | "apply_calculator" => {
                #[derive(Deserialize)]
                struct Input {
                    expression: String,
                }
                let input = parse_payload::<Input>(request.payload)?;
                if request.command == "apply_calculator" {
                    to_data(self.apply_calculator(&input.expression).await?)
                } else {
                    let value = self.evaluate_expression(&input.expression)?;
                    Ok(json!({ "value": value }))
                }
            }
            _ => Err(InvokeError {
                code: "unknown_command".to_string(),
                message: format!("unsupported command: {}", request.command),
            }),
        }
    }

    async fn convert_command(&self, payload: Value) -> Result<Value, InvokeError> {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct Input {
            #[serde(default)]
            amount: Option<Value>,
            #[serde(default)]
            source: Option<String>,
            #[serde(default)]
            target: Option<String>,
        }

        let input = parse_optional_payload::<Input>(payload)?;
        let pair = match (input.source, input.target) {
            (None, None) => None,
            (source, target) => {
                let current = self.pair();
                Some(CurrencyPair {
                    source: source
                        .as_deref()
                        .map(parse_code)
                        .transpose()?
                        .unwrap_or(current.source),
                    target: target
                        .as_deref()
                        .map(parse_code)
                        .transpose()?
                        .unwrap_or(current.target),
                })
            }
        };
        let amount = amount_text(input.amount.as_ref());
        to_data(self.convert(&amount, pair).await?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairInput {
    source: String,
    target: String,
}

impl PairInput {
    fn into_pair(self) -> Result<CurrencyPair, InvokeError> {
        Ok(CurrencyPair {
            source: parse_code(&self.source)?,
            target: parse_code(&self.target)?,
        })
    }
}

/// Amount as typed by the user: strings pass through, numbers are rendered,
/// anything else is treated as empty input.
fn amount_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

fn parse_code(raw: &str) -> Result<CurrencyCode, InvokeError> {
    CurrencyCode::parse(raw).map_err(|error| FxError::from(error).into())
}

fn parse_payload<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, InvokeError> {
    serde_json::from_value::<T>(payload).map_err(invalid_payload)
}

fn parse_optional_payload<T: for<'de> Deserialize<'de> + Default>(
    payload: Value,
) -> Result<T, InvokeError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    parse_payload(payload)
}

fn to_data<T: Serialize>(value: T) -> Result<Value, InvokeError> {
    serde_json::to_value(value).map_err(|error| InvokeError {
        code: "serialization_failure".to_string(),
        message: error.to_string(),
    })
}

fn invalid_payload(error: serde_json::Error) -> InvokeError {
    InvokeError {
        code: "invalid_payload".to_string(),
        message: error.to_string(),
    }
}
