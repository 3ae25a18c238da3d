use std::{fmt, sync::LazyLock, time::Duration};

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    dataset::Dataset,
    query::{self, QueryPlan, QueryResult},
};

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Completion service rejected the API key (HTTP {0})")]
    Authentication(u16),

    #[error("Completion service is rate limiting requests; try again later")]
    RateLimited,

    #[error("Completion service did not answer within {0} second(s)")]
    Timeout(u64),

    #[error("Could not reach the completion service: {0}")]
    Transport(String),

    #[error("Completion service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("Completion service returned an unusable answer: {0}")]
    MalformedResponse(String),

    #[error("Query plan failed against the dataset: {0}")]
    Execution(String),
}

/// Connection settings, including the credential. Built once by the caller
/// and handed to the client; nothing here reads global state.
#[derive(Clone)]
pub struct BridgeConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl BridgeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub trait CompletionClient {
    fn complete(&self, prompt: &str) -> Result<String, BridgeError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for OpenAI-compatible `/chat/completions` endpoints.
pub struct ChatCompletionClient {
    http: reqwest::blocking::Client,
    config: BridgeConfig,
}

impl ChatCompletionClient {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| BridgeError::Transport(err.to_string()))?;
        Ok(Self { http, config })
    }

    fn classify(&self, err: reqwest::Error) -> BridgeError {
        if err.is_timeout() {
            BridgeError::Timeout(self.config.timeout.as_secs())
        } else if err.is_decode() {
            BridgeError::MalformedResponse(err.to_string())
        } else {
            BridgeError::Transport(err.to_string())
        }
    }
}

impl CompletionClient for ChatCompletionClient {
    fn complete(&self, prompt: &str) -> Result<String, BridgeError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };
        debug!(
            "Sending {} byte prompt to {} ({})",
            prompt.len(),
            self.config.endpoint,
            self.config.model
        );
        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        match status.as_u16() {
            401 | 403 => return Err(BridgeError::Authentication(status.as_u16())),
            429 => return Err(BridgeError::RateLimited),
            _ => {}
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BridgeError::Service {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let body: ChatResponse = response.json().map_err(|err| self.classify(err))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| BridgeError::MalformedResponse("no completion text returned".into()))
    }
}

const PLAN_SCHEMA: &str = r#"{
  "aggregate": "sum" | "mean" | "count" | "min" | "max",
  "measure": "<numeric column, omit for count>",
  "group_by": {"kind": "column" | "month", "column": "<column>"},
  "filters": ["<column> <op> <value>", ...],
  "where": "<boolean expression over columns>",
  "sort": "asc" | "desc",
  "limit": <positive integer>
}"#;

/// Builds the instruction sent to the service: the dataset schema, the plan
/// grammar, and the user's question.
pub fn build_prompt(question: &str, dataset: &Dataset) -> String {
    let columns = dataset
        .columns()
        .iter()
        .map(|column| format!("- {} ({})", column.name, column.datatype))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are a financial data assistant. The dataset has {rows} row(s) and these columns:\n\
         {columns}\n\n\
         User question: \"{question}\"\n\n\
         Answer with a single JSON object of this shape and nothing else:\n\
         {PLAN_SCHEMA}\n\n\
         Only \"aggregate\" is required. Filter operators are =, !=, >, >=, <, <=, \
         contains, startswith, endswith. In \"where\", columns are named in snake_case \
         and month_of(date), year_of(date), date_diff_days(end, start) are available.",
        rows = dataset.row_count(),
    )
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)\s*```").expect("Failed to compile code fence regex")
});

/// Extracts a plan from the completion text, tolerating a surrounding code
/// fence or a sentence before the JSON object.
pub fn parse_plan(text: &str) -> Result<QueryPlan, BridgeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::MalformedResponse("empty completion".into()));
    }
    let body = CODE_FENCE
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);
    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(BridgeError::MalformedResponse(format!(
                "no JSON object in '{}'",
                body.chars().take(200).collect::<String>()
            )));
        }
    };
    serde_json::from_str(json).map_err(|err| BridgeError::MalformedResponse(err.to_string()))
}

/// The plan the service proposed and what it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub plan: QueryPlan,
    pub result: QueryResult,
}

pub struct QueryBridge<C> {
    client: C,
}

impl QueryBridge<ChatCompletionClient> {
    pub fn from_config(config: BridgeConfig) -> Result<Self, BridgeError> {
        Ok(Self::new(ChatCompletionClient::new(config)?))
    }
}

impl<C: CompletionClient> QueryBridge<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn translate(&self, question: &str, dataset: &Dataset) -> Result<QueryPlan, BridgeError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(BridgeError::MalformedResponse("question is empty".into()));
        }
        let prompt = build_prompt(question, dataset);
        let completion = self.client.complete(&prompt)?;
        let plan = parse_plan(&completion)?;
        info!("Completion service proposed a {} plan", plan.aggregate.as_str());
        Ok(plan)
    }

    pub fn execute(&self, plan: &QueryPlan, dataset: &Dataset) -> Result<QueryResult, BridgeError> {
        query::execute(plan, dataset).map_err(|err| BridgeError::Execution(format!("{err:#}")))
    }

    pub fn answer(&self, question: &str, dataset: &Dataset) -> Result<Answer, BridgeError> {
        let plan = self.translate(question, dataset)?;
        let result = self.execute(&plan, dataset)?;
        Ok(Answer { plan, result })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::dataset::RawCell;

    struct ScriptedClient {
        reply: Result<String, fn() -> BridgeError>,
        prompts: RefCell<Vec<String>>,
    }

    impl ScriptedClient {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                prompts: RefCell::new(Vec::new()),
            }
        }

        fn failing(make: fn() -> BridgeError) -> Self {
            Self {
                reply: Err(make),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl CompletionClient for ScriptedClient {
        fn complete(&self, prompt: &str) -> Result<String, BridgeError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn dataset() -> Dataset {
        Dataset::from_rows(
            vec!["Date".into(), "Category".into(), "Amount".into()],
            vec![
                vec![RawCell::from("2024-01-05"), RawCell::from("A"), RawCell::from("100")],
                vec![RawCell::from("2024-01-20"), RawCell::from("B"), RawCell::from("50")],
                vec![RawCell::from("2024-02-01"), RawCell::from("A"), RawCell::from("30")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn prompt_lists_columns_and_question() {
        let prompt = build_prompt("Which category spent most?", &dataset());
        assert!(prompt.contains("- Date (temporal)"));
        assert!(prompt.contains("- Amount (integer)"));
        assert!(prompt.contains("\"Which category spent most?\""));
        assert!(prompt.contains("\"aggregate\""));
    }

    #[test]
    fn parse_plan_accepts_fenced_and_prefixed_json() {
        let fenced = "```json\n{\"aggregate\": \"count\"}\n```";
        assert_eq!(parse_plan(fenced).unwrap().aggregate, query::AggregateFn::Count);

        let chatty = "Here is the plan: {\"aggregate\": \"sum\", \"measure\": \"Amount\"}";
        assert_eq!(parse_plan(chatty).unwrap().measure.as_deref(), Some("Amount"));
    }

    #[test]
    fn parse_plan_rejects_code_and_empty_text() {
        assert!(matches!(parse_plan("   "), Err(BridgeError::MalformedResponse(_))));
        assert!(matches!(
            parse_plan("df.groupby('Category').sum()"),
            Err(BridgeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn parse_plan_reads_only_the_first_fenced_block() {
        let reply = "```json\n{\"aggregate\": \"max\", \"measure\": \"Amount\"}\n```\n\
                     Alternatively:\n```\n{\"aggregate\": \"min\"}\n```";
        let plan = parse_plan(reply).unwrap();
        assert_eq!(plan.aggregate, query::AggregateFn::Max);

        let empty_fence = "```python\nprint('hi')\n```";
        match parse_plan(empty_fence) {
            Err(BridgeError::MalformedResponse(message)) => {
                assert!(message.contains("no JSON object in 'print('hi')'"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn answer_translates_then_executes() {
        let bridge = QueryBridge::new(ScriptedClient::replying(
            r#"{"aggregate":"sum","measure":"Amount","group_by":{"kind":"column","column":"Category"},"sort":"desc"}"#,
        ));
        let answer = bridge.answer("Spend by category", &dataset()).unwrap();
        assert_eq!(answer.result.headers, vec!["Category", "sum(Amount)"]);
        assert_eq!(answer.result.rows[0], vec!["A".to_string(), "130".to_string()]);
        assert_eq!(bridge.client.prompts.borrow().len(), 1);
    }

    #[test]
    fn client_failures_surface_unchanged() {
        let bridge = QueryBridge::new(ScriptedClient::failing(|| BridgeError::RateLimited));
        assert!(matches!(
            bridge.answer("anything", &dataset()),
            Err(BridgeError::RateLimited)
        ));
    }

    #[test]
    fn execution_failures_are_bridge_errors() {
        let bridge = QueryBridge::new(ScriptedClient::replying(
            r#"{"aggregate":"sum","measure":"Vendor"}"#,
        ));
        let err = bridge.answer("Spend by vendor", &dataset()).unwrap_err();
        assert!(matches!(err, BridgeError::Execution(_)));
        assert!(err.to_string().contains("Vendor"));
    }

    #[test]
    fn blank_questions_never_reach_the_service() {
        let bridge = QueryBridge::new(ScriptedClient::replying("{}"));
        assert!(bridge.translate("  ", &dataset()).is_err());
        assert!(bridge.client.prompts.borrow().is_empty());
    }

    #[test]
    fn config_debug_redacts_the_key() {
        let rendered = format!("{:?}", BridgeConfig::new("sk-secret"));
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("gpt-4o"));
    }
}
