//! Orchestration Loop
//!
//! Alternates between asking the model and running the tools it requests
//! until the model answers without tool calls.
//!
//! ```text
//!            ┌──────────── tool calls ────────────┐
//!            │                                    ▼
//!  input ─▶ AskModel                           RunTools
//!            ▲  │                                   │
//!            │  └── no tool calls ─▶ answer         │
//!            └──────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::extract::{clean_response, extract_tool_calls};
use crate::message::{Conversation, Message};
use crate::provider::{LlmProvider, ToolCallingMode};
use crate::tool::{Tool, ToolRegistry};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Optional system prompt, sent once at the start of the conversation
    pub system_prompt: Option<String>,

    /// Maximum model invocations before giving up
    pub max_turns: usize,

    /// Per-call tool timeout
    pub tool_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_turns: 10,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

/// Final state of a successful run
#[derive(Clone, Debug)]
pub struct AgentOutcome {
    /// Full conversation, including tool traffic
    pub messages: Vec<Message>,

    /// Text of the terminal assistant message
    pub answer: String,
}

/// Next transition of the loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    AskModel,
    RunTools,
    Done,
}

/// Routing rule evaluated after every model turn
pub fn route(conversation: &Conversation) -> Step {
    match conversation.last() {
        Some(message) if message.has_tool_calls() => Step::RunTools,
        _ => Step::Done,
    }
}

/// The main Agent struct
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Run the loop on one caller input
    pub async fn run(&self, input: &str, cancel: &CancellationToken) -> Result<AgentOutcome> {
        let mut conversation = Conversation::new();
        let mut step = Step::AskModel;
        let mut turns = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            match step {
                Step::AskModel => {
                    if turns >= self.config.max_turns {
                        tracing::warn!(turns, "Turn ceiling reached");
                        return Err(AgentError::MaxTurns(self.config.max_turns));
                    }
                    turns += 1;
                    conversation = self.ask_model(conversation, input, cancel).await?;
                    step = route(&conversation);
                }
                Step::RunTools => {
                    conversation = self.run_tools(conversation, cancel).await?;
                    step = Step::AskModel;
                }
                Step::Done => break,
            }
        }

        tracing::debug!(turns, messages = conversation.len(), "Agent finished");
        let answer = conversation
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(AgentOutcome {
            messages: conversation.into_messages(),
            answer,
        })
    }

    /// Run with a simple string input and no external cancellation
    pub async fn ask(&self, input: &str) -> Result<String> {
        self.run(input, &CancellationToken::new())
            .await
            .map(|outcome| outcome.answer)
    }

    /// Messages that open a conversation: system block (if any) then the input
    fn opening_messages(&self, input: &str) -> Vec<Message> {
        let mut system = Vec::new();

        if let Some(prompt) = self.config.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            system.push(prompt.to_string());
        }
        if self.provider.mode() == ToolCallingMode::Manual && !self.tools.is_empty() {
            system.push(self.tools.generate_prompt_section());
        }

        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Message::system(system.join("\n\n")));
        }
        messages.push(Message::user(input));
        messages
    }

    /// AskModel: invoke the model and append its turn
    async fn ask_model(
        &self,
        mut conversation: Conversation,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<Conversation> {
        if conversation.is_empty() {
            conversation.extend(self.opening_messages(input));
        }

        let mode = self.provider.mode();
        let tools = match mode {
            ToolCallingMode::Native => self.tools.descriptors(),
            ToolCallingMode::Manual => Vec::new(),
        };

        let completion = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
            completion = self.provider.complete(conversation.messages(), &tools) => completion?,
        };

        if let Some(usage) = &completion.usage {
            tracing::debug!(
                model = %completion.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Model turn complete"
            );
        }

        let message = match mode {
            ToolCallingMode::Native => {
                Message::assistant(completion.content).with_tool_calls(completion.tool_calls)
            }
            ToolCallingMode::Manual => {
                let calls = extract_tool_calls(&completion.content);
                if calls.is_empty() {
                    Message::assistant(clean_response(&completion.content))
                } else {
                    Message::assistant(completion.content).with_tool_calls(calls)
                }
            }
        };

        conversation.push(message);
        Ok(conversation)
    }

    /// RunTools: execute the pending calls of the last assistant turn
    async fn run_tools(
        &self,
        mut conversation: Conversation,
        cancel: &CancellationToken,
    ) -> Result<Conversation> {
        let calls = conversation
            .last()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        tracing::debug!(count = calls.len(), "Dispatching tool calls");

        let results = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
            results = self.tools.dispatch(&calls, self.config.tool_timeout) => results?,
        };

        conversation.extend(results.into_iter().map(|r| r.into_message()));
        Ok(conversation)
    }
}

/// Builder for Agent configuration
#[derive(Default)]
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: Option<String>) -> Self {
        self.config.system_prompt = prompt;
        self
    }

    #[must_use]
    pub const fn max_turns(mut self, max: usize) -> Self {
        self.config.max_turns = max;
        self
    }

    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        Ok(Agent::new(provider, Arc::new(self.tools), self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::provider::{Completion, ProviderKind, ProviderProfile};
    use crate::tool::{Arguments, ToolCall, ToolDescriptor, MANUAL_TOOLS_HEADING};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider replaying canned completions and recording every request
    struct ScriptedProvider {
        profile: ProviderProfile,
        replies: Mutex<VecDeque<Completion>>,
        fallback: Option<Completion>,
        requests: Mutex<Vec<(Vec<Message>, usize)>>,
    }

    impl ScriptedProvider {
        fn new(kind: ProviderKind, replies: Vec<Completion>) -> Self {
            Self {
                profile: ProviderProfile::new(kind, "http://mock"),
                replies: Mutex::new(replies.into()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(Vec<Message>, usize)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn profile(&self) -> &ProviderProfile {
            &self.profile
        }

        async fn complete(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Result<Completion> {
            self.requests
                .lock()
                .unwrap()
                .push((messages.to_vec(), tools.len()));
            let next = self.replies.lock().unwrap().pop_front();
            Ok(next
                .or_else(|| self.fallback.clone())
                .unwrap_or_else(|| text("done")))
        }
    }

    struct AddTool(ToolDescriptor);

    impl AddTool {
        fn new() -> Self {
            Self(ToolDescriptor::new(
                "add",
                "Adds two numbers",
                json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }),
            ))
        }
    }

    #[async_trait]
    impl Tool for AddTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }

        async fn execute(&self, arguments: &Arguments) -> Result<Value> {
            let a = arguments.get("a").and_then(Value::as_f64).unwrap_or_default();
            let b = arguments.get("b").and_then(Value::as_f64).unwrap_or_default();
            Ok(json!({"sum": a + b}))
        }
    }

    fn text(content: &str) -> Completion {
        Completion {
            content: content.into(),
            ..Default::default()
        }
    }

    fn native_call(id: &str, name: &str, args: Value) -> Completion {
        Completion {
            tool_calls: vec![ToolCall::new(id, name, args.as_object().cloned().unwrap_or_default())],
            ..Default::default()
        }
    }

    fn agent(provider: Arc<ScriptedProvider>, system_prompt: Option<&str>, max_turns: usize) -> Agent {
        AgentBuilder::new()
            .provider(provider)
            .tool(AddTool::new())
            .system_prompt(system_prompt.map(Into::into))
            .max_turns(max_turns)
            .build()
            .unwrap()
    }

    #[test]
    fn test_route() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("hi"));
        conversation.push(Message::assistant("hello"));
        assert_eq!(route(&conversation), Step::Done);

        conversation.push(
            Message::assistant("").with_tool_calls(vec![ToolCall::new("c1", "add", Arguments::new())]),
        );
        assert_eq!(route(&conversation), Step::RunTools);
    }

    #[tokio::test]
    async fn test_native_tool_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![
                native_call("call_1", "add", json!({"a": 2, "b": 3})),
                text("The sum is 5"),
            ],
        ));
        let outcome = agent(provider.clone(), None, 10)
            .run("What is 2 + 3?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.answer, "The sum is 5");
        let roles: Vec<Role> = outcome.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(outcome.messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(outcome.messages[2].content, r#"{"sum":5.0}"#);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|(_, tools)| *tools == 1));
        assert_eq!(requests[1].0.len(), 3);
    }

    #[tokio::test]
    async fn test_manual_mode_injects_tool_block_once() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::LlamaCpp,
            vec![
                text(r#"{"tool_name": "add", "tool_args": {"a": "2", "b": 3}}"#),
                text("<|start|>assistant<|channel|>final<|message|>It is 5.<|return|>"),
            ],
        ));
        let outcome = agent(provider.clone(), Some("Be brief."), 10)
            .run("What is 2 + 3?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.answer, "It is 5.");
        assert_eq!(outcome.messages[3].content, r#"{"sum":5.0}"#);

        let with_block = |messages: &[Message]| {
            messages
                .iter()
                .filter(|m| m.content.contains(MANUAL_TOOLS_HEADING))
                .count()
        };
        assert_eq!(with_block(&outcome.messages), 1);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        for (messages, tools) in &requests {
            assert_eq!(*tools, 0);
            assert_eq!(with_block(messages), 1);
            assert_eq!(messages[0].role, Role::System);
            assert!(messages[0].content.starts_with("Be brief."));
        }
    }

    #[tokio::test]
    async fn test_system_prompt_sent_once() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![native_call("c1", "add", json!({"a": 1, "b": 1})), text("2")],
        ));
        let outcome = agent(provider, Some("You are a calculator."), 10)
            .run("1 + 1", &CancellationToken::new())
            .await
            .unwrap();

        let systems: Vec<&Message> = outcome
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(outcome.messages[0].content, "You are a calculator.");
        assert_eq!(
            outcome.messages.iter().filter(|m| m.role == Role::User).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_turn_ceiling() {
        let mut scripted = ScriptedProvider::new(ProviderKind::OpenAi, Vec::new());
        scripted.fallback = Some(native_call("c1", "add", json!({"a": 1, "b": 1})));
        let provider = Arc::new(scripted);

        let err = agent(provider.clone(), None, 3)
            .run("loop forever", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::MaxTurns(3)));
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_request() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![native_call("c1", "weather", json!({"city": "Jakarta"}))],
        ));
        let err = agent(provider, None, 10).ask("Weather?").await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(name) if name == "weather"));
    }

    #[tokio::test]
    async fn test_plain_answer_terminates() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::Ollama, vec![text("Hello there")]));
        let answer = agent(provider.clone(), None, 10).ask("Hi").await.unwrap();
        assert_eq!(answer, "Hello there");
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi, vec![text("unused")]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agent(provider.clone(), None, 10).run("Hi", &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(provider.requests().is_empty());
    }

    /// Provider whose model call never finishes in test time
    struct StalledProvider(ProviderProfile);

    #[async_trait]
    impl LlmProvider for StalledProvider {
        fn profile(&self) -> &ProviderProfile {
            &self.0
        }

        async fn complete(&self, _: &[Message], _: &[ToolDescriptor]) -> Result<Completion> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(text("too late"))
        }
    }

    #[tokio::test]
    async fn test_cancel_during_model_call() {
        let agent = AgentBuilder::new()
            .provider(Arc::new(StalledProvider(ProviderProfile::new(
                ProviderKind::OpenAi,
                "http://mock",
            ))))
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = agent.run("Hi", &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dropped_guard_cancels_run() {
        let agent = AgentBuilder::new()
            .provider(Arc::new(StalledProvider(ProviderProfile::new(
                ProviderKind::Ollama,
                "http://mock",
            ))))
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            drop(guard);
        });

        let err = agent.run("Hi", &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(AgentBuilder::new().build(), Err(AgentError::Config(_))));
    }
}
