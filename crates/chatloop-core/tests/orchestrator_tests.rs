//! Orchestrator integration tests
//!
//! Drive the tool-calling loop with a scripted model and closure tools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chatloop_core::conversation::{ConversationState, Message, MessageContent, Role};
use chatloop_core::error::{Error, ToolError};
use chatloop_core::orchestrator::{OrchestratorConfig, ToolCallOrchestrator};
use chatloop_core::provider::{ModelResponse, RawToolCall, ScriptedModelClient, ScriptedReply};
use chatloop_core::tools::{FnTool, Tool, ToolOutput, ToolRegistry};
use chatloop_core::CancellationToken;
use serde_json::{json, Value};

fn add_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        "add",
        "Add two integers",
        chatloop_core::tool_params!(a: "integer" => "First", b: "integer" => "Second"),
        |params: Value| async move {
            let a = params["a"].as_i64().unwrap_or_default();
            let b = params["b"].as_i64().unwrap_or_default();
            Ok(ToolOutput::success(a + b))
        },
    ))
}

fn registry_with(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    Arc::new(registry)
}

fn setup(
    script: Vec<ScriptedReply>,
    tools: Vec<Arc<dyn Tool>>,
    config: OrchestratorConfig,
) -> (Arc<ScriptedModelClient>, ToolCallOrchestrator) {
    let model = Arc::new(ScriptedModelClient::new(script));
    let orchestrator = ToolCallOrchestrator::new(model.clone(), registry_with(tools), config);
    (model, orchestrator)
}

fn call(name: &str, arguments: Value) -> ScriptedReply {
    ModelResponse::tool_call(name, arguments).into()
}

fn answer(text: &str) -> ScriptedReply {
    ModelResponse::text(text).into()
}

/// `error` tag of a tool-result message, if it reports a failure
fn error_kind(message: &Message) -> Option<String> {
    if !message.is_error {
        return None;
    }
    match &message.content {
        MessageContent::Json(value) => value["error"].as_str().map(|s| s.to_string()),
        MessageContent::Text(_) => None,
    }
}

mod scenario_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_tool_round() {
        let (model, orchestrator) = setup(
            vec![call("add", json!({ "a": 2, "b": 3 })), answer("5")],
            vec![add_tool()],
            OrchestratorConfig::default(),
        );
        let mut conversation = ConversationState::new();

        let result = orchestrator.run(&mut conversation, "what is 2+3").await.unwrap();
        assert_eq!(result, "5");

        let transcript = conversation.messages();
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[1].as_tool_call().unwrap().name, "add");
        assert_eq!(transcript[2].role, Role::ToolResult);
        assert_eq!(transcript[2].tool_name.as_deref(), Some("add"));
        assert_eq!(transcript[2].content, MessageContent::Json(json!(5)));
        assert!(!transcript[2].is_error);
        assert_eq!(transcript[3].content, MessageContent::Text("5".into()));

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].transcript_len, 1);
        assert_eq!(requests[1].transcript_len, 3);
        assert_eq!(requests[0].tool_names, vec!["add"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_model() {
        let (_, orchestrator) = setup(
            vec![call("subtract", json!({ "a": 5, "b": 3 })), answer("I can't do that")],
            vec![add_tool()],
            OrchestratorConfig::default(),
        );
        let mut conversation = ConversationState::new();

        let result = orchestrator.run(&mut conversation, "what is 5-3").await.unwrap();
        assert_eq!(result, "I can't do that");

        let report = &conversation.messages()[2];
        assert_eq!(report.role, Role::ToolResult);
        assert_eq!(report.tool_name.as_deref(), Some("subtract"));
        assert_eq!(error_kind(report).as_deref(), Some("unknown_tool"));
    }

    #[tokio::test]
    async fn test_round_limit_trips_on_second_round() {
        let (model, orchestrator) = setup(
            vec![
                call("add", json!({ "a": 1, "b": 1 })),
                call("add", json!({ "a": 2, "b": 2 })),
                answer("unreachable"),
            ],
            vec![add_tool()],
            OrchestratorConfig::default().with_max_rounds(1),
        );
        let mut conversation = ConversationState::new();

        let err = orchestrator.run(&mut conversation, "keep adding").await.unwrap_err();
        assert!(matches!(err, Error::MaxRoundsExceeded { limit: 1 }));

        // Round 1 completed; round 2's call was never recorded or dispatched
        assert_eq!(model.calls(), 2);
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.last().unwrap().role, Role::ToolResult);
    }
}

mod property_tests {
    use super::*;

    #[tokio::test]
    async fn test_transcript_length_follows_rounds() {
        for rounds in 0..=4 {
            let mut script: Vec<ScriptedReply> = (0..rounds)
                .map(|i| call("add", json!({ "a": i, "b": 1 })))
                .collect();
            script.push(answer("done"));

            // One assistant answer predates the run
            let model = Arc::new(ScriptedModelClient::new(script).with_offset(1));
            let orchestrator =
                ToolCallOrchestrator::new(model, registry_with(vec![add_tool()]), OrchestratorConfig::default());

            let mut conversation = ConversationState::new();
            conversation.append(Message::user("earlier question"));
            conversation.append(Message::assistant("earlier answer"));
            let initial = conversation.len() + 1;

            let result = orchestrator.run(&mut conversation, "go").await.unwrap();
            assert_eq!(result, "done");
            assert_eq!(conversation.len(), initial + 2 * rounds as usize + 1, "rounds = {}", rounds);
        }
    }

    #[tokio::test]
    async fn test_round_limit_is_exact() {
        for limit in 1..=3usize {
            // Exactly `limit` rounds succeeds
            let mut script: Vec<ScriptedReply> = (0..limit).map(|_| call("add", json!({}))).collect();
            script.push(answer("ok"));
            let (_, orchestrator) = setup(
                script,
                vec![add_tool()],
                OrchestratorConfig::default().with_max_rounds(limit),
            );
            let mut conversation = ConversationState::new();
            assert_eq!(orchestrator.run(&mut conversation, "go").await.unwrap(), "ok");

            // One more trips the limit
            let script: Vec<ScriptedReply> = (0..=limit).map(|_| call("add", json!({}))).collect();
            let (model, orchestrator) = setup(
                script,
                vec![add_tool()],
                OrchestratorConfig::default().with_max_rounds(limit),
            );
            let mut conversation = ConversationState::new();
            let err = orchestrator.run(&mut conversation, "go").await.unwrap_err();
            assert!(matches!(err, Error::MaxRoundsExceeded { limit: l } if l == limit));
            assert_eq!(model.calls(), limit + 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_never_escapes() {
        let names = ["subtract", "multiply", "", "ADD"];
        for name in names.iter().filter(|n| !n.is_empty()) {
            let (_, orchestrator) = setup(
                vec![call(name, json!({})), answer("recovered")],
                vec![add_tool()],
                OrchestratorConfig::default(),
            );
            let mut conversation = ConversationState::new();
            assert_eq!(orchestrator.run(&mut conversation, "go").await.unwrap(), "recovered");
            assert_eq!(error_kind(&conversation.messages()[2]).as_deref(), Some("unknown_tool"));
        }
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_turn_is_fatal() {
        let (_, orchestrator) = setup(
            vec![ModelResponse::default().into()],
            vec![add_tool()],
            OrchestratorConfig::default(),
        );
        let mut conversation = ConversationState::new();

        let err = orchestrator.run(&mut conversation, "hi").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTurn(_)));
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_invalid_turn() {
        let (_, orchestrator) = setup(
            vec![call("add", json!([2, 3]))],
            vec![add_tool()],
            OrchestratorConfig::default(),
        );
        let mut conversation = ConversationState::new();
        let err = orchestrator.run(&mut conversation, "hi").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTurn(_)));
    }

    #[tokio::test]
    async fn test_model_unavailable_keeps_partial_transcript() {
        let (_, orchestrator) = setup(
            vec![
                call("add", json!({ "a": 1, "b": 2 })),
                ScriptedReply::Unavailable("connection refused".into()),
            ],
            vec![add_tool()],
            OrchestratorConfig::default(),
        );
        let mut conversation = ConversationState::new();

        let err = orchestrator.run(&mut conversation, "hi").await.unwrap_err();
        assert!(matches!(err, Error::ModelUnavailable(msg) if msg == "connection refused"));
        assert_eq!(conversation.len(), 3);
    }

    #[tokio::test]
    async fn test_multiple_tool_calls_services_first_only() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();
        let counting = Arc::new(FnTool::new("count", "Counts calls", json!({}), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ToolOutput::success("counted"))
            }
        }));

        let response = ModelResponse {
            content: None,
            tool_calls: vec![
                RawToolCall::new("count", json!({})),
                RawToolCall::new("count", json!({})),
            ],
        };
        let (_, orchestrator) = setup(vec![response.into()], vec![counting], OrchestratorConfig::default());
        let mut conversation = ConversationState::new();

        let err = orchestrator.run(&mut conversation, "hi").await.unwrap_err();
        assert!(matches!(err, Error::MultipleToolCalls { count: 2 }));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(conversation.len(), 3);
    }

    #[tokio::test]
    async fn test_invocation_error_is_absorbed() {
        let failing = Arc::new(FnTool::new("fetch", "Always fails", json!({}), |_| async {
            Err(ToolError::invocation("fetch", "network unreachable"))
        }));
        let (_, orchestrator) = setup(
            vec![call("fetch", json!({ "url": "x" })), answer("The fetch failed.")],
            vec![failing],
            OrchestratorConfig::default(),
        );
        let mut conversation = ConversationState::new();

        let result = orchestrator.run(&mut conversation, "fetch x").await.unwrap();
        assert_eq!(result, "The fetch failed.");

        let report = &conversation.messages()[2];
        assert_eq!(error_kind(report).as_deref(), Some("invocation_error"));
        assert!(report.content.as_text().contains("network unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_is_distinct_error() {
        let slow = Arc::new(FnTool::new("slow", "Sleeps", json!({}), |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::success("late"))
        }));
        let (_, orchestrator) = setup(
            vec![call("slow", json!({})), answer("gave up")],
            vec![slow],
            OrchestratorConfig::default().with_tool_timeout(Duration::from_secs(1)),
        );
        let mut conversation = ConversationState::new();

        assert_eq!(orchestrator.run(&mut conversation, "hi").await.unwrap(), "gave up");
        assert_eq!(error_kind(&conversation.messages()[2]).as_deref(), Some("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_timeout_is_fatal() {
        let (_, orchestrator) = setup(
            vec![ScriptedReply::Delayed(Duration::from_secs(60), ModelResponse::text("late"))],
            vec![],
            OrchestratorConfig::default().with_model_timeout(Duration::from_secs(5)),
        );
        let mut conversation = ConversationState::new();

        let err = orchestrator.run(&mut conversation, "hi").await.unwrap_err();
        assert!(matches!(err, Error::ModelTimeout(after) if after == Duration::from_secs(5)));
        assert_eq!(conversation.len(), 1);
    }
}

mod cancellation_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_awaiting_model() {
        let (_, orchestrator) = setup(
            vec![ScriptedReply::Delayed(Duration::from_secs(60), ModelResponse::text("late"))],
            vec![],
            OrchestratorConfig::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let mut conversation = ConversationState::new();
        let err = orchestrator
            .run_with_cancel(&mut conversation, "hi", cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_tool_completes_then_run_stops() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let tool = Arc::new(FnTool::new("work", "Cancels mid-flight", json!({}), move |_| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                Ok(ToolOutput::success("finished"))
            }
        }));

        let (model, orchestrator) = setup(
            vec![call("work", json!({})), answer("unreachable")],
            vec![tool],
            OrchestratorConfig::default(),
        );
        let mut conversation = ConversationState::new();

        let err = orchestrator
            .run_with_cancel(&mut conversation, "hi", cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        // The result of the dispatched tool is recorded; the model is not asked again
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.messages()[2].content, MessageContent::Text("finished".into()));
        assert_eq!(model.calls(), 1);
    }
}

mod concurrency_tests {
    use super::*;

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let (model, orchestrator) = setup(
            vec![call("add", json!({ "a": 2, "b": 3 })), answer("5")],
            vec![add_tool()],
            OrchestratorConfig::default(),
        );

        let mut first = ConversationState::new();
        let mut second = ConversationState::new();
        let (a, b) = tokio::join!(
            orchestrator.run(&mut first, "what is 2+3"),
            orchestrator.run(&mut second, "and again, 2+3?"),
        );

        assert_eq!(a.unwrap(), "5");
        assert_eq!(b.unwrap(), "5");
        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
        assert_eq!(first.messages()[0].content.as_text(), "what is 2+3");
        assert_eq!(second.messages()[0].content.as_text(), "and again, 2+3?");
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn test_shared_across_tasks() {
        let (_, orchestrator) = setup(vec![answer("hello")], vec![], OrchestratorConfig::default());
        let orchestrator = Arc::new(orchestrator);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    let mut conversation = ConversationState::new();
                    let answer = orchestrator.run(&mut conversation, &format!("hi {}", i)).await;
                    (answer, conversation.len())
                })
            })
            .collect();

        for handle in handles {
            let (answer, len) = handle.await.unwrap();
            assert_eq!(answer.unwrap(), "hello");
            assert_eq!(len, 2);
        }
    }
}
