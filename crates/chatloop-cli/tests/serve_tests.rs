//! `chatloop serve` driven over real pipes

use std::collections::HashMap;

use chatloop_core::config::McpServerConfig;
use chatloop_core::mcp_manager::McpServerManager;
use chatloop_mcp::{ClientInfo, McpClient, StdioTransport};
use serde_json::json;

/// Arguments that point the binary at an empty config so user settings don't leak in
fn serve_args(dir: &tempfile::TempDir) -> Vec<String> {
    vec![
        "--config".to_string(),
        dir.path().join("config.toml").display().to_string(),
        "serve".to_string(),
    ]
}

#[tokio::test]
async fn test_serve_over_stdio() {
    let dir = tempfile::tempdir().unwrap();
    let transport = StdioTransport::spawn(env!("CARGO_BIN_EXE_chatloop"), &serve_args(&dir), &HashMap::new())
        .await
        .unwrap();

    let mut client = McpClient::new(transport);
    let info = client.initialize(ClientInfo::new("tests", "0.0.0")).await.unwrap();
    assert_eq!(info.name, "chatloop-calculation");

    let names: Vec<_> = client.list_tools().await.unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["add_two_numbers", "greet"]);

    let result = client
        .call_tool("add_two_numbers", json!({ "a": 19, "b": 23 }))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.text(), "42");

    client.close().await.unwrap();
    let mut transport = client.into_transport();
    assert!(transport.try_wait().unwrap().is_some());
}

#[tokio::test]
async fn test_manager_connects_to_serve() {
    let dir = tempfile::tempdir().unwrap();
    let config = McpServerConfig::new(env!("CARGO_BIN_EXE_chatloop")).with_args(serve_args(&dir));

    let manager = McpServerManager::new();
    let tools = manager.connect("calc", &config).await.unwrap();
    assert_eq!(tools.len(), 2);

    let greeting = manager.call_tool("calc", "greet", json!({ "name": "Ada" })).await.unwrap();
    assert_eq!(greeting.text(), "Hi Ada, I am chatloop");

    manager.shutdown().await;
    assert!(manager.server_names().is_empty());
}
