use fluxgen::{CompletionConfig, Config, FluxClient, FluxError};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

fn client_for(server: &ServerGuard) -> FluxClient {
    let completion = CompletionConfig::new()
        .with_credentials("sk-test")
        .with_api_url(server.url())
        .with_prompt_template("You write image prompts.");
    FluxClient::new(Config::new().with_completion(completion)).unwrap()
}

#[tokio::test]
async fn test_optimize_returns_trimmed_completion() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "temperature": 0.7,
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "  A WWII-era nurse, masterpiece, best quality  \n"
                    }
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let prompt = client_for(&server)
        .optimize_prompt("a nurse in wwii", false)
        .await
        .unwrap();

    assert_eq!(prompt, "A WWII-era nurse, masterpiece, best quality");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_regenerate_uses_hotter_temperature() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({ "temperature": 0.9 })))
        .with_status(200)
        .with_body(json!({ "choices": [{ "message": { "content": "again" } }] }).to_string())
        .create_async()
        .await;

    let prompt = client_for(&server)
        .optimize_prompt("a cat", true)
        .await
        .unwrap();

    assert_eq!(prompt, "again");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_backend_error_message_is_relayed() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(json!({ "error": { "message": "Invalid API key", "type": "auth" } }).to_string())
        .create_async()
        .await;

    let err = client_for(&server)
        .optimize_prompt("a cat", false)
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(401));
    match err {
        FluxError::UpstreamError { message, .. } => {
            assert_eq!(message, "OpenAI API error: Invalid API key")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unstructured_failure_gets_generic_message() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(502)
        .with_body("<html>bad gateway</html>")
        .create_async()
        .await;

    let err = client_for(&server)
        .optimize_prompt("a cat", false)
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(502));
    assert_eq!(
        err.to_string(),
        "Upstream error: Error while optimizing the prompt"
    );
}

#[tokio::test]
async fn test_empty_choices_is_upstream_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(json!({ "choices": [] }).to_string())
        .create_async()
        .await;

    let err = client_for(&server)
        .optimize_prompt("a cat", false)
        .await
        .unwrap_err();

    assert!(matches!(err, FluxError::UpstreamError { .. }));
}
