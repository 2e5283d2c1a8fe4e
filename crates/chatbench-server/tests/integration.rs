use chatbench_server::{app, MockServerConfig};

async fn spawn(config: MockServerConfig) -> String {
    let (router, _) = app(config).unwrap();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}:{}", addr.ip(), addr.port())
}

#[tokio::test]
async fn models_completion_and_metrics() {
    let base = spawn(MockServerConfig { model_id: "m-1".into(), ..Default::default() }).await;
    let client = reqwest::Client::new();

    let models: serde_json::Value =
        client.get(format!("{}/v1/models", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(models["data"][0]["id"], "m-1");

    let body = serde_json::json!({
        "model": "m-1",
        "messages": [{"role": "user", "content": "hello hello hello"}],
        "max_tokens": 8
    });
    let r = client.post(format!("{}/v1/chat/completions", base)).json(&body).send().await.unwrap();
    assert!(r.status().is_success());
    let j: serde_json::Value = r.json().await.unwrap();
    assert_eq!(j["id"], "chatcmpl-1");
    assert_eq!(j["usage"]["prompt_tokens"], 3);
    assert_eq!(j["usage"]["completion_tokens"], 8);

    let r = client.get(format!("{}/metrics", base)).send().await.unwrap();
    assert!(r.status().is_success());
    assert!(r.text().await.unwrap().contains("mock_requests_total 1"));
}

#[tokio::test]
async fn fail_every_injects_errors() {
    let base = spawn(MockServerConfig { fail_every: Some(2), ..Default::default() }).await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({"messages": [{"role": "user", "content": "hi"}]});
    let mut statuses = Vec::new();
    for _ in 0..4 {
        let url = format!("{}/v1/chat/completions", base);
        let r = client.post(url).json(&body).send().await.unwrap();
        statuses.push(r.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 500, 200, 500]);
}

#[tokio::test]
async fn streaming_ends_with_usage_then_done() {
    let base = spawn(MockServerConfig { stream_chunks: 3, ..Default::default() }).await;
    let body = serde_json::json!({
        "messages": [{"role": "user", "content": "hi"}],
        "max_tokens": 5,
        "stream": true,
        "stream_options": {"include_usage": true}
    });
    let text = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .json(&body)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let data: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    assert_eq!(data.len(), 5);
    assert_eq!(*data.last().unwrap(), "[DONE]");
    let usage: serde_json::Value = serde_json::from_str(data[3]).unwrap();
    assert_eq!(usage["usage"]["completion_tokens"], 5);
}
