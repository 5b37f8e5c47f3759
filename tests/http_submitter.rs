use std::sync::Arc;

use barrage::{
    BarrageError, BatchRunner, ConcurrentStrategy, EntityOperation, FailureKind, OperationKind,
    Payload, ReqwestSubmitter, Submitter, SubmitterConfig,
};

fn submitter(base_url: String, api_key: Option<&str>) -> ReqwestSubmitter {
    ReqwestSubmitter::new(SubmitterConfig {
        base_url,
        api_key: api_key.map(str::to_string),
        timeout_ms: 2000,
    })
}

fn title(text: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("title".to_string(), text.into());
    payload
}

#[tokio::test]
async fn test_create_posts_json_and_reads_entity_id() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/posts")
        .match_header("authorization", "Bearer secret")
        .match_header("content-type", "application/json")
        .match_body(mockito::Matcher::Json(serde_json::json!({"title": "hello"})))
        .with_status(201)
        .with_body(r#"{"id":101,"title":"hello"}"#)
        .create_async()
        .await;

    let response = submitter(server.url(), Some("secret"))
        .submit(&EntityOperation::create(0, "posts", title("hello")))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.status, 201);
    assert_eq!(response.entity_id.as_deref(), Some("101"));
}

#[tokio::test]
async fn test_update_and_delete_address_the_entity() {
    let mut server = mockito::Server::new_async().await;
    let update = server
        .mock("PUT", "/comments/7")
        .with_status(200)
        .with_body(r#"{"id":7}"#)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/posts/3")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let sub = submitter(server.url(), None);
    sub.submit(&EntityOperation::update(0, "comments", "7", title("edit")))
        .await
        .unwrap();
    let deleted = sub
        .submit(&EntityOperation::delete(1, "posts", "3"))
        .await
        .unwrap();

    update.assert_async().await;
    delete.assert_async().await;
    assert_eq!(deleted.entity_id, None);
}

#[tokio::test]
async fn test_non_success_status_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/posts")
        .with_status(422)
        .with_body(r#"{"error":"title required"}"#)
        .create_async()
        .await;

    let err = submitter(server.url(), None)
        .submit(&EntityOperation::create(0, "posts", Payload::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, BarrageError::Rejected { status: 422, ref body } if body.contains("title required")));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_unreachable_api_is_a_network_failure() {
    // Nothing listens on port 9 (discard) locally
    let err = submitter("http://127.0.0.1:9".to_string(), None)
        .submit(&EntityOperation::create(0, "posts", Payload::new()))
        .await
        .unwrap_err();

    assert!(!err.is_fatal());
    assert_eq!(FailureKind::from_error(&err), FailureKind::NetworkError);
}

#[tokio::test]
async fn test_concurrent_batch_against_http_api() {
    let mut server = mockito::Server::new_async().await;
    let created = server
        .mock("POST", "/posts")
        .with_status(201)
        .with_body(r#"{"id":1}"#)
        .expect(4)
        .create_async()
        .await;
    let _rejected = server
        .mock("PUT", "/posts/99")
        .with_status(404)
        .with_body("not found")
        .create_async()
        .await;

    let submitter: Arc<dyn Submitter> = Arc::new(submitter(server.url(), None));
    let mut runner = BatchRunner::new(
        Arc::new(ConcurrentStrategy::new().with_max_concurrency(2).unwrap()),
        submitter,
    );
    for i in 0..4 {
        runner.enqueue(OperationKind::Create, "posts", None, title(&format!("post {i}")));
    }
    runner.enqueue(
        OperationKind::Update,
        "posts",
        Some("99".to_string()),
        title("missing"),
    );

    let summary = runner.push().await.unwrap();

    created.assert_async().await;
    assert_eq!(summary.total_count, 5);
    assert_eq!(summary.success_count, 4);
    assert_eq!(
        summary.results[4].failure_kind(),
        Some(&FailureKind::Rejected {
            status: 404,
            body: "not found".to_string()
        })
    );
}

#[tokio::test]
async fn test_read_back_gets_created_entity() {
    let mut server = mockito::Server::new_async().await;
    let _created = server
        .mock("POST", "/posts")
        .with_status(201)
        .with_body(r#"{"id":101}"#)
        .create_async()
        .await;
    let read = server
        .mock("GET", "/posts/101")
        .match_header("authorization", "Bearer secret")
        .with_status(200)
        .with_body(r#"{"id":101,"title":"hello"}"#)
        .create_async()
        .await;

    let submitter: Arc<dyn Submitter> = Arc::new(submitter(server.url(), Some("secret")));
    let mut runner = BatchRunner::new(Arc::new(barrage::SequentialStrategy::new()), submitter)
        .with_read_back(true);
    runner.enqueue(OperationKind::Create, "posts", None, title("hello"));

    let summary = runner.push().await.unwrap();

    read.assert_async().await;
    assert_eq!(summary.read_back.len(), 1);
    assert_eq!(summary.read_back[0].entity_id, "101");
    assert!(summary.read_back[0].is_success());
}
