use beeminder_add::api::{HttpResponse, Transport, TransportError};
use beeminder_add::retry::RetryPolicy;
use beeminder_add::{ConfigError, GoalCredentials, SubmissionError, Submitter};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// Scripted transport: replays queued outcomes and records every request.
#[derive(Default)]
struct FakeTransport {
    replies: RefCell<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: RefCell<Vec<(String, Value, Duration)>>,
}

impl FakeTransport {
    fn replying(replies: Vec<Result<HttpResponse, TransportError>>) -> Self {
        FakeTransport {
            replies: RefCell::new(replies.into()),
            requests: RefCell::default(),
        }
    }

    fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    fn last_body(&self) -> Value {
        self.requests.borrow().last().unwrap().1.clone()
    }
}

impl Transport for FakeTransport {
    fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.requests
            .borrow_mut()
            .push((url.to_string(), body.clone(), timeout));
        self.replies
            .borrow_mut()
            .pop_front()
            .expect("no scripted reply left")
    }
}

fn status(code: u16, body: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(code, body))
}

fn alice() -> GoalCredentials {
    GoalCredentials {
        username: "alice".into(),
        goal_name: "nback".into(),
        auth_token: "tok123".into(),
        base_comment: "session done".into(),
    }
}

/// Submitter whose sleeps are recorded instead of performed.
fn submitter(
    replies: Vec<Result<HttpResponse, TransportError>>,
) -> (Submitter<FakeTransport>, Rc<RefCell<Vec<Duration>>>) {
    let slept = Rc::new(RefCell::new(Vec::new()));
    let record = Rc::clone(&slept);
    let submitter = Submitter::new(alice(), FakeTransport::replying(replies))
        .with_sleeper(move |d| record.borrow_mut().push(d));
    (submitter, slept)
}

#[test]
fn alice_scenario_posts_expected_body_to_expected_url() {
    let ack_body = r#"{"id":"dp1","value":1.0,"comment":"session done | score=42"}"#;
    let (submitter, slept) = submitter(vec![status(200, ack_body)]);

    let before = chrono::Utc::now().timestamp();
    let ack = submitter.submit(Some("score=42")).unwrap();

    assert_eq!(ack, serde_json::from_str::<Value>(ack_body).unwrap());

    let requests = submitter.transport().requests.borrow();
    assert_eq!(requests.len(), 1);
    let (url, body, timeout) = &requests[0];
    assert_eq!(
        url,
        "https://www.beeminder.com/api/v1/users/alice/goals/nback/datapoints.json"
    );
    assert_eq!(*timeout, Duration::from_secs(10));
    assert_eq!(body["auth_token"], "tok123");
    assert_eq!(body["value"], json!(1.0));
    assert_eq!(body["comment"], "session done | score=42");
    assert_eq!(body.as_object().unwrap().len(), 4);

    let ts = body["timestamp"].as_i64().unwrap();
    assert!((ts - before).abs() <= 5, "timestamp {ts} too far from {before}");
    assert!(slept.borrow().is_empty());
}

#[test]
fn comment_is_base_alone_without_note() {
    let (submitter, _) = submitter(vec![status(200, "{}")]);
    submitter.submit(None).unwrap();
    assert_eq!(submitter.transport().last_body()["comment"], "session done");
}

#[test]
fn whitespace_note_is_appended_verbatim() {
    let (submitter, _) = submitter(vec![status(200, "{}")]);
    submitter.submit(Some("   ")).unwrap();
    assert_eq!(
        submitter.transport().last_body()["comment"],
        "session done |    "
    );
}

#[test]
fn value_is_always_one() {
    let (submitter, _) = submitter(vec![status(200, "{}"), status(200, "{}")]);
    submitter.submit(None).unwrap();
    assert_eq!(submitter.transport().last_body()["value"].as_f64(), Some(1.0));
    submitter.submit(Some("again")).unwrap();
    assert_eq!(submitter.transport().last_body()["value"].as_f64(), Some(1.0));
}

#[test]
fn retries_transient_status_then_succeeds() {
    let (submitter, slept) = submitter(vec![
        status(503, "busy"),
        status(502, "bad gateway"),
        status(200, r#"{"id":"ok"}"#),
    ]);

    let ack = submitter.submit(None).unwrap();
    assert_eq!(ack["id"], "ok");
    assert_eq!(submitter.transport().calls(), 3);
    assert_eq!(
        *slept.borrow(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );

    // Same body on every attempt.
    let requests = submitter.transport().requests.borrow();
    assert_eq!(requests[0].1, requests[2].1);
}

#[test]
fn three_503s_exhaust_retries() {
    let (submitter, slept) = submitter(vec![
        status(503, "down"),
        status(503, "down"),
        status(503, "still down"),
    ]);

    let err = submitter.submit(None).unwrap_err();
    match err {
        SubmissionError::HttpError { status, body, .. } => {
            assert_eq!(status, 503);
            assert_eq!(body, "still down");
        }
        other => panic!("expected HttpError, got {other:?}"),
    }
    assert_eq!(submitter.transport().calls(), 3);
    assert_eq!(slept.borrow().len(), 2);
}

#[test]
fn client_errors_are_not_retried() {
    for code in [400, 401, 403, 404, 422] {
        let (submitter, slept) = submitter(vec![status(code, "nope")]);
        let err = submitter.submit(None).unwrap_err();
        assert!(
            matches!(err, SubmissionError::HttpError { status, .. } if status == code),
            "status {code}: {err:?}"
        );
        assert_eq!(submitter.transport().calls(), 1, "status {code}");
        assert!(slept.borrow().is_empty());
    }
}

#[test]
fn retry_after_header_sets_the_wait() {
    let mut throttled = HttpResponse::new(429, "slow down");
    throttled.retry_after = Some(Duration::from_secs(7));
    let (submitter, slept) = submitter(vec![
        Ok(throttled),
        status(503, "busy"),
        status(200, "{}"),
    ]);

    submitter.submit(None).unwrap();
    assert_eq!(
        *slept.borrow(),
        vec![Duration::from_secs(7), Duration::from_secs(4)]
    );
}

#[test]
fn connection_failures_exhaust_into_connection_failed() {
    let refused = || Err(TransportError::Connect("connection refused".into()));
    let (submitter, _) = submitter(vec![refused(), refused(), refused()]);

    let err = submitter.submit(Some("score=7")).unwrap_err();
    match err {
        SubmissionError::ConnectionFailed {
            attempts,
            cause,
            comment,
            endpoint,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(cause, "connection refused");
            assert_eq!(comment, "session done | score=7");
            assert!(endpoint.ends_with("/users/alice/goals/nback/datapoints.json"));
        }
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
    assert_eq!(submitter.transport().calls(), 3);
}

#[test]
fn connection_failure_then_success() {
    let (submitter, _) = submitter(vec![
        Err(TransportError::Connect("reset".into())),
        status(200, r#"{"id":"late"}"#),
    ]);
    assert_eq!(submitter.submit(None).unwrap()["id"], "late");
    assert_eq!(submitter.transport().calls(), 2);
}

#[test]
fn timeout_is_reported_without_retry() {
    let (submitter, _) = submitter(vec![Err(TransportError::Timeout)]);
    let submitter = submitter.with_timeout(Duration::from_secs(3));

    let err = submitter.submit(None).unwrap_err();
    match err {
        SubmissionError::Timeout { timeout, .. } => assert_eq!(timeout, Duration::from_secs(3)),
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(submitter.transport().calls(), 1);
}

#[test]
fn other_transport_errors_are_unknown() {
    let (submitter, _) = submitter(vec![Err(TransportError::Other("tls".into()))]);
    let err = submitter.submit(None).unwrap_err();
    assert_eq!(err.kind(), "unknown");
}

#[test]
fn non_json_success_body_is_unknown() {
    let (submitter, _) = submitter(vec![status(200, "<html>ok</html>")]);
    let err = submitter.submit(None).unwrap_err();
    assert!(matches!(err, SubmissionError::Unknown(_)));
}

#[test]
fn custom_policy_and_base_url() {
    let (submitter, _) = submitter(vec![status(500, "x")]);
    let submitter = submitter
        .with_base_url("http://localhost:3001/api/v1/")
        .with_retry_policy(RetryPolicy::no_retry());

    let err = submitter.submit(None).unwrap_err();
    assert!(matches!(err, SubmissionError::HttpError { status: 500, .. }));
    assert_eq!(submitter.transport().calls(), 1);
    assert_eq!(
        submitter.transport().requests.borrow()[0].0,
        "http://localhost:3001/api/v1/users/alice/goals/nback/datapoints.json"
    );
}

#[test]
fn absent_config_fails_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::default();

    let err = Submitter::from_config_file(&dir.path().join("beeminder.json"), &transport)
        .err()
        .unwrap();
    assert!(matches!(err, SubmissionError::Config(ConfigError::NotFound { .. })));
    assert_eq!(err.kind(), "config");
    assert_eq!(transport.calls(), 0);
}

#[test]
fn incomplete_config_fails_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("beeminder.json");
    std::fs::write(
        &path,
        r#"{"username":"alice","goalname":"nback","comment":"session done"}"#,
    )
    .unwrap();

    let transport = FakeTransport::default();
    let err = Submitter::from_config_file(&path, &transport)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SubmissionError::Config(ConfigError::MissingField { field: "auth_token", .. })
    ));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn valid_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("beeminder.json");
    std::fs::write(
        &path,
        r#"{"username":"alice","goalname":"nback","auth_token":"tok123","comment":"session done"}"#,
    )
    .unwrap();

    let submitter = Submitter::from_config_file(
        &path,
        FakeTransport::replying(vec![status(200, r#"{"id":"x"}"#)]),
    )
    .unwrap();
    assert_eq!(submitter.credentials(), &alice());
    assert_eq!(submitter.submit(None).unwrap()["id"], "x");
    assert_eq!(submitter.transport().calls(), 1);
}
