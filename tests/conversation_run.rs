use std::sync::{Arc, Mutex};

use persona_duet::{
    providers::scripted::ScriptedProvider, BackendClient, BackendPair, ConversationLog,
    ConversationSession, GroupChatEvent, PersonaBundle, RunContext, RunError, EVALUATION_FAILURE,
};

struct Fixture {
    customer: Arc<ScriptedProvider>,
    staff: Arc<ScriptedProvider>,
    session: ConversationSession,
}

fn personas() -> PersonaBundle {
    PersonaBundle::new(
        "You are a customer with a broken kettle.",
        "You are a helpful shop clerk.",
        "Score the customer's persona consistency from 1 to 10.",
    )
    .unwrap()
}

fn fixture(customer: ScriptedProvider, staff: ScriptedProvider, context: RunContext) -> Fixture {
    let customer = Arc::new(customer);
    let staff = Arc::new(staff);
    let backends = BackendPair::new(
        BackendClient::new("customer", customer.clone(), "customer-model"),
        BackendClient::new("staff", staff.clone(), "staff-model"),
    );

    Fixture {
        customer,
        staff,
        session: ConversationSession::new(context, personas(), backends),
    }
}

#[tokio::test]
async fn natural_ending_is_evaluated_and_logged() {
    let dir = tempfile::tempdir().unwrap();
    let context = RunContext::create(dir.path()).unwrap();
    let mut fixture = fixture(
        ScriptedProvider::from_texts(["My kettle stopped working.", "Perfect, thank you. DONE"]),
        ScriptedProvider::from_texts(["I can offer a replacement.", "Score: 9/10"]),
        context,
    );

    let result = fixture
        .session
        .run_with_opening("Kettle replacement", Some("Hello."), 10)
        .await
        .unwrap();

    assert!(result.ended_naturally);
    assert_eq!(result.total_turns, 3);
    assert_eq!(result.evaluation, "Score: 9/10");

    let json_path = result.log_file_json.clone().unwrap();
    let saved = ConversationLog::load(&json_path).unwrap();
    let speakers: Vec<&str> = saved.entries().iter().map(|e| e.speaker.as_str()).collect();
    assert_eq!(speakers, ["System", "Customer", "Staff", "Customer", "Evaluator"]);
    assert_eq!(saved.entries()[0].content, "Scenario: Kettle replacement");

    let stats = fixture.session.stats().unwrap();
    assert_eq!(stats.total_logged_entries, 5);
    assert_eq!(stats.customer_messages, 2);
    assert_eq!(stats.staff_messages, 1);
    assert_eq!(stats.actual_conversation_turns, 3);
    assert!(stats.duration_seconds.is_some());

    let requests = fixture.customer.requests();
    let first_request = &requests[0];
    assert!(first_request.messages[0]
        .text()
        .unwrap()
        .starts_with("You are a customer with a broken kettle."));
    assert!(first_request.messages[1].text().unwrap().contains("\"Hello.\""));
}

#[tokio::test]
async fn budget_exhaustion_still_evaluates() {
    let mut fixture = fixture(
        ScriptedProvider::new().with_fallback("Could you check again?"),
        ScriptedProvider::from_texts(["Let me look.", "Still looking.", "Verdict: 5/10"]),
        RunContext::in_memory(),
    );

    let result = fixture.session.run("Lost parcel", 4).await.unwrap();

    assert!(!result.ended_naturally);
    assert_eq!(result.total_turns, 4);
    assert_eq!(result.transcript.len(), 4);
    assert_eq!(result.evaluation, "Verdict: 5/10");
    assert!(result.log_file_json.is_none());
}

#[tokio::test]
async fn zero_budget_goes_straight_to_evaluation() {
    let mut fixture = fixture(
        ScriptedProvider::new(),
        ScriptedProvider::from_texts(["Nothing to grade."]),
        RunContext::in_memory(),
    );

    let result = fixture.session.run("Empty", 0).await.unwrap();

    assert_eq!(result.total_turns, 0);
    assert!(result.transcript.is_empty());
    assert!(!result.ended_naturally);
    assert_eq!(result.evaluation, "Nothing to grade.");
    assert_eq!(fixture.customer.request_count(), 0);
}

#[tokio::test]
async fn evaluator_failure_keeps_the_result() {
    let mut fixture = fixture(
        ScriptedProvider::from_texts(["Thanks, bye. DONE"]),
        ScriptedProvider::new().fail("service unavailable"),
        RunContext::in_memory(),
    );

    let result = fixture.session.run("Quick question", 6).await.unwrap();

    assert!(result.ended_naturally);
    assert_eq!(result.evaluation, EVALUATION_FAILURE);
    let last = fixture.session.log().entries().last().unwrap();
    assert_eq!(last.speaker, "Evaluator");
    assert_eq!(last.content, EVALUATION_FAILURE);
}

#[tokio::test]
async fn backends_are_released_exactly_once() {
    let mut fixture = fixture(
        ScriptedProvider::from_texts(["Bye. DONE"]),
        ScriptedProvider::from_texts(["Fine."]),
        RunContext::in_memory(),
    );

    fixture.session.run("Short", 4).await.unwrap();
    fixture.session.release().await;

    assert_eq!(fixture.customer.close_count(), 1);
    assert_eq!(fixture.staff.close_count(), 1);
}

#[tokio::test]
async fn backend_failure_yields_no_result_and_releases() {
    let mut fixture = fixture(
        ScriptedProvider::from_texts(["Hello?"]),
        ScriptedProvider::new().fail("rate limited"),
        RunContext::in_memory(),
    );

    let error = fixture.session.run("Outage", 6).await.unwrap_err();

    assert!(matches!(error, RunError::Backend { ref agent, .. } if agent == "Staff"));
    let speakers: Vec<&str> = fixture
        .session
        .log()
        .entries()
        .iter()
        .map(|e| e.speaker.as_str())
        .collect();
    assert_eq!(speakers, ["System", "Customer"]);
    assert_eq!(fixture.customer.close_count(), 1);
    assert_eq!(fixture.staff.close_count(), 1);

    fixture.session.release().await;
    assert_eq!(fixture.staff.close_count(), 1);
}

#[tokio::test]
async fn observer_sees_turns_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let fixture = fixture(
        ScriptedProvider::from_texts(["Hi there.", "Great. DONE"]),
        ScriptedProvider::from_texts(["Welcome!", "8/10"]),
        RunContext::in_memory(),
    );
    let mut session = fixture.session.with_observer(move |event| {
        if let GroupChatEvent::Turn { message, .. } = event {
            sink.lock().unwrap().push(format!("[{}]: {}", message.speaker, message.content));
        }
    });

    session.run("Greeting", 10).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "[Customer]: Hi there.".to_string(),
            "[Staff]: Welcome!".to_string(),
            "[Customer]: Great. DONE".to_string(),
        ]
    );
}
