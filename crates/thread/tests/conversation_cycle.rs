use std::sync::Arc;
use std::time::Duration;

use sigma_llm::{Role as ProviderRole, Script, ScriptEnding, ScriptedProvider, StreamFault};
use sigma_thread::{
    AssistantStatus, ChatOptions, ConversationController, CycleFault, CycleOutcome, CyclePhase,
    MessageId, PromptShortcut, Role, SubmitError,
};

const FAILURE_TEXT: &str = "Sorry, something went wrong. Please try again later.";

fn controller(provider: &ScriptedProvider) -> ConversationController {
    let options = ChatOptions::default()
        .with_model("scripted-model")
        .with_system_instruction("Format formulas with $...$ and $$...$$.")
        .with_failure_message(FAILURE_TEXT);
    ConversationController::new(Arc::new(provider.clone()), options)
}

fn texts(controller: &ConversationController) -> Vec<(Role, String)> {
    controller
        .thread()
        .messages
        .iter()
        .map(|message| (message.role(), message.text().to_string()))
        .collect()
}

fn assert_linear(controller: &ConversationController) {
    let thread = controller.thread();
    let mut expected_parent = MessageId::ROOT;
    for message in thread.messages.iter() {
        assert_eq!(message.parent_id(), expected_parent);
        assert_eq!(Some(message.conversation_id()), thread.conversation_id);
        expected_parent = message.id();
    }
    assert_eq!(thread.last_message_id, thread.last().map(|message| message.id()));
}

#[tokio::test]
async fn first_submission_appends_user_and_pending_placeholder_then_completes() {
    let provider = ScriptedProvider::new([Script::completing(["4"])]);
    let mut controller = controller(&provider);

    let cycle = controller.begin("2+2=?").expect("idle controller accepts input");
    assert_eq!(controller.phase(), CyclePhase::Streaming);
    assert_eq!(
        texts(&controller),
        vec![
            (Role::User, "2+2=?".to_string()),
            (Role::Assistant, String::new())
        ]
    );
    assert!(controller.thread().is_pending());

    let report = controller.finish(cycle).await;

    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.fault, None);
    assert_eq!(controller.phase(), CyclePhase::Idle);
    assert!(!controller.thread().is_pending());
    assert_eq!(
        texts(&controller),
        vec![
            (Role::User, "2+2=?".to_string()),
            (Role::Assistant, "4".to_string())
        ]
    );
    assert_eq!(
        controller.thread().last_message_id,
        Some(report.assistant_message_id)
    );
    assert_linear(&controller);
}

#[tokio::test]
async fn mid_stream_fault_substitutes_failure_text_and_advances_tail() {
    let provider = ScriptedProvider::new([Script::completing(["The ans"])
        .ending(ScriptEnding::Fault(StreamFault::transport("connection reset")))]);
    let mut controller = controller(&provider);

    let report = controller
        .submit("What is a random variable?")
        .await
        .expect("submission accepted");

    assert_eq!(report.outcome, CycleOutcome::Failed);
    assert!(matches!(report.fault, Some(CycleFault::Transport { .. })));
    assert_eq!(report.fragments_applied, 1);

    let thread = controller.thread();
    let reply = thread
        .message(report.assistant_message_id)
        .expect("reply stays in thread");
    assert_eq!(reply.text(), FAILURE_TEXT);
    assert_eq!(reply.assistant_status(), Some(AssistantStatus::Failed));
    assert_eq!(thread.last_message_id, Some(report.assistant_message_id));
    assert!(!thread.is_pending());
    assert_eq!(controller.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn submission_while_pending_is_rejected_and_clears_input() {
    let provider = ScriptedProvider::new([Script::completing(["ok"])]);
    let mut controller = controller(&provider);

    let cycle = controller.begin("first").expect("idle controller accepts input");
    let revision = controller.thread().revision;

    controller.set_input("second");
    let rejected = controller.submit_input().await;

    assert!(matches!(
        rejected,
        Err(SubmitError::ConcurrentSubmission {
            phase: CyclePhase::Streaming,
            ..
        })
    ));
    assert!(rejected.as_ref().err().is_some_and(SubmitError::is_silent));
    assert_eq!(controller.input(), "");
    assert_eq!(controller.thread().len(), 2);
    assert_eq!(controller.thread().revision, revision);
    assert_eq!(controller.phase(), CyclePhase::Streaming);
    assert_eq!(provider.requests().len(), 1);

    let report = controller.finish(cycle).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
}

#[tokio::test]
async fn blank_input_is_rejected_without_a_request() {
    let provider = ScriptedProvider::default();
    let mut controller = controller(&provider);

    controller.set_input("   \n\t ");
    let result = controller.submit_input().await;

    assert!(matches!(result, Err(SubmitError::EmptyInput { .. })));
    assert!(controller.thread().is_empty());
    assert!(provider.requests().is_empty());
    assert_eq!(controller.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn every_cycle_adds_two_linked_messages_in_one_conversation() {
    let provider = ScriptedProvider::new([
        Script::completing(["Hel", "lo, ", "world"]),
        Script::completing(["partial"]).ending(ScriptEnding::Disconnect),
        Script::completing(["", "again"]),
    ]);
    let mut controller = controller(&provider);

    let first = controller.submit("hi").await.expect("accepted");
    assert_eq!(controller.thread().len(), 2);
    let second = controller.submit("and?").await.expect("accepted");
    assert_eq!(controller.thread().len(), 4);
    let third = controller.submit("once more").await.expect("accepted");
    assert_eq!(controller.thread().len(), 6);

    assert_eq!(first.outcome, CycleOutcome::Completed);
    assert_eq!(second.outcome, CycleOutcome::Failed);
    assert!(matches!(second.fault, Some(CycleFault::Transport { .. })));
    assert_eq!(third.outcome, CycleOutcome::Completed);
    assert_eq!(third.fragments_applied, 1);

    assert_eq!(first.conversation_id, second.conversation_id);
    assert_eq!(second.conversation_id, third.conversation_id);
    assert_linear(&controller);

    assert_eq!(
        texts(&controller)
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>(),
        vec!["hi", "Hello, world", "and?", FAILURE_TEXT, "once more", "again"]
    );
}

#[tokio::test]
async fn prompt_context_is_system_then_history_then_new_text() {
    let provider = ScriptedProvider::new([
        Script::completing(["4"]),
        Script::completing(["6"]),
    ]);
    let mut controller = controller(&provider);

    controller.submit("2+2=?").await.expect("accepted");
    controller.submit("3+3=?").await.expect("accepted");

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);

    let first = requests[0]
        .messages
        .iter()
        .map(|message| (message.role, message.content.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        first,
        vec![
            (
                ProviderRole::System,
                "Format formulas with $...$ and $$...$$."
            ),
            (ProviderRole::User, "2+2=?"),
        ]
    );

    let second = requests[1]
        .messages
        .iter()
        .map(|message| (message.role, message.content.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        second,
        vec![
            (
                ProviderRole::System,
                "Format formulas with $...$ and $$...$$."
            ),
            (ProviderRole::User, "2+2=?"),
            (ProviderRole::Assistant, "4"),
            (ProviderRole::User, "3+3=?"),
        ]
    );
    assert_eq!(requests[1].model_id, "scripted-model");
}

#[tokio::test]
async fn rejected_request_fails_cycle_and_leaves_controller_usable() {
    let provider = ScriptedProvider::new([
        Script::completing(Vec::<String>::new())
            .ending(ScriptEnding::RejectOpen("status 500".to_string())),
        Script::completing(["recovered"]),
    ]);
    let mut controller = controller(&provider);

    let cycle = controller.begin("first").expect("accepted");
    assert_eq!(controller.phase(), CyclePhase::Submitted);
    assert_eq!(controller.thread().len(), 2);

    let failed = controller.finish(cycle).await;
    assert_eq!(failed.outcome, CycleOutcome::Failed);
    assert!(matches!(failed.fault, Some(CycleFault::Transport { .. })));
    assert_eq!(
        controller.thread().last_message_id,
        Some(failed.assistant_message_id)
    );

    let recovered = controller.submit("second").await.expect("accepted");
    assert_eq!(recovered.outcome, CycleOutcome::Completed);
    assert_linear(&controller);
}

#[tokio::test]
async fn decoding_fault_is_handled_like_transport_fault() {
    let provider = ScriptedProvider::new([Script::completing(["$$x"])
        .ending(ScriptEnding::Fault(StreamFault::decoding("invalid utf-8 chunk")))]);
    let mut controller = controller(&provider);

    let report = controller.submit("x?").await.expect("accepted");

    assert_eq!(report.outcome, CycleOutcome::Failed);
    assert!(matches!(report.fault, Some(CycleFault::Decoding { .. })));
    let reply = controller
        .thread()
        .message(report.assistant_message_id)
        .expect("reply present");
    assert_eq!(reply.text(), FAILURE_TEXT);
}

#[tokio::test]
async fn cancelling_mid_stream_fails_the_cycle() {
    let provider = ScriptedProvider::new([
        Script::completing(["partial"]).ending(ScriptEnding::Stall)
    ]);
    let mut controller = controller(&provider);
    let mut snapshots = controller.subscribe();

    let mut cycle = controller.begin("long question").expect("accepted");
    let canceller = cycle.canceller().expect("first call yields a canceller");
    assert!(cycle.canceller().is_none());
    let assistant_message_id = cycle.assistant_message_id();

    let cancel_once_partial = async move {
        snapshots
            .wait_for(|snapshot| {
                snapshot
                    .message(assistant_message_id)
                    .is_some_and(|message| message.text() == "partial")
            })
            .await
            .expect("store alive");
        assert!(canceller.cancel());
    };

    let (report, ()) = tokio::join!(controller.finish(cycle), cancel_once_partial);

    assert_eq!(report.outcome, CycleOutcome::Failed);
    assert!(matches!(report.fault, Some(CycleFault::Cancelled { .. })));
    assert_eq!(controller.phase(), CyclePhase::Idle);
    let reply = controller
        .thread()
        .message(assistant_message_id)
        .expect("reply present");
    assert_eq!(reply.text(), FAILURE_TEXT);
}

#[tokio::test]
async fn shortcut_submits_its_composed_text() {
    let provider = ScriptedProvider::new([Script::completing(["P(A) = |A| / |Ω|"])]);
    let mut controller = controller(&provider);
    let shortcut = PromptShortcut::new("Xác suất cơ bản", "Công thức là gì?");

    let report = controller
        .submit_shortcut(&shortcut)
        .await
        .expect("accepted");

    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(controller.input(), "");
    assert_eq!(
        texts(&controller)[0],
        (Role::User, "Xác suất cơ bản: Công thức là gì?".to_string())
    );
}

#[tokio::test]
async fn timed_out_cycle_is_failed_before_the_next_submission() {
    let provider = ScriptedProvider::new([
        Script::completing(["partial"]).ending(ScriptEnding::Stall),
        Script::completing(["next answer"]),
    ]);
    let mut controller = controller(&provider);

    let timed_out = tokio::time::timeout(Duration::from_millis(50), controller.submit("q")).await;
    assert!(timed_out.is_err());
    assert_eq!(controller.phase(), CyclePhase::Streaming);

    let report = controller
        .submit("next")
        .await
        .expect("a dropped cycle does not block later submissions");

    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(controller.phase(), CyclePhase::Idle);
    assert!(!controller.thread().is_pending());
    assert_eq!(
        texts(&controller)
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>(),
        vec!["q", FAILURE_TEXT, "next", "next answer"]
    );
    assert_eq!(
        controller.thread().messages[1].assistant_status(),
        Some(AssistantStatus::Failed)
    );
    assert_linear(&controller);
}

#[tokio::test]
async fn dropped_pending_cycle_is_recovered_explicitly() {
    let provider = ScriptedProvider::new([Script::completing(["never read"])]);
    let mut controller = controller(&provider);

    let cycle = controller.begin("q").expect("accepted");
    let assistant_message_id = cycle.assistant_message_id();
    assert!(!controller.recover_abandoned());

    drop(cycle);
    assert!(controller.recover_abandoned());
    assert!(!controller.recover_abandoned());

    assert_eq!(controller.phase(), CyclePhase::Idle);
    let reply = controller
        .thread()
        .message(assistant_message_id)
        .expect("reply present");
    assert_eq!(reply.text(), FAILURE_TEXT);
    assert!(!controller.thread().is_pending());
}

#[tokio::test]
async fn blank_model_falls_back_to_the_provider_default() {
    let provider = ScriptedProvider::new([Script::completing(["ok"])]);
    let options = ChatOptions::default().with_model("  ");
    let mut controller = ConversationController::new(Arc::new(provider.clone()), options);

    controller.submit("hi").await.expect("accepted");

    assert_eq!(provider.requests()[0].model_id, "scripted-model");
}
