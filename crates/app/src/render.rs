use std::collections::HashSet;
use std::io::{self, Write};

use sigma_thread::{AssistantStatus, Message, MessageId, ThreadSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const ASSISTANT_PREFIX: &str = "sigma> ";

/// Writes assistant replies incrementally as snapshots arrive.
///
/// User turns are echoed by the terminal itself, so only assistant text is printed.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    cursor: Option<ReplyCursor>,
    settled: HashSet<MessageId>,
}

#[derive(Debug, Clone, Copy)]
struct ReplyCursor {
    message_id: MessageId,
    printed: usize,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render<W: Write>(&mut self, snapshot: &ThreadSnapshot, out: &mut W) -> io::Result<()> {
        for message in snapshot.messages.iter() {
            let Message::Assistant(reply) = message.as_ref() else {
                continue;
            };
            if self.settled.contains(&reply.id) {
                continue;
            }

            let printed = match self.cursor {
                Some(cursor) if cursor.message_id == reply.id => cursor.printed,
                _ => {
                    out.write_all(ASSISTANT_PREFIX.as_bytes())?;
                    0
                }
            };

            match reply.status {
                AssistantStatus::Streaming => {
                    let printed = printed + write_suffix(out, &reply.text, printed)?;
                    self.cursor = Some(ReplyCursor {
                        message_id: reply.id,
                        printed,
                    });
                }
                AssistantStatus::Completed => {
                    write_suffix(out, &reply.text, printed)?;
                    writeln!(out)?;
                    self.settle(reply.id);
                }
                AssistantStatus::Failed => {
                    // Partial output stays on screen; the failure text goes on its own line.
                    if printed > 0 {
                        writeln!(out)?;
                    }
                    writeln!(out, "{}", reply.text)?;
                    self.settle(reply.id);
                }
            }
        }

        out.flush()
    }

    fn settle(&mut self, message_id: MessageId) {
        self.settled.insert(message_id);
        self.cursor = None;
    }
}

fn write_suffix<W: Write>(out: &mut W, text: &str, printed: usize) -> io::Result<usize> {
    match text.get(printed..) {
        Some(suffix) if !suffix.is_empty() => {
            out.write_all(suffix.as_bytes())?;
            Ok(suffix.len())
        }
        _ => Ok(0),
    }
}

/// Background task printing every published snapshot to stdout.
pub struct RendererHandle {
    rendered: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl RendererHandle {
    /// Waits until the snapshot with `revision` (or a later one) has been printed.
    pub async fn caught_up(&mut self, revision: u64) {
        if self
            .rendered
            .wait_for(|rendered| *rendered >= revision)
            .await
            .is_err()
        {
            tracing::debug!(revision, "renderer stopped before catching up");
        }
    }
}

impl Drop for RendererHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn spawn_renderer(mut snapshots: watch::Receiver<ThreadSnapshot>) -> RendererHandle {
    let initial = snapshots.borrow().revision;
    let (rendered_tx, rendered) = watch::channel(initial);

    let task = tokio::spawn(async move {
        let mut printer = TranscriptPrinter::new();
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            let mut stdout = io::stdout().lock();
            if let Err(error) = printer.render(&snapshot, &mut stdout) {
                tracing::warn!(error = %error, "failed to write reply to the terminal");
                break;
            }
            rendered_tx.send_replace(snapshot.revision);
        }
    });

    RendererHandle { rendered, task }
}

#[cfg(test)]
mod tests {
    use sigma_thread::{ConversationId, MessageStore};

    use super::*;

    struct Fixture {
        store: MessageStore,
        conversation_id: ConversationId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MessageStore::new(),
                conversation_id: ConversationId::new_v7(),
            }
        }

        fn ask(&mut self, text: &str) -> MessageId {
            let user_id = MessageId::new_v7();
            let parent = self.store.thread().next_parent_id();
            self.store
                .append(Message::user(user_id, parent, self.conversation_id, text))
                .expect("user message appends");

            let reply_id = MessageId::new_v7();
            self.store
                .append(Message::assistant_placeholder(
                    reply_id,
                    user_id,
                    self.conversation_id,
                ))
                .expect("placeholder appends");
            reply_id
        }
    }

    fn render(printer: &mut TranscriptPrinter, store: &MessageStore, out: &mut Vec<u8>) {
        printer
            .render(store.thread(), out)
            .expect("rendering into memory succeeds");
    }

    #[test]
    fn streaming_reply_prints_only_new_text() {
        let mut fixture = Fixture::new();
        let mut printer = TranscriptPrinter::new();
        let mut out = Vec::new();

        let reply = fixture.ask("2+2=?");
        render(&mut printer, &fixture.store, &mut out);
        fixture.store.update_text(reply, "The answer");
        render(&mut printer, &fixture.store, &mut out);
        render(&mut printer, &fixture.store, &mut out);
        fixture.store.update_text(reply, "The answer is $4$.");
        fixture.store.complete_pending(reply);
        render(&mut printer, &fixture.store, &mut out);
        render(&mut printer, &fixture.store, &mut out);

        assert_eq!(
            String::from_utf8(out).expect("utf-8 output"),
            "sigma> The answer is $4$.\n"
        );
    }

    #[test]
    fn failed_reply_prints_failure_text_after_partial_output() {
        let mut fixture = Fixture::new();
        let mut printer = TranscriptPrinter::new();
        let mut out = Vec::new();

        let reply = fixture.ask("x?");
        fixture.store.update_text(reply, "Par");
        render(&mut printer, &fixture.store, &mut out);
        fixture.store.fail_pending(reply, "Something went wrong.");
        render(&mut printer, &fixture.store, &mut out);

        assert_eq!(
            String::from_utf8(out).expect("utf-8 output"),
            "sigma> Par\nSomething went wrong.\n"
        );
    }

    #[test]
    fn skipped_snapshots_still_print_each_reply_once() {
        let mut fixture = Fixture::new();
        let mut printer = TranscriptPrinter::new();
        let mut out = Vec::new();

        let first = fixture.ask("one");
        fixture.store.update_text(first, "1");
        fixture.store.complete_pending(first);
        let second = fixture.ask("two");
        fixture.store.fail_pending(second, "failed");
        render(&mut printer, &fixture.store, &mut out);
        render(&mut printer, &fixture.store, &mut out);

        assert_eq!(
            String::from_utf8(out).expect("utf-8 output"),
            "sigma> 1\nsigma> failed\n"
        );
    }

    #[tokio::test]
    async fn renderer_reports_rendered_revision() {
        let mut fixture = Fixture::new();
        let mut renderer = spawn_renderer(fixture.store.subscribe());

        let reply = fixture.ask("ping");
        fixture.store.update_text(reply, "pong");
        fixture.store.complete_pending(reply);
        let revision = fixture.store.thread().revision;

        tokio::time::timeout(std::time::Duration::from_secs(5), renderer.caught_up(revision))
            .await
            .expect("renderer catches up");
    }
}
