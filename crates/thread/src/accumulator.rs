use futures::{Stream, StreamExt};
use sigma_llm::{StreamEventMapped, StreamEventPayload, StreamTarget};
use tokio::sync::oneshot;

use crate::error::{CancelledSnafu, CycleFault, TransportSnafu};
use crate::ids::MessageId;
use crate::store::MessageStore;

/// Folds stream fragments into the pending assistant reply.
///
/// Each non-empty fragment is appended to a running buffer and the whole buffer is written
/// to the store, so renderers always see the full text received so far. Fragment
/// boundaries carry no meaning and may fall mid-word or mid-formula.
#[derive(Debug)]
pub struct StreamAccumulator {
    target: StreamTarget,
    pending_id: MessageId,
    text: String,
    fragments_applied: usize,
}

impl StreamAccumulator {
    pub fn new(target: StreamTarget, pending_id: MessageId) -> Self {
        Self {
            target,
            pending_id,
            text: String::new(),
            fragments_applied: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragments_applied(&self) -> usize {
        self.fragments_applied
    }

    /// Applies one fragment. Empty fragments are skipped without touching the store.
    pub fn push_fragment(&mut self, fragment: &str, store: &mut MessageStore) -> bool {
        if fragment.is_empty() {
            return false;
        }

        self.text.push_str(fragment);
        self.fragments_applied += 1;
        store.update_text(self.pending_id, self.text.clone())
    }

    /// Consumes `events` until a terminal event, the stream closing, or `cancel` firing.
    ///
    /// Returns `Ok` only on an explicit `Done`. Events addressed to another target are
    /// dropped. A dropped `cancel` sender disarms cancellation instead of triggering it.
    pub async fn drive<S>(
        &mut self,
        store: &mut MessageStore,
        mut events: S,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<(), CycleFault>
    where
        S: Stream<Item = StreamEventMapped> + Unpin,
    {
        let mut cancel_armed = true;

        loop {
            tokio::select! {
                biased;
                signal = &mut cancel, if cancel_armed => {
                    match signal {
                        Ok(()) => {
                            tracing::info!(
                                message_id = %self.pending_id,
                                fragments_applied = self.fragments_applied,
                                "stream cancelled by caller"
                            );
                            return CancelledSnafu { stage: "drive-stream" }.fail();
                        }
                        Err(_) => cancel_armed = false,
                    }
                }
                next_event = events.next() => {
                    let Some(event) = next_event else {
                        return TransportSnafu {
                            stage: "drive-stream",
                            message: "provider stream ended before a terminal event",
                        }
                        .fail();
                    };

                    if event.target != self.target {
                        tracing::debug!(
                            expected = ?self.target,
                            received = ?event.target,
                            "dropping stale stream event"
                        );
                        continue;
                    }

                    match event.payload {
                        StreamEventPayload::Delta(fragment) => {
                            self.push_fragment(&fragment, store);
                        }
                        StreamEventPayload::Done => return Ok(()),
                        StreamEventPayload::Error(fault) => {
                            return Err(CycleFault::from_stream("drive-stream", fault));
                        }
                    }
                }
            }
        }
    }
}
