//! Event delivery: a synchronous handler bus fronted by a buffer that can
//! hold events back and coalesce them while a unit of work completes.

use crate::types::events::{Event, EventHandler};
use log::trace;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .push(handler);
    }

    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("handler lock poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self.handlers.read().expect("handler lock poisoned").iter() {
            handler.handle_event(event);
        }
    }
}

#[derive(Default)]
struct BufferState {
    /// Nesting depth of open buffer scopes; events queue while > 0.
    depth: u32,
    queue: Vec<Event>,
}

/// Buffering front of the bus.
///
/// While at least one buffer scope is open, emitted events queue in
/// insertion order, with per-channel coalescing applied on insert. When
/// the outermost scope closes, the queue drains as one contiguous batch.
/// Nothing is ever dropped.
pub struct EventBuffer {
    bus: EventBus,
    state: Mutex<BufferState>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.bus.add_handler(handler);
    }

    pub fn is_buffering(&self) -> bool {
        self.state.lock().expect("buffer lock poisoned").depth > 0
    }

    /// Opens a buffer scope. Every call must be paired with `flush`.
    pub fn buffer(&self) {
        let mut state = self.state.lock().expect("buffer lock poisoned");
        state.depth += 1;
        trace!(target: "Events", "buffer scope opened (depth {})", state.depth);
    }

    /// Closes one buffer scope; the outermost close drains the queue.
    pub fn flush(&self) {
        let drained = {
            let mut state = self.state.lock().expect("buffer lock poisoned");
            if state.depth > 0 {
                state.depth -= 1;
            }
            if state.depth == 0 && !state.queue.is_empty() {
                std::mem::take(&mut state.queue)
            } else {
                Vec::new()
            }
        };

        if !drained.is_empty() {
            trace!(target: "Events", "flushing {} buffered events", drained.len());
        }
        for event in &drained {
            self.bus.dispatch(event);
        }
    }

    pub fn emit(&self, event: Event) {
        {
            let mut state = self.state.lock().expect("buffer lock poisoned");
            if state.depth > 0 {
                coalesce_push(&mut state.queue, event);
                return;
            }
        }
        self.bus.dispatch(&event);
    }

    /// Runs a future with buffering active, flushing atomically when it
    /// completes. The async equivalent of wrapping a function so its
    /// emissions land as one batch.
    pub async fn buffered_scope<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        self.buffer();
        let out = fut.await;
        self.flush();
        out
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Coalescing table. Rules are associative and commutative only within
/// one channel; cross-channel order is untouched because merged events
/// keep their original queue position.
fn coalesce_push(queue: &mut Vec<Event>, event: Event) {
    match event {
        Event::CredsUpdate(update) => {
            for existing in queue.iter_mut().rev() {
                if let Event::CredsUpdate(prev) = existing {
                    prev.merge(update);
                    return;
                }
            }
            queue.push(Event::CredsUpdate(update));
        }
        Event::MessagesUpsert(upsert) => {
            for existing in queue.iter_mut().rev() {
                if let Event::MessagesUpsert(prev) = existing {
                    if prev.kind == upsert.kind {
                        prev.messages.extend(upsert.messages);
                        return;
                    }
                    // A different kind ends the run; keep wire order.
                    break;
                }
            }
            queue.push(Event::MessagesUpsert(upsert));
        }
        Event::ContactsUpdate(update) => {
            for existing in queue.iter_mut() {
                if let Event::ContactsUpdate(prev) = existing {
                    if prev.id == update.id {
                        prev.merge(update);
                        return;
                    }
                }
            }
            queue.push(Event::ContactsUpdate(update));
        }
        Event::ChatsUpdate(update) => {
            for existing in queue.iter_mut() {
                if let Event::ChatsUpdate(prev) = existing {
                    if prev.id == update.id {
                        prev.merge(update);
                        return;
                    }
                }
            }
            queue.push(Event::ChatsUpdate(update));
        }
        other => queue.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::events::{ChatUpdate, ContactUpdate, CredsUpdate, MessagesUpsert};
    use crate::types::jid::Jid;
    use crate::types::message::{MessageInfo, UpsertType};
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        seen: StdMutex<Vec<String>>,
    }

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &Event) {
            self.seen.lock().unwrap().push(event.channel().to_string());
        }
    }

    fn recorder(buffer: &EventBuffer) -> Arc<Recorder> {
        let rec = Arc::new(Recorder {
            seen: StdMutex::new(Vec::new()),
        });
        buffer.add_handler(rec.clone());
        rec
    }

    fn upsert(n: usize) -> Event {
        Event::MessagesUpsert(MessagesUpsert {
            messages: vec![MessageInfo::default(); n],
            kind: UpsertType::Notify,
        })
    }

    #[test]
    fn unbuffered_events_dispatch_immediately() {
        let buffer = EventBuffer::new();
        let rec = recorder(&buffer);
        buffer.emit(upsert(1));
        assert_eq!(rec.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn buffered_events_wait_for_flush() {
        let buffer = EventBuffer::new();
        let rec = recorder(&buffer);

        buffer.buffer();
        buffer.emit(upsert(1));
        buffer.emit(Event::CredsUpdate(CredsUpdate::default()));
        assert!(rec.seen.lock().unwrap().is_empty());

        buffer.flush();
        assert_eq!(
            *rec.seen.lock().unwrap(),
            vec!["messages.upsert", "creds.update"]
        );
    }

    #[test]
    fn creds_updates_merge_shallowly() {
        let buffer = EventBuffer::new();
        let rec = recorder(&buffer);

        buffer.buffer();
        buffer.emit(Event::CredsUpdate(CredsUpdate {
            push_name: Some("a".into()),
            ..Default::default()
        }));
        buffer.emit(Event::CredsUpdate(CredsUpdate {
            account_sync_counter: Some(3),
            ..Default::default()
        }));
        buffer.flush();

        // Coalesced to one event.
        assert_eq!(*rec.seen.lock().unwrap(), vec!["creds.update"]);
    }

    #[test]
    fn upserts_concatenate_only_within_same_kind() {
        let buffer = EventBuffer::new();
        let rec = recorder(&buffer);

        buffer.buffer();
        buffer.emit(upsert(1));
        buffer.emit(upsert(2));
        buffer.emit(Event::MessagesUpsert(MessagesUpsert {
            messages: vec![MessageInfo::default()],
            kind: UpsertType::Append,
        }));
        buffer.flush();

        assert_eq!(
            *rec.seen.lock().unwrap(),
            vec!["messages.upsert", "messages.upsert"]
        );
    }

    #[test]
    fn contact_and_chat_updates_merge_by_id() {
        let buffer = EventBuffer::new();
        let rec = recorder(&buffer);
        let jid: Jid = "1@s.whatsapp.net".parse().unwrap();

        buffer.buffer();
        buffer.emit(Event::ContactsUpdate(ContactUpdate {
            id: jid.clone(),
            push_name: Some("x".into()),
            ..Default::default()
        }));
        buffer.emit(Event::ContactsUpdate(ContactUpdate {
            id: jid.clone(),
            full_name: Some("y".into()),
            ..Default::default()
        }));
        buffer.emit(Event::ChatsUpdate(ChatUpdate {
            id: jid.clone(),
            archived: Some(true),
            ..Default::default()
        }));
        buffer.emit(Event::ChatsUpdate(ChatUpdate {
            id: "2@s.whatsapp.net".parse().unwrap(),
            archived: Some(false),
            ..Default::default()
        }));
        buffer.flush();

        assert_eq!(
            *rec.seen.lock().unwrap(),
            vec!["contacts.update", "chats.update", "chats.update"]
        );
    }

    #[tokio::test]
    async fn buffered_scope_flushes_on_completion() {
        let buffer = EventBuffer::new();
        let rec = recorder(&buffer);

        buffer
            .buffered_scope(async {
                buffer.emit(upsert(1));
                buffer.emit(upsert(1));
                assert!(rec.seen.lock().unwrap().is_empty());
            })
            .await;

        assert_eq!(*rec.seen.lock().unwrap(), vec!["messages.upsert"]);
    }

    #[tokio::test]
    async fn nested_scopes_flush_once_at_outermost() {
        let buffer = EventBuffer::new();
        let rec = recorder(&buffer);

        buffer
            .buffered_scope(async {
                buffer.emit(upsert(1));
                buffer
                    .buffered_scope(async {
                        buffer.emit(Event::CredsUpdate(CredsUpdate::default()));
                    })
                    .await;
                // Inner scope closed but the outer one still holds.
                assert!(rec.seen.lock().unwrap().is_empty());
            })
            .await;

        assert_eq!(
            *rec.seen.lock().unwrap(),
            vec!["messages.upsert", "creds.update"]
        );
    }
}
