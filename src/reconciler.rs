//! Thread and custom-field reconciliation.
//!
//! The reconciler owns all chat domain state: threads with their messages,
//! customer custom field values and the field definitions of the channel.
//! Updates arrive from several places (pushed events, postbacks answering
//! our own requests, local edits) in no guaranteed order, so every custom
//! field write goes through [`merge`], which keeps the later `updated_at` per
//! identifier at second granularity.
//!
//! Each operation holds the state mutex end to end and never across an
//! `.await`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{ChatError, DecodeError, DomainError};
use crate::events::{EventHub, Subscription};
use crate::logging::Logger;
use crate::protocol::event::{
    AssigneeChangedEvent, CaseStatusChangedEvent, ContactCustomFieldsSetEvent,
    MoreMessagesLoadedEvent, ThreadRecoveredEvent,
};
use crate::protocol::message::ContactStatus;
use crate::protocol::{
    Agent, Command, CustomFieldDefinition, CustomFieldRecord, CustomFieldValue, Event,
    EventPayload, LowercaseUuid, Message, ThreadInfo, TypedEvent,
};
use crate::transport::CommandSink;

/// Merge `incoming` records into `existing`.
///
/// Records sharing an identifier are the same logical field; the one with the
/// later `updated_at` (compared in whole seconds) survives and ties keep the
/// incoming record. Unknown identifiers are appended in order. Applying the
/// same `incoming` twice changes nothing the second time.
#[must_use]
pub fn merge<T, I>(mut existing: Vec<T>, incoming: I) -> Vec<T>
where
    T: CustomFieldRecord,
    I: IntoIterator<Item = T>,
{
    for record in incoming {
        match existing.iter_mut().find(|e| e.ident() == record.ident()) {
            Some(current) => {
                if record.updated_at().timestamp() >= current.updated_at().timestamp() {
                    *current = record;
                }
            }
            None => existing.push(record),
        }
    }
    existing
}

/// A conversation thread as the client sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatThread {
    /// Thread id.
    pub id: LowercaseUuid,
    /// Display name.
    pub name: Option<String>,
    /// Messages, oldest first.
    pub messages: Vec<Message>,
    /// Agent currently handling the thread.
    pub assigned_agent: Option<Agent>,
    /// Whether new messages may be sent.
    pub can_add_more_messages: bool,
    /// Opaque paging token; empty once everything is loaded.
    pub scroll_token: String,
    /// Contact (case) currently attached.
    pub contact_id: Option<String>,
    /// Contact custom field values.
    pub contact_fields: Vec<CustomFieldValue>,
}

impl ChatThread {
    /// An empty thread that accepts messages.
    #[must_use]
    pub fn new(id: LowercaseUuid) -> Self {
        Self {
            id,
            name: None,
            messages: Vec::new(),
            assigned_agent: None,
            can_add_more_messages: true,
            scroll_token: String::new(),
            contact_id: None,
            contact_fields: Vec::new(),
        }
    }

    /// Whether older messages can still be loaded.
    #[must_use]
    pub fn has_more_messages(&self) -> bool {
        !self.scroll_token.is_empty()
    }

    /// Creation time of the oldest held message.
    #[must_use]
    pub fn oldest_message_created_at(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.created_at).min()
    }

    fn apply_info(&mut self, info: &ThreadInfo) {
        if info.thread_name.is_some() {
            self.name.clone_from(&info.thread_name);
        }
        self.can_add_more_messages = info.can_add_more_messages;
    }

    /// Insert or replace by id, keeping the list ordered by creation time.
    fn upsert_message(&mut self, message: Message) {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return;
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
    }

    /// Prepend an older page. Returns how many messages were new.
    fn prepend(&mut self, page: Vec<Message>, scroll_token: String) -> usize {
        let known: HashSet<LowercaseUuid> = self.messages.iter().map(|m| m.id).collect();
        let mut fresh: Vec<Message> = page.into_iter().filter(|m| !known.contains(&m.id)).collect();
        fresh.sort_by_key(|m| m.created_at);
        let added = fresh.len();
        fresh.append(&mut self.messages);
        self.messages = fresh;
        self.scroll_token = scroll_token;
        added
    }
}

#[derive(Debug, Default)]
struct ChatState {
    threads: Vec<ChatThread>,
    customer_fields: Vec<CustomFieldValue>,
    customer_definitions: Vec<CustomFieldDefinition>,
    contact_definitions: Vec<CustomFieldDefinition>,
}

impl ChatState {
    fn thread_mut(&mut self, id: LowercaseUuid) -> Option<&mut ChatThread> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    fn thread_or_insert(&mut self, id: LowercaseUuid) -> &mut ChatThread {
        let index = match self.threads.iter().position(|t| t.id == id) {
            Some(index) => index,
            None => {
                self.threads.push(ChatThread::new(id));
                self.threads.len() - 1
            }
        };
        &mut self.threads[index]
    }

    fn thread_for_contact(&mut self, contact_id: &str) -> Option<&mut ChatThread> {
        self.threads
            .iter_mut()
            .find(|t| t.contact_id.as_deref() == Some(contact_id))
    }
}

/// Owner of thread, message and custom field state.
#[derive(Debug)]
pub struct Reconciler {
    state: Mutex<ChatState>,
    logger: Logger,
}

impl Reconciler {
    /// Empty state.
    #[must_use]
    pub fn new(logger: Logger) -> Self {
        Self {
            state: Mutex::new(ChatState::default()),
            logger,
        }
    }

    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Feed every event from `hub` into `reconciler`.
    pub fn attach(reconciler: &Arc<Self>, hub: &EventHub) -> Subscription {
        let reconciler = Arc::clone(reconciler);
        hub.subscribe_all(move |event| reconciler.apply(event))
    }

    /// Snapshot of all threads.
    #[must_use]
    pub fn threads(&self) -> Vec<ChatThread> {
        self.state().threads.clone()
    }

    /// Snapshot of one thread.
    #[must_use]
    pub fn thread(&self, id: LowercaseUuid) -> Option<ChatThread> {
        self.state().threads.iter().find(|t| t.id == id).cloned()
    }

    /// Register a thread created locally. Existing threads are left alone.
    pub fn insert_thread(&self, thread: ChatThread) {
        let mut state = self.state();
        if state.threads.iter().all(|t| t.id != thread.id) {
            state.threads.push(thread);
        }
    }

    /// Current customer custom field values.
    #[must_use]
    pub fn customer_fields(&self) -> Vec<CustomFieldValue> {
        self.state().customer_fields.clone()
    }

    /// Customer field definitions known for the channel.
    #[must_use]
    pub fn customer_definitions(&self) -> Vec<CustomFieldDefinition> {
        self.state().customer_definitions.clone()
    }

    /// Contact field definitions known for the channel.
    #[must_use]
    pub fn contact_definitions(&self) -> Vec<CustomFieldDefinition> {
        self.state().contact_definitions.clone()
    }

    /// Merge field definitions from a channel configuration fetch.
    pub fn merge_definitions(
        &self,
        customer: Vec<CustomFieldDefinition>,
        contact: Vec<CustomFieldDefinition>,
    ) {
        let mut state = self.state();
        state.customer_definitions = merge(std::mem::take(&mut state.customer_definitions), customer);
        state.contact_definitions = merge(std::mem::take(&mut state.contact_definitions), contact);
    }

    /// Fail unless `thread_id` is known and still accepts messages.
    pub fn ensure_accepts_messages(&self, thread_id: LowercaseUuid) -> Result<(), DomainError> {
        let state = self.state();
        let thread = state
            .threads
            .iter()
            .find(|t| t.id == thread_id)
            .ok_or(DomainError::InvalidThread(thread_id.uuid()))?;
        if thread.can_add_more_messages {
            Ok(())
        } else {
            Err(DomainError::ThreadClosed(thread_id.uuid()))
        }
    }

    /// Apply an inbound or local event to the state.
    pub fn apply(&self, event: &Event) {
        let mut state = self.state();
        match &event.payload {
            EventPayload::MessageCreated(e) => {
                let thread = state.thread_or_insert(e.thread.id);
                thread.apply_info(&e.thread);
                if let Some(contact) = &e.contact {
                    thread.contact_id = Some(contact.id.clone());
                }
                thread.upsert_message(e.message.clone());
            }
            EventPayload::MessageReadChanged(e) => {
                if let Some(thread) = state.thread_mut(e.message.thread_id) {
                    thread.upsert_message(e.message.clone());
                }
            }
            EventPayload::ThreadRecovered(e) => Self::apply_recovered(&mut state, e),
            EventPayload::ThreadListFetched(e) => {
                for info in &e.threads {
                    state.thread_or_insert(info.id).apply_info(info);
                }
            }
            EventPayload::MoreMessagesLoaded(e) => self.apply_more_messages(&mut state, e),
            EventPayload::ThreadUpdated(e) => {
                if let Some(thread) = state.thread_mut(e.thread.id) {
                    thread.apply_info(&e.thread);
                }
            }
            EventPayload::ThreadArchived(e) => {
                if let Some(thread) = state.thread_mut(e.thread.id) {
                    thread.can_add_more_messages = false;
                }
            }
            EventPayload::AssigneeChanged(e) => self.apply_assignee(&mut state, e),
            EventPayload::CaseStatusChanged(e) => self.apply_case_status(&mut state, e),
            EventPayload::ContactCustomFieldsSet(e) => self.apply_contact_fields(&mut state, e),
            _ => {}
        }
    }

    fn apply_recovered(state: &mut ChatState, e: &ThreadRecoveredEvent) {
        let thread = state.thread_or_insert(e.thread.id);
        thread.apply_info(&e.thread);
        for message in &e.messages {
            thread.upsert_message(message.clone());
        }
        thread.scroll_token.clone_from(&e.scroll_token);
        if e.inbox_assignee.is_some() {
            thread.assigned_agent.clone_from(&e.inbox_assignee);
        }
        if let Some(contact) = &e.contact {
            thread.contact_id = Some(contact.id.clone());
            thread.contact_fields = merge(
                std::mem::take(&mut thread.contact_fields),
                contact.custom_fields.iter().cloned(),
            );
            if contact.status == ContactStatus::Closed {
                thread.can_add_more_messages = false;
            }
        }
    }

    fn apply_more_messages(&self, state: &mut ChatState, e: &MoreMessagesLoadedEvent) {
        let Some(thread_id) = e.thread_id() else {
            return;
        };
        match state.thread_mut(thread_id) {
            Some(thread) => {
                thread.prepend(e.messages.clone(), e.scroll_token.clone());
            }
            None => self.logger.debug(format_args!(
                "[Reconciler] Older messages for unknown thread {thread_id}"
            )),
        }
    }

    fn apply_assignee(&self, state: &mut ChatState, e: &AssigneeChangedEvent) {
        let thread = match e.contact.thread_id {
            Some(id) => state.thread_mut(id),
            None => state.thread_for_contact(&e.contact.id),
        };
        match thread {
            Some(thread) => {
                thread.contact_id = Some(e.contact.id.clone());
                thread.assigned_agent.clone_from(&e.inbox_assignee);
            }
            None => self.logger.debug(format_args!(
                "[Reconciler] Assignee change for unknown contact {}",
                e.contact.id
            )),
        }
    }

    fn apply_case_status(&self, state: &mut ChatState, e: &CaseStatusChangedEvent) {
        let thread = match e.contact.thread_id {
            Some(id) => state.thread_mut(id),
            None => state.thread_for_contact(&e.contact.id),
        };
        let Some(thread) = thread else {
            self.logger.debug(format_args!(
                "[Reconciler] Status change for unknown contact {}",
                e.contact.id
            ));
            return;
        };
        thread.contact_id = Some(e.contact.id.clone());
        thread.can_add_more_messages = e.contact.status != ContactStatus::Closed;
    }

    fn apply_contact_fields(&self, state: &mut ChatState, e: &ContactCustomFieldsSetEvent) {
        let thread = match (e.thread_id, e.contact_id.as_deref()) {
            (Some(id), _) => state.thread_mut(id),
            (None, Some(contact_id)) => state.thread_for_contact(contact_id),
            (None, None) => None,
        };
        let Some(thread) = thread else {
            self.logger
                .debug(format_args!("[Reconciler] Contact fields for unknown thread"));
            return;
        };
        if e.contact_id.is_some() {
            thread.contact_id.clone_from(&e.contact_id);
        }
        thread.contact_fields = merge(
            std::mem::take(&mut thread.contact_fields),
            e.custom_fields.iter().cloned(),
        );
    }

    /// Load the page of messages older than what `thread_id` holds.
    ///
    /// Returns how many messages were added.
    pub async fn load_more_messages(
        &self,
        thread_id: LowercaseUuid,
        sink: &dyn CommandSink,
    ) -> Result<usize, ChatError> {
        let command = {
            let state = self.state();
            let thread = state
                .threads
                .iter()
                .find(|t| t.id == thread_id)
                .ok_or(DomainError::InvalidThread(thread_id.uuid()))?;
            if !thread.has_more_messages() {
                return Err(DomainError::NoMoreMessages.into());
            }
            Command::LoadMoreMessages {
                thread_id,
                scroll_token: thread.scroll_token.clone(),
                oldest_message_created_at: thread
                    .oldest_message_created_at()
                    .unwrap_or_else(Utc::now),
            }
        };

        let event = sink.request(command).await?;
        let Some(page) = MoreMessagesLoadedEvent::from_event(&event) else {
            return Err(DecodeError::NoMatchingShape {
                type_name: "MoreMessagesLoadedEvent",
                path: event.kind.to_string(),
            }
            .into());
        };

        let mut state = self.state();
        let thread = state
            .thread_mut(thread_id)
            .ok_or(DomainError::InvalidThread(thread_id.uuid()))?;
        let added = thread.prepend(page.messages, page.scroll_token);
        self.logger.debug(format_args!(
            "[Reconciler] Loaded {added} older message(s) for {thread_id}"
        ));
        Ok(added)
    }

    /// Set customer custom fields locally and send them.
    ///
    /// Identifiers must be defined for the channel when definitions are
    /// known.
    pub async fn set_customer_fields(
        &self,
        fields: Vec<(String, String)>,
        sink: &dyn CommandSink,
    ) -> Result<(), ChatError> {
        let values = {
            let mut state = self.state();
            let values = stamp(&state.customer_definitions, fields)?;
            state.customer_fields = merge(
                std::mem::take(&mut state.customer_fields),
                values.iter().cloned(),
            );
            values
        };
        sink.send(Command::SetCustomerCustomFields { fields: values })
            .await?;
        Ok(())
    }

    /// Set contact custom fields on `thread_id` locally and send them.
    pub async fn set_contact_fields(
        &self,
        thread_id: LowercaseUuid,
        fields: Vec<(String, String)>,
        sink: &dyn CommandSink,
    ) -> Result<(), ChatError> {
        let command = {
            let mut state = self.state();
            let values = stamp(&state.contact_definitions, fields)?;
            let thread = state
                .thread_mut(thread_id)
                .ok_or(DomainError::InvalidThread(thread_id.uuid()))?;
            let contact_id = thread
                .contact_id
                .clone()
                .ok_or(DomainError::MissingContactId(thread_id.uuid()))?;
            thread.contact_fields = merge(
                std::mem::take(&mut thread.contact_fields),
                values.iter().cloned(),
            );
            Command::SetConsumerContactCustomFields {
                thread_id,
                contact_id,
                fields: values,
            }
        };
        sink.send(command).await?;
        Ok(())
    }
}

/// Turn `(ident, value)` pairs into records stamped with the current time.
fn stamp(
    definitions: &[CustomFieldDefinition],
    fields: Vec<(String, String)>,
) -> Result<Vec<CustomFieldValue>, DomainError> {
    let now = Utc::now();
    fields
        .into_iter()
        .map(|(ident, value)| {
            if !definitions.is_empty() && definitions.iter().all(|d| d.ident != ident) {
                return Err(DomainError::UnknownCustomField(ident));
            }
            Ok(CustomFieldValue {
                ident,
                value,
                updated_at: now,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::protocol::event::{EventKind, MessageCreatedEvent};
    use crate::protocol::message::{Contact, MessageDirection, ThreadRef, UserStatistics};
    use crate::protocol::MessageContent;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn value(ident: &str, value: &str, secs: i64) -> CustomFieldValue {
        CustomFieldValue {
            ident: ident.to_string(),
            value: value.to_string(),
            updated_at: at(secs),
        }
    }

    fn message(thread: LowercaseUuid, text: &str, secs: i64) -> Message {
        Message {
            id: LowercaseUuid::new_v4(),
            thread_id: thread,
            content: MessageContent::text(text),
            created_at: at(secs),
            direction: MessageDirection::Outbound,
            user_statistics: UserStatistics::default(),
            author_agent: None,
            author_customer: None,
            attachments: Vec::new(),
        }
    }

    fn info(id: LowercaseUuid) -> ThreadInfo {
        ThreadInfo {
            id,
            thread_name: Some("Support".to_string()),
            can_add_more_messages: true,
        }
    }

    struct ScriptedSink {
        answer: Option<Event>,
        requests: AtomicUsize,
        sent: Mutex<Vec<Command>>,
    }

    impl ScriptedSink {
        fn new(answer: Option<Event>) -> Self {
            Self {
                answer,
                requests: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandSink for ScriptedSink {
        async fn send(&self, command: Command) -> Result<LowercaseUuid, ChatError> {
            self.sent.lock().unwrap().push(command);
            Ok(LowercaseUuid::new_v4())
        }

        async fn request(&self, _command: Command) -> Result<Event, ChatError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.answer
                .clone()
                .ok_or(ChatError::Transport(TransportError::Timeout))
        }
    }

    #[test]
    fn test_merge_keeps_later_and_appends_new() {
        let existing = vec![value("email", "old@example.com", 10), value("name", "Ann", 50)];
        let incoming = vec![value("email", "new@example.com", 20), value("name", "Bob", 40), value("plan", "pro", 0)];

        let merged = merge(existing, incoming);
        assert_eq!(
            merged,
            vec![value("email", "new@example.com", 20), value("name", "Ann", 50), value("plan", "pro", 0)]
        );
    }

    #[test]
    fn test_merge_tie_keeps_incoming_at_second_granularity() {
        let mut older = value("email", "a@example.com", 10);
        older.updated_at = older.updated_at + chrono::Duration::milliseconds(900);
        let merged = merge(vec![older], vec![value("email", "b@example.com", 10)]);
        assert_eq!(merged[0].value, "b@example.com");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = vec![value("email", "a@example.com", 30), value("name", "Ann", 5)];
        let b = vec![value("email", "b@example.com", 20), value("name", "Bob", 5), value("plan", "pro", 1)];

        let once = merge(a, b.clone());
        let twice = merge(once.clone(), b);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_message_created_appends_and_dedupes() {
        let reconciler = Reconciler::new(Logger::default());
        let thread_id = LowercaseUuid::new_v4();
        let first = message(thread_id, "hi", 10);
        let event = Event::local(
            EventKind::MessageCreated,
            EventPayload::MessageCreated(MessageCreatedEvent {
                thread: info(thread_id),
                message: first.clone(),
                contact: None,
            }),
        );

        reconciler.apply(&event);
        reconciler.apply(&event);

        let thread = reconciler.thread(thread_id).unwrap();
        assert_eq!(thread.messages, vec![first]);
        assert_eq!(thread.name.as_deref(), Some("Support"));
    }

    #[test]
    fn test_closed_case_stops_new_messages() {
        let reconciler = Reconciler::new(Logger::default());
        let thread_id = LowercaseUuid::new_v4();
        let mut thread = ChatThread::new(thread_id);
        thread.contact_id = Some("contact-1".to_string());
        reconciler.insert_thread(thread);
        assert!(reconciler.ensure_accepts_messages(thread_id).is_ok());

        reconciler.apply(&Event::local(
            EventKind::CaseStatusChanged,
            EventPayload::CaseStatusChanged(CaseStatusChangedEvent {
                contact: Contact {
                    id: "contact-1".to_string(),
                    thread_id: None,
                    status: ContactStatus::Closed,
                    custom_fields: Vec::new(),
                },
            }),
        ));

        assert_eq!(
            reconciler.ensure_accepts_messages(thread_id),
            Err(DomainError::ThreadClosed(thread_id.uuid()))
        );
    }

    #[test]
    fn test_archived_thread_stops_new_messages() {
        let reconciler = Reconciler::new(Logger::default());
        let thread_id = LowercaseUuid::new_v4();
        reconciler.insert_thread(ChatThread::new(thread_id));
        reconciler.apply(&Event::local(
            EventKind::ThreadArchived,
            EventPayload::ThreadArchived(crate::protocol::event::ThreadArchivedEvent {
                thread: ThreadRef { id: thread_id },
            }),
        ));
        assert!(!reconciler.thread(thread_id).unwrap().can_add_more_messages);
    }

    #[tokio::test]
    async fn test_load_more_without_scroll_token_sends_nothing() {
        let reconciler = Reconciler::new(Logger::default());
        let thread_id = LowercaseUuid::new_v4();
        reconciler.insert_thread(ChatThread::new(thread_id));
        let sink = ScriptedSink::new(None);

        let result = reconciler.load_more_messages(thread_id, &sink).await;
        assert_eq!(result, Err(ChatError::Domain(DomainError::NoMoreMessages)));
        assert_eq!(sink.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_more_prepends_and_replaces_token() {
        let reconciler = Reconciler::new(Logger::default());
        let thread_id = LowercaseUuid::new_v4();
        let newest = message(thread_id, "latest", 100);
        let mut thread = ChatThread::new(thread_id);
        thread.messages.push(newest.clone());
        thread.scroll_token = "page-2".to_string();
        reconciler.insert_thread(thread);

        let older = message(thread_id, "older", 50);
        let oldest = message(thread_id, "oldest", 10);
        let sink = ScriptedSink::new(Some(Event::local(
            EventKind::MoreMessagesLoaded,
            EventPayload::MoreMessagesLoaded(MoreMessagesLoadedEvent {
                messages: vec![older.clone(), oldest.clone(), newest.clone()],
                scroll_token: String::new(),
            }),
        )));

        let added = reconciler.load_more_messages(thread_id, &sink).await.unwrap();
        assert_eq!(added, 2);
        let thread = reconciler.thread(thread_id).unwrap();
        assert_eq!(thread.messages, vec![oldest, older, newest]);
        assert!(!thread.has_more_messages());
    }

    #[tokio::test]
    async fn test_contact_fields_need_contact_id() {
        let reconciler = Reconciler::new(Logger::default());
        let thread_id = LowercaseUuid::new_v4();
        reconciler.insert_thread(ChatThread::new(thread_id));
        let sink = ScriptedSink::new(None);

        let result = reconciler
            .set_contact_fields(thread_id, vec![("topic".into(), "billing".into())], &sink)
            .await;
        assert_eq!(
            result,
            Err(ChatError::Domain(DomainError::MissingContactId(thread_id.uuid())))
        );
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_customer_fields_merge_locally_and_send() {
        let reconciler = Reconciler::new(Logger::default());
        let sink = ScriptedSink::new(None);

        reconciler
            .set_customer_fields(vec![("email".into(), "a@example.com".into())], &sink)
            .await
            .unwrap();

        assert_eq!(reconciler.customer_fields()[0].value, "a@example.com");
        assert!(matches!(
            sink.sent.lock().unwrap().as_slice(),
            [Command::SetCustomerCustomFields { fields }] if fields.len() == 1
        ));
    }
}
