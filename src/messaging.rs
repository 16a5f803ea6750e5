// Conversations between guests and hosts.
// The message store is fed by explicit fetches and by the real-time event
// stream; every message id resolves to the most recent write seen.

use crate::backend::{decode_row, decode_rows, ApiError, Backend, MessageEvent, MessageStream};
use crate::model::{tables, Conversation, Message};
use crate::query::{Filter, Query};
use crate::session::{ServiceError, Session};
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Replaced,
    // Same write delivered again
    Duplicate,
    // Older than the copy already held
    Outdated,
    UnknownConversation,
}

impl ApplyOutcome {
    pub fn changed(self) -> bool {
        matches!(self, ApplyOutcome::Inserted | ApplyOutcome::Replaced)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStore {
    conversations: Vec<Conversation>,
    version: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Bumped on every change; readers compare it to skip redundant redraws
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn replace_all(&mut self, mut conversations: Vec<Conversation>) {
        for conversation in &mut conversations {
            conversation.messages.sort_by_key(|m| m.created_at);
        }
        self.conversations = conversations;
        self.version += 1;
    }

    pub fn apply(&mut self, event: MessageEvent) -> ApplyOutcome {
        let incoming = match event {
            MessageEvent::Inserted(message) | MessageEvent::Updated(message) => message,
        };
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == incoming.conversation_id)
        else {
            return ApplyOutcome::UnknownConversation;
        };

        let messages = &mut conversation.messages;
        let outcome = match messages.iter_mut().find(|m| m.id == incoming.id) {
            Some(existing) if *existing == incoming => ApplyOutcome::Duplicate,
            Some(existing) if incoming.revision() < existing.revision() => ApplyOutcome::Outdated,
            // Equal revisions: the later arrival wins
            Some(existing) => {
                *existing = incoming;
                ApplyOutcome::Replaced
            }
            None => {
                let at = messages.partition_point(|m| m.created_at <= incoming.created_at);
                messages.insert(at, incoming);
                ApplyOutcome::Inserted
            }
        };

        if outcome.changed() {
            self.version += 1;
        }
        outcome
    }

    // Drain a stream into an owned store; returns the number of changes
    pub async fn consume(&mut self, mut events: MessageStream) -> usize {
        let mut changes = 0;
        while let Some(event) = events.next().await {
            if self.apply(event).changed() {
                changes += 1;
            }
        }
        changes
    }

    // Messages addressed to `profile_id` that it has not read yet
    pub fn unread_count(&self, profile_id: &str) -> usize {
        self.conversations
            .iter()
            .flat_map(|c| c.messages.iter())
            .filter(|m| !m.read && m.sender_id != profile_id)
            .count()
    }
}

// Drain a stream into a shared store. The lock is only taken between events.
pub async fn follow(store: Arc<RwLock<MessageStore>>, mut events: MessageStream) -> usize {
    let mut changes = 0;
    while let Some(event) = events.next().await {
        let message_id = event.message().id.clone();
        let outcome = store.write().apply(event);
        debug!(message_id = %message_id, ?outcome, "real-time message event");
        if outcome.changed() {
            changes += 1;
        }
    }
    changes
}

pub struct MessagingService {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
    store: Arc<RwLock<MessageStore>>,
}

impl MessagingService {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<Session>) -> Self {
        Self {
            backend,
            session,
            store: Arc::new(RwLock::new(MessageStore::new())),
        }
    }

    pub fn store(&self) -> Arc<RwLock<MessageStore>> {
        Arc::clone(&self.store)
    }

    // Start applying real-time events; the task ends when the feed closes
    pub fn subscribe(&self) -> JoinHandle<usize> {
        let events = self.backend.subscribe_messages();
        tokio::spawn(follow(self.store(), events))
    }

    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ServiceError> {
        let profile = self
            .session
            .require_profile(self.backend.as_ref(), "view messages")
            .await?;

        let rows = self
            .backend
            .select(
                tables::CONVERSATIONS,
                &Query::new()
                    .or(vec![
                        Filter::Eq("guest_id".to_string(), json!(profile.id)),
                        Filter::Eq("host_id".to_string(), json!(profile.id)),
                    ])
                    .order("created_at", false),
            )
            .await
            .map_err(|e| log_failure("fetch conversations", e))?;
        let mut conversations: Vec<Conversation> = decode_rows(rows)?;

        if !conversations.is_empty() {
            let ids: Vec<String> = conversations.iter().map(|c| c.id.clone()).collect();
            let rows = self
                .backend
                .select(
                    tables::MESSAGES,
                    &Query::new()
                        .in_list("conversation_id", ids)
                        .order("created_at", true),
                )
                .await
                .map_err(|e| log_failure("fetch messages", e))?;

            let mut by_conversation: HashMap<String, Vec<Message>> = HashMap::new();
            for message in decode_rows::<Message>(rows)? {
                by_conversation
                    .entry(message.conversation_id.clone())
                    .or_default()
                    .push(message);
            }
            for conversation in &mut conversations {
                conversation.messages = by_conversation
                    .remove(&conversation.id)
                    .unwrap_or_default();
            }
        }

        debug!(profile_id = %profile.id, count = conversations.len(), "conversations loaded");
        self.store.write().replace_all(conversations.clone());
        Ok(conversations)
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ServiceError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ServiceError::Validation("Message cannot be empty".to_string()));
        }
        let profile = self
            .session
            .require_profile(self.backend.as_ref(), "send messages")
            .await?;

        let row = self
            .backend
            .insert(
                tables::MESSAGES,
                json!({
                    "conversation_id": conversation_id,
                    "sender_id": profile.id,
                    "content": content,
                    "read": false,
                }),
            )
            .await
            .map_err(|e| log_failure("send message", e))?;
        let message: Message = decode_row(row)?;

        // The real-time echo of this insert is deduplicated by the store
        self.store.write().apply(MessageEvent::Inserted(message.clone()));
        info!(conversation_id, message_id = %message.id, "message sent");
        Ok(message)
    }

    pub async fn start_conversation(
        &self,
        property_id: &str,
        host_id: &str,
    ) -> Result<Conversation, ServiceError> {
        let profile = self
            .session
            .require_profile(self.backend.as_ref(), "start a conversation")
            .await?;

        let row = self
            .backend
            .insert(
                tables::CONVERSATIONS,
                json!({
                    "property_id": property_id,
                    "guest_id": profile.id,
                    "host_id": host_id,
                }),
            )
            .await
            .map_err(|e| log_failure("start conversation", e))?;
        let conversation: Conversation = decode_row(row)?;
        info!(conversation_id = %conversation.id, property_id, "conversation started");

        self.fetch_conversations().await?;
        Ok(conversation)
    }

    pub async fn mark_as_read(&self, message_id: &str) -> Result<(), ServiceError> {
        let touched = self
            .backend
            .update(
                tables::MESSAGES,
                &Query::new().eq("id", message_id),
                json!({ "read": true }),
            )
            .await
            .map_err(|e| log_failure("mark as read", e))?;
        if touched == 0 {
            return Err(ApiError::NotFound(format!("message {message_id}")).into());
        }
        Ok(())
    }
}

fn log_failure(step: &str, e: ApiError) -> ServiceError {
    error!(step, error = %e, "messaging call failed");
    ServiceError::Backend(e)
}
