use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{AccessPolicy, ServiceError, ServiceResult};
use crate::{
    auth::Subject,
    clock::monotonic_now,
    crypto::EncryptionProvider,
    db::{
        AttachmentLink, DbPool, EntryFilter, EntryScope, ListParams, ListResult, SortOrder,
        cursor::truncate_to_millis,
    },
    models::{
        AccessLevel, AppendEntries, Attachment, Channel, Conversation, Entry, EntryQuery,
        EpochFilter, NewEntry, SyncMemory, SyncOutcome,
    },
};

/// What a memory sync should do with the incoming window.
#[derive(Debug, PartialEq)]
enum SyncDecision {
    NoOp,
    /// Insert the suffix at the current epoch.
    AppendDelta(Vec<serde_json::Value>),
    /// Insert the full window at the next epoch.
    NewEpoch,
}

/// Pure decision function for [`EntryService::sync_memory`].
fn decide_sync(
    existing: &[serde_json::Value],
    existing_content_type: Option<&str>,
    incoming: &[serde_json::Value],
    incoming_content_type: &str,
) -> SyncDecision {
    let content_type_matches = existing_content_type == Some(incoming_content_type);

    if content_type_matches && !incoming.is_empty() && existing == incoming {
        return SyncDecision::NoOp;
    }

    if content_type_matches
        && incoming.len() > existing.len()
        && incoming[..existing.len()] == *existing
    {
        return SyncDecision::AppendDelta(incoming[existing.len()..].to_vec());
    }

    // Divergence; but clearing an already-empty window changes nothing.
    if incoming.is_empty() && existing.is_empty() {
        return SyncDecision::NoOp;
    }

    SyncDecision::NewEpoch
}

/// Entry operations: append with channel validation, listing, and the
/// memory-sync state machine.
#[derive(Clone)]
pub struct EntryService {
    db: Arc<DbPool>,
    access: Arc<AccessPolicy>,
    encryption: Arc<dyn EncryptionProvider>,
    /// Expiry stamped on attachment rows allocated during cross-fork reuse,
    /// so rows orphaned by a failed append are reaped.
    pending_link_expiry: chrono::Duration,
}

impl EntryService {
    pub fn new(
        db: Arc<DbPool>,
        access: Arc<AccessPolicy>,
        encryption: Arc<dyn EncryptionProvider>,
        pending_link_expiry: chrono::Duration,
    ) -> Self {
        Self {
            db,
            access,
            encryption,
            pending_link_expiry,
        }
    }

    async fn live_conversation(&self, id: Uuid) -> ServiceResult<Conversation> {
        self.db
            .conversations()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Append entries to a conversation.
    #[instrument(skip(self, input), fields(user = %subject.user_id, conversation = %conversation_id))]
    pub async fn append(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
        input: AppendEntries,
    ) -> ServiceResult<Vec<Entry>> {
        if input.entries.is_empty() {
            return Err(ServiceError::Validation("entries must not be empty".into()));
        }

        let conversation = self.live_conversation(conversation_id).await?;
        let mut rows = Vec::with_capacity(input.entries.len());
        let mut links = Vec::new();

        for new_entry in input.entries {
            let (row, mut entry_links) = self
                .prepare_entry(subject, &conversation, new_entry)
                .await?;
            links.append(&mut entry_links);
            rows.push(row);
        }

        let plaintext: Vec<serde_json::Value> =
            rows.iter().map(|row| row.content.clone()).collect();
        for row in &mut rows {
            row.content = self.encryption.encrypt(&row.content)?;
        }

        let mut stored = self
            .db
            .entries()
            .append(conversation_id, rows, links)
            .await?;
        for (entry, content) in stored.iter_mut().zip(plaintext) {
            entry.content = content;
        }

        for entry in &stored {
            crate::observability::metrics::record_entry_appended(entry.channel.as_str());
        }
        debug!(count = stored.len(), "Entries appended");
        Ok(stored)
    }

    /// Validate one incoming entry and resolve its attachment references.
    async fn prepare_entry(
        &self,
        subject: &Subject,
        conversation: &Conversation,
        input: NewEntry,
    ) -> ServiceResult<(Entry, Vec<AttachmentLink>)> {
        let entry_id = Uuid::now_v7();
        let mut links = Vec::new();
        let mut content = serde_json::Value::Array(input.content);

        let (epoch, client_id, user_id) = match input.channel {
            Channel::History => {
                self.access
                    .require(conversation.group_id, subject, AccessLevel::Writer)
                    .await?;
                validate_history_content_type(&input.content_type)?;
                validate_history_content(&content)?;
                content = self
                    .resolve_attachments(subject, conversation, entry_id, content, &mut links)
                    .await?;
                (None, subject.client_id.clone(), Some(subject.user_id.clone()))
            }
            Channel::Memory => {
                let client_id = subject.client_id.clone().ok_or_else(|| {
                    ServiceError::Validation("memory entries require a client id".into())
                })?;
                self.access
                    .require(conversation.group_id, subject, AccessLevel::Reader)
                    .await?;
                if input.indexed_content.is_some() {
                    return Err(ServiceError::Validation(
                        "memory entries cannot carry indexed content".into(),
                    ));
                }
                let epoch = match input.epoch {
                    Some(epoch) => epoch,
                    None => self
                        .db
                        .entries()
                        .latest_epoch(conversation.id, &client_id)
                        .await?
                        .unwrap_or(1),
                };
                (Some(epoch), Some(client_id), Some(subject.user_id.clone()))
            }
            Channel::Transcript => {
                if !self.access.is_indexer(subject) {
                    return Err(ServiceError::Forbidden(
                        "transcript entries require an indexer client".into(),
                    ));
                }
                self.access
                    .require(conversation.group_id, subject, AccessLevel::Reader)
                    .await?;
                (None, subject.client_id.clone(), Some(subject.user_id.clone()))
            }
        };

        let indexed_content = match input.channel {
            Channel::Memory => None,
            _ => input.indexed_content,
        };

        Ok((
            Entry {
                id: entry_id,
                conversation_id: conversation.id,
                group_id: conversation.group_id,
                channel: input.channel,
                content_type: input.content_type,
                epoch,
                client_id,
                user_id,
                content,
                indexed_content,
                created_at: truncate_to_millis(monotonic_now()),
                indexed_at: None,
            },
            links,
        ))
    }

    /// Rewrite `attachmentId` references to `href`, allocating new rows for
    /// cross-fork reuse.
    ///
    /// - unlinked: the uploader links their own row directly;
    /// - linked in this group: a new row shares the blob's storage key, so
    ///   forks reuse bytes without copying;
    /// - linked in another group: rejected, blobs never silently cross
    ///   group boundaries.
    async fn resolve_attachments(
        &self,
        subject: &Subject,
        conversation: &Conversation,
        entry_id: Uuid,
        mut content: serde_json::Value,
        links: &mut Vec<AttachmentLink>,
    ) -> ServiceResult<serde_json::Value> {
        let Some(items) = content.as_array_mut() else {
            return Ok(content);
        };

        for item in items {
            let Some(attachments) = item.get_mut("attachments").and_then(|a| a.as_array_mut())
            else {
                continue;
            };

            for reference in attachments {
                let Some(id_value) = reference.get("attachmentId") else {
                    continue;
                };
                let attachment_id = id_value
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| {
                        ServiceError::Validation("attachmentId must be a UUID".into())
                    })?;

                let attachment = self
                    .db
                    .attachments()
                    .get(attachment_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Validation(format!(
                            "attachment {attachment_id} not found"
                        ))
                    })?;

                let linked_id = match self.db.attachments().linked_group_id(attachment_id).await? {
                    None => {
                        // Unlinked: only the uploader may link it.
                        if attachment.user_id != subject.user_id {
                            return Err(ServiceError::Forbidden(
                                "only the uploader may link an unlinked attachment".into(),
                            ));
                        }
                        links.push(AttachmentLink {
                            attachment_id,
                            entry_id,
                        });
                        attachment_id
                    }
                    Some(group_id) if group_id == conversation.group_id => {
                        self.access
                            .require(group_id, subject, AccessLevel::Reader)
                            .await?;
                        let copy = self.allocate_shared_row(subject, &attachment).await?;
                        links.push(AttachmentLink {
                            attachment_id: copy.id,
                            entry_id,
                        });
                        copy.id
                    }
                    Some(_) => {
                        return Err(ServiceError::Forbidden(
                            "attachment is linked in a different conversation group".into(),
                        ));
                    }
                };

                let obj = reference.as_object_mut().ok_or_else(|| {
                    ServiceError::Validation("attachment reference must be an object".into())
                })?;
                obj.remove("attachmentId");
                obj.insert(
                    "href".to_string(),
                    serde_json::Value::String(format!("/v1/attachments/{linked_id}")),
                );
                obj.entry("contentType").or_insert_with(|| {
                    serde_json::Value::String(attachment.content_type.clone())
                });
                if let Some(filename) = &attachment.filename {
                    obj.entry("filename")
                        .or_insert_with(|| serde_json::Value::String(filename.clone()));
                }
            }
        }

        Ok(content)
    }

    /// New attachment row sharing an existing blob. Expires shortly unless
    /// the append transaction links it.
    async fn allocate_shared_row(
        &self,
        subject: &Subject,
        source: &Attachment,
    ) -> ServiceResult<Attachment> {
        let now = Utc::now();
        let copy = Attachment {
            id: Uuid::new_v4(),
            user_id: subject.user_id.clone(),
            content_type: source.content_type.clone(),
            filename: source.filename.clone(),
            size_bytes: source.size_bytes,
            sha256: source.sha256.clone(),
            storage_key: source.storage_key.clone(),
            entry_id: None,
            expires_at: Some(now + self.pending_link_expiry),
            created_at: now,
            deleted_at: None,
        };
        Ok(self.db.attachments().create(copy).await?)
    }

    /// List entries in `(created_at, id)` order.
    ///
    /// Without a channel filter only history is returned. For forks,
    /// `all_forks` widens the scope to the group prefix before the fork
    /// point.
    #[instrument(skip(self, params), fields(user = %subject.user_id, conversation = %conversation_id))]
    pub async fn list(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
        query: EntryQuery,
        mut params: ListParams,
    ) -> ServiceResult<ListResult<Entry>> {
        let conversation = self.live_conversation(conversation_id).await?;
        self.access
            .require(conversation.group_id, subject, AccessLevel::Reader)
            .await?;

        let channel = query.channel.unwrap_or(Channel::History);
        if query.epoch != EpochFilter::All && channel != Channel::Memory {
            return Err(ServiceError::Validation(
                "epoch filters apply to the memory channel only".into(),
            ));
        }
        if query.epoch == EpochFilter::Latest && query.client_id.is_none() {
            return Err(ServiceError::Validation(
                "epoch=latest requires a client id".into(),
            ));
        }

        let scope = self.scope_for(&conversation, query.all_forks).await?;
        let filter = EntryFilter {
            channel: Some(channel),
            epoch: query.epoch,
            client_id: query.client_id,
        };
        params.sort_order = SortOrder::Asc;

        let mut result = self.db.entries().list(scope, filter, params).await?;
        for entry in &mut result.items {
            entry.content = self.encryption.decrypt(&entry.content)?;
        }
        Ok(result)
    }

    /// Scope a listing to the conversation chain, or to the group prefix
    /// for forks when `all_forks` is set.
    async fn scope_for(
        &self,
        conversation: &Conversation,
        all_forks: bool,
    ) -> ServiceResult<EntryScope> {
        if !all_forks {
            return Ok(EntryScope::conversation(conversation.id));
        }
        let Some(fork_entry_id) = conversation.forked_at_entry_id else {
            return Ok(EntryScope::conversation(conversation.id));
        };
        let fork_entry = self
            .db
            .entries()
            .get(fork_entry_id)
            .await?
            .ok_or_else(|| ServiceError::Internal("fork entry missing".into()))?;
        Ok(EntryScope {
            conversation_id: conversation.id,
            group_prefix: Some((conversation.group_id, fork_entry.created_at)),
        })
    }

    /// Publish an agent's full memory window.
    ///
    /// One insert in the steady state: the whole window lives in a single
    /// content array per epoch, and repeated syncs either no-op, append the
    /// new suffix, or open a fresh epoch on divergence. The read-then-write
    /// pair is optimistic; concurrent syncs for one `(conversation, client)`
    /// resolve through the latest-epoch read.
    #[instrument(skip(self, input), fields(user = %subject.user_id, conversation = %conversation_id))]
    pub async fn sync_memory(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
        input: SyncMemory,
    ) -> ServiceResult<SyncOutcome> {
        let client_id = subject.client_id.clone().ok_or_else(|| {
            ServiceError::Validation("memory sync requires a client id".into())
        })?;
        let conversation = self.live_conversation(conversation_id).await?;
        self.access
            .require(conversation.group_id, subject, AccessLevel::Reader)
            .await?;

        let window = self
            .db
            .entries()
            .list(
                EntryScope::conversation(conversation.id),
                EntryFilter {
                    channel: Some(Channel::Memory),
                    epoch: EpochFilter::Latest,
                    client_id: Some(client_id.clone()),
                },
                ListParams {
                    limit: Some(1000),
                    sort_order: SortOrder::Asc,
                    ..Default::default()
                },
            )
            .await?;

        let current_epoch = window.items.first().and_then(|entry| entry.epoch);
        let mut existing: Vec<serde_json::Value> = Vec::new();
        for entry in &window.items {
            match self.encryption.decrypt(&entry.content)? {
                serde_json::Value::Array(values) => existing.extend(values),
                other => existing.push(other),
            }
        }
        let existing_content_type = window.items.last().map(|entry| entry.content_type.clone());

        let decision = decide_sync(
            &existing,
            existing_content_type.as_deref(),
            &input.content,
            &input.content_type,
        );

        let (epoch, content, epoch_incremented) = match decision {
            SyncDecision::NoOp => {
                crate::observability::metrics::record_memory_sync("no_op");
                return Ok(SyncOutcome::no_op(current_epoch.unwrap_or(0)));
            }
            SyncDecision::AppendDelta(delta) => (current_epoch.unwrap_or(1), delta, false),
            SyncDecision::NewEpoch => (current_epoch.unwrap_or(0) + 1, input.content, true),
        };

        let plaintext = serde_json::Value::Array(content);
        let row = Entry {
            id: Uuid::now_v7(),
            conversation_id: conversation.id,
            group_id: conversation.group_id,
            channel: Channel::Memory,
            content_type: input.content_type,
            epoch: Some(epoch),
            client_id: Some(client_id),
            user_id: Some(subject.user_id.clone()),
            content: self.encryption.encrypt(&plaintext)?,
            indexed_content: None,
            created_at: truncate_to_millis(monotonic_now()),
            indexed_at: None,
        };

        let mut stored = self
            .db
            .entries()
            .append(conversation.id, vec![row], Vec::new())
            .await?;
        let mut entry = stored.remove(0);
        entry.content = plaintext;

        crate::observability::metrics::record_memory_sync(if epoch_incremented {
            "new_epoch"
        } else {
            "delta"
        });
        info!(epoch, epoch_incremented, "Memory window synced");
        Ok(SyncOutcome {
            no_op: false,
            epoch_incremented,
            epoch,
            entry: Some(entry),
        })
    }

    /// Write a transcript entry with its search projection. Index path
    /// only: requires a role-guarded indexer client.
    #[instrument(skip(self, content, indexed_content), fields(user = %subject.user_id))]
    pub async fn index_transcript(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
        content_type: String,
        content: Vec<serde_json::Value>,
        indexed_content: Option<String>,
    ) -> ServiceResult<Entry> {
        let mut stored = self
            .append(
                subject,
                conversation_id,
                AppendEntries {
                    entries: vec![NewEntry {
                        channel: Channel::Transcript,
                        content_type,
                        content,
                        epoch: None,
                        indexed_content,
                    }],
                },
            )
            .await?;
        Ok(stored.remove(0))
    }

    /// Get one entry, decrypted, with a group-level access check.
    pub async fn get(&self, subject: &Subject, id: Uuid) -> ServiceResult<Entry> {
        let mut entry = self
            .db
            .entries()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.access
            .require(entry.group_id, subject, AccessLevel::Reader)
            .await?;
        entry.content = self.encryption.decrypt(&entry.content)?;
        Ok(entry)
    }
}

/// Persists a finished recording's buffered output as a transcript entry.
///
/// The recorder's completion hook: runs under the recorder's own authority
/// rather than a request subject (the producer's access was checked when
/// the recording started), so an interrupted stream still lands in the
/// conversation even though no caller is left to append it.
pub struct RecordedOutputSink {
    db: Arc<DbPool>,
    encryption: Arc<dyn EncryptionProvider>,
}

impl RecordedOutputSink {
    pub fn new(db: Arc<DbPool>, encryption: Arc<dyn EncryptionProvider>) -> Self {
        Self { db, encryption }
    }
}

#[async_trait::async_trait]
impl crate::recorder::CompletionSink for RecordedOutputSink {
    async fn persist(
        &self,
        conversation_id: Uuid,
        user_id: Option<String>,
        client_id: Option<String>,
        output: String,
    ) -> ServiceResult<()> {
        // The conversation may have been deleted while the stream was in
        // flight; nothing to persist into then.
        let Some(conversation) = self.db.conversations().get(conversation_id).await? else {
            return Ok(());
        };

        let content = serde_json::json!([{ "text": output, "role": "AI" }]);
        let row = Entry {
            id: Uuid::now_v7(),
            conversation_id: conversation.id,
            group_id: conversation.group_id,
            channel: Channel::Transcript,
            content_type: "transcript".to_string(),
            epoch: None,
            client_id,
            user_id,
            content: self.encryption.encrypt(&content)?,
            indexed_content: Some(output),
            created_at: truncate_to_millis(monotonic_now()),
            indexed_at: None,
        };
        self.db
            .entries()
            .append(conversation.id, vec![row], Vec::new())
            .await?;
        Ok(())
    }
}

/// `history` or `history/<sub>`.
fn validate_history_content_type(content_type: &str) -> ServiceResult<()> {
    static PATTERN: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"^history(/[\w.+-]+)?$").unwrap());
    if PATTERN.is_match(content_type) {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!(
            "history content type must be 'history' or 'history/<sub>', got '{content_type}'"
        )))
    }
}

/// Shape rules for history content: a single-element array whose object
/// carries at least one of `text`, `events`, `attachments`; a valid role if
/// present; attachment references with `href` (plus `contentType`) or
/// `attachmentId`.
fn validate_history_content(content: &serde_json::Value) -> ServiceResult<()> {
    let items = content
        .as_array()
        .ok_or_else(|| ServiceError::Validation("history content must be an array".into()))?;
    if items.len() != 1 {
        return Err(ServiceError::Validation(
            "history content must be a single-element array".into(),
        ));
    }
    let item = items[0]
        .as_object()
        .ok_or_else(|| ServiceError::Validation("history content must be an object".into()))?;

    if !["text", "events", "attachments"]
        .iter()
        .any(|key| item.contains_key(*key))
    {
        return Err(ServiceError::Validation(
            "history content requires at least one of text, events, attachments".into(),
        ));
    }

    if let Some(role) = item.get("role") {
        let role = role
            .as_str()
            .ok_or_else(|| ServiceError::Validation("role must be a string".into()))?;
        if !matches!(role, "USER" | "AI" | "SYSTEM") {
            return Err(ServiceError::Validation(format!(
                "role must be USER, AI, or SYSTEM, got '{role}'"
            )));
        }
    }

    if let Some(attachments) = item.get("attachments") {
        let attachments = attachments
            .as_array()
            .ok_or_else(|| ServiceError::Validation("attachments must be an array".into()))?;
        for reference in attachments {
            let obj = reference.as_object().ok_or_else(|| {
                ServiceError::Validation("attachment reference must be an object".into())
            })?;
            let has_href = obj.contains_key("href");
            let has_id = obj.contains_key("attachmentId");
            if !has_href && !has_id {
                return Err(ServiceError::Validation(
                    "attachment reference requires href or attachmentId".into(),
                ));
            }
            if has_href && !obj.contains_key("contentType") {
                return Err(ServiceError::Validation(
                    "href attachment references require a contentType".into(),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn values(texts: &[&str]) -> Vec<serde_json::Value> {
        texts.iter().map(|t| json!({"text": t})).collect()
    }

    #[test]
    fn sync_identical_window_is_noop() {
        let window = values(&["A", "B"]);
        assert_eq!(
            decide_sync(&window, Some("memory"), &window, "memory"),
            SyncDecision::NoOp
        );
    }

    #[test]
    fn sync_prefix_extension_appends_delta() {
        let existing = values(&["A"]);
        let incoming = values(&["A", "B"]);
        assert_eq!(
            decide_sync(&existing, Some("memory"), &incoming, "memory"),
            SyncDecision::AppendDelta(values(&["B"]))
        );
    }

    #[test]
    fn sync_divergence_bumps_epoch() {
        let existing = values(&["A", "B"]);
        // Different content.
        assert_eq!(
            decide_sync(&existing, Some("memory"), &values(&["C"]), "memory"),
            SyncDecision::NewEpoch
        );
        // Shorter window.
        assert_eq!(
            decide_sync(&existing, Some("memory"), &values(&["A"]), "memory"),
            SyncDecision::NewEpoch
        );
        // Content type change.
        assert_eq!(
            decide_sync(&existing, Some("memory"), &existing.clone(), "memory/v2"),
            SyncDecision::NewEpoch
        );
    }

    #[test]
    fn sync_clear_semantics() {
        // Clearing a non-empty window diverges (acts as "clear").
        assert_eq!(
            decide_sync(&values(&["A"]), Some("memory"), &[], "memory"),
            SyncDecision::NewEpoch
        );
        // Clearing an empty window is a no-op, synced before or not.
        assert_eq!(decide_sync(&[], None, &[], "memory"), SyncDecision::NoOp);
        assert_eq!(
            decide_sync(&[], Some("memory"), &[], "memory"),
            SyncDecision::NoOp
        );
    }

    #[test]
    fn sync_first_window_is_new_epoch() {
        assert_eq!(
            decide_sync(&[], None, &values(&["A"]), "memory"),
            SyncDecision::NewEpoch
        );
    }

    #[test]
    fn history_content_type_rules() {
        assert!(validate_history_content_type("history").is_ok());
        assert!(validate_history_content_type("history/chat").is_ok());
        assert!(validate_history_content_type("history/v1.2+json").is_ok());
        assert!(validate_history_content_type("memory").is_err());
        assert!(validate_history_content_type("history/").is_err());
        assert!(validate_history_content_type("historyx").is_err());
    }

    #[test]
    fn history_content_shape_rules() {
        assert!(validate_history_content(&json!([{"text": "hi"}])).is_ok());
        assert!(validate_history_content(&json!([{"events": []}])).is_ok());
        assert!(
            validate_history_content(&json!([{"text": "hi", "role": "USER"}])).is_ok()
        );

        // Not a single-element array.
        assert!(validate_history_content(&json!([])).is_err());
        assert!(validate_history_content(&json!([{"text": "a"}, {"text": "b"}])).is_err());
        // No recognized key.
        assert!(validate_history_content(&json!([{"foo": 1}])).is_err());
        // Bad role.
        assert!(validate_history_content(&json!([{"text": "x", "role": "BOT"}])).is_err());
    }

    #[test]
    fn history_attachment_reference_rules() {
        assert!(
            validate_history_content(
                &json!([{"attachments": [{"href": "https://x/y", "contentType": "image/png"}]}])
            )
            .is_ok()
        );
        assert!(
            validate_history_content(
                &json!([{"attachments": [{"attachmentId": "00000000-0000-0000-0000-000000000000"}]}])
            )
            .is_ok()
        );
        // href without contentType.
        assert!(
            validate_history_content(&json!([{"attachments": [{"href": "https://x/y"}]}]))
                .is_err()
        );
        // Neither href nor attachmentId.
        assert!(
            validate_history_content(&json!([{"attachments": [{"name": "x"}]}])).is_err()
        );
    }
}
