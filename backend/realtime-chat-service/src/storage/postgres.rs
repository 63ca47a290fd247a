use super::{AuditStore, ConversationStore, MessageStore, StorageError, StorageResult};
use crate::models::{AccessAuditEntry, AccessDecision, Conversation, StoredMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Object, Pool};
use event_schema::{AttachmentRef, MessageStatus, MessageType, ParticipantRole};
use std::collections::HashMap;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, sender_role, envelope, \
     message_type, status, is_deleted, deleted_at, created_at";

const CONVERSATION_COLUMNS: &str =
    "id, couple_id, vendor_id, lead_id, is_active, last_activity_at, created_at";

impl From<tokio_postgres::Error> for StorageError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            let constraint = e
                .as_db_error()
                .and_then(|db| db.constraint())
                .unwrap_or("unknown")
                .to_string();
            return StorageError::UniqueViolation(constraint);
        }
        StorageError::Backend(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StorageError::Backend(format!("pool: {e}"))
    }
}

/// Store backed by a deadpool-postgres pool. Schema lives in
/// `migrations/0001_init.sql`.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> StorageResult<Object> {
        Ok(self.pool.get().await?)
    }
}

fn parse_column<T: std::str::FromStr>(row: &Row, column: &str) -> StorageResult<T> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| StorageError::Backend(format!("unexpected {column} value {raw:?}")))
}

fn conversation_from_row(row: &Row) -> StorageResult<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        couple_id: row.try_get("couple_id")?,
        vendor_id: row.try_get("vendor_id")?,
        lead_id: row.try_get("lead_id")?,
        is_active: row.try_get("is_active")?,
        last_activity_at: row.try_get("last_activity_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn message_from_row(row: &Row) -> StorageResult<StoredMessage> {
    Ok(StoredMessage {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        sender_role: parse_column::<ParticipantRole>(row, "sender_role")?,
        envelope: row.try_get("envelope")?,
        message_type: parse_column::<MessageType>(row, "message_type")?,
        status: parse_column::<MessageStatus>(row, "status")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_from_row(row: &Row) -> StorageResult<AccessAuditEntry> {
    let decision: String = row.try_get("decision")?;
    Ok(AccessAuditEntry {
        id: row.try_get("id")?,
        actor_id: row.try_get("actor_id")?,
        actor_role: parse_column::<ParticipantRole>(row, "actor_role")?,
        conversation_id: row.try_get("conversation_id")?,
        message_id: row.try_get("message_id")?,
        decision: AccessDecision::from_db(&decision),
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO conversations \
                 (id, couple_id, vendor_id, lead_id, is_active, last_activity_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &conversation.id,
                    &conversation.couple_id,
                    &conversation.vendor_id,
                    &conversation.lead_id,
                    &conversation.is_active,
                    &conversation.last_activity_at,
                    &conversation.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn find_conversation(&self, id: Uuid) -> StorageResult<Option<Conversation>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn find_active_conversation(
        &self,
        couple_id: Uuid,
        vendor_id: Uuid,
    ) -> StorageResult<Option<Conversation>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE couple_id = $1 AND vendor_id = $2 AND is_active"
                ),
                &[&couple_id, &vendor_id],
            )
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn list_conversations_for(
        &self,
        participant_id: Uuid,
    ) -> StorageResult<Vec<Conversation>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE couple_id = $1 OR vendor_id = $1 \
                     ORDER BY last_activity_at DESC"
                ),
                &[&participant_id],
            )
            .await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE conversations SET last_activity_at = GREATEST(last_activity_at, $2) \
                 WHERE id = $1",
                &[&id, &at],
            )
            .await?;
        if updated == 0 {
            return Err(StorageError::NotFound("conversation".into()));
        }
        Ok(())
    }

    async fn archive_conversation(&self, id: Uuid) -> StorageResult<bool> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "UPDATE conversations c SET is_active = FALSE \
                 FROM (SELECT id, is_active FROM conversations WHERE id = $1 FOR UPDATE) prev \
                 WHERE c.id = prev.id RETURNING prev.is_active",
                &[&id],
            )
            .await?
            .ok_or_else(|| StorageError::NotFound("conversation".into()))?;
        Ok(row.try_get(0)?)
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_message(&self, message: &StoredMessage) -> StorageResult<()> {
        let client = self.client().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
                ),
                &[
                    &message.id,
                    &message.conversation_id,
                    &message.sender_id,
                    &message.sender_role.as_str(),
                    &message.envelope,
                    &message.message_type.as_str(),
                    &message.status.as_str(),
                    &message.is_deleted,
                    &message.deleted_at,
                    &message.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn find_message(&self, id: Uuid) -> StorageResult<Option<StoredMessage>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StorageResult<(Vec<StoredMessage>, i64)> {
        let client = self.client().await?;
        let total: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = $1 AND NOT is_deleted",
                &[&conversation_id],
            )
            .await?
            .try_get(0)?;
        let rows = client
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND NOT is_deleted \
                     ORDER BY created_at ASC, id ASC LIMIT $2 OFFSET $3"
                ),
                &[&conversation_id, &limit, &offset],
            )
            .await?;
        let messages = rows.iter().map(message_from_row).collect::<StorageResult<_>>()?;
        Ok((messages, total))
    }

    async fn list_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMessage>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND NOT is_deleted AND created_at > $2 \
                     ORDER BY created_at ASC, id ASC"
                ),
                &[&conversation_id, &since],
            )
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn advance_status(&self, id: Uuid, status: MessageStatus) -> StorageResult<bool> {
        let lower: Vec<&str> = [
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
        ]
        .into_iter()
        .filter(|s| s.can_advance_to(status))
        .map(|s| s.as_str())
        .collect();

        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE messages SET status = $2 WHERE id = $1 AND status = ANY($3)",
                &[&id, &status.as_str(), &lower],
            )
            .await?;
        if updated > 0 {
            return Ok(true);
        }
        let exists = client
            .query_opt("SELECT 1 FROM messages WHERE id = $1", &[&id])
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StorageError::NotFound("message".into()))
        }
    }

    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE messages SET is_deleted = TRUE, deleted_at = $2 \
                 WHERE id = $1 AND NOT is_deleted",
                &[&id, &at],
            )
            .await?;
        if updated > 0 {
            return Ok(true);
        }
        let exists = client
            .query_opt("SELECT 1 FROM messages WHERE id = $1", &[&id])
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StorageError::NotFound("message".into()))
        }
    }

    async fn insert_read_receipt(
        &self,
        message_id: Uuid,
        reader_id: Uuid,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO message_read_receipts (message_id, reader_id, read_at) \
                 VALUES ($1, $2, $3)",
                &[&message_id, &reader_id, &at],
            )
            .await?;
        Ok(())
    }

    async fn has_read_receipt(&self, message_id: Uuid, reader_id: Uuid) -> StorageResult<bool> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM message_read_receipts WHERE message_id = $1 AND reader_id = $2",
                &[&message_id, &reader_id],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn unread_messages_for(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> StorageResult<Vec<StoredMessage>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND sender_id <> $2 \
                       AND NOT is_deleted AND status <> 'read' \
                     ORDER BY created_at ASC"
                ),
                &[&conversation_id, &reader_id],
            )
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn count_unread(&self, conversation_id: Uuid, reader_id: Uuid) -> StorageResult<i64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM messages \
                 WHERE conversation_id = $1 AND sender_id <> $2 \
                   AND NOT is_deleted AND status <> 'read'",
                &[&conversation_id, &reader_id],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn insert_attachment(
        &self,
        message_id: Uuid,
        attachment: &AttachmentRef,
    ) -> StorageResult<()> {
        let client = self.client().await?;
        let size = i64::try_from(attachment.size_bytes)
            .map_err(|_| StorageError::Backend("attachment too large".into()))?;
        client
            .execute(
                "INSERT INTO message_attachments \
                 (id, message_id, file_name, content_type, url, size_bytes) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &attachment.id,
                    &message_id,
                    &attachment.file_name,
                    &attachment.content_type,
                    &attachment.url,
                    &size,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_attachments(
        &self,
        message_ids: &[Uuid],
    ) -> StorageResult<HashMap<Uuid, Vec<AttachmentRef>>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.client().await?;
        let ids: Vec<Uuid> = message_ids.to_vec();
        let rows = client
            .query(
                "SELECT id, message_id, file_name, content_type, url, size_bytes \
                 FROM message_attachments WHERE message_id = ANY($1) \
                 ORDER BY created_at ASC",
                &[&ids],
            )
            .await?;

        let mut grouped: HashMap<Uuid, Vec<AttachmentRef>> = HashMap::new();
        for row in rows {
            let size: i64 = row.try_get("size_bytes")?;
            grouped
                .entry(row.try_get("message_id")?)
                .or_default()
                .push(AttachmentRef {
                    id: row.try_get("id")?,
                    file_name: row.try_get("file_name")?,
                    content_type: row.try_get("content_type")?,
                    url: row.try_get("url")?,
                    size_bytes: size.max(0) as u64,
                });
        }
        Ok(grouped)
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append_audit(
        &self,
        entry: &AccessAuditEntry,
        max_per_actor: usize,
    ) -> StorageResult<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        tx.execute(
            "INSERT INTO access_audit_log \
             (id, actor_id, actor_role, conversation_id, message_id, decision, reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &entry.id,
                &entry.actor_id,
                &entry.actor_role.as_str(),
                &entry.conversation_id,
                &entry.message_id,
                &entry.decision.as_str(),
                &entry.reason,
                &entry.created_at,
            ],
        )
        .await?;
        let keep = max_per_actor as i64;
        tx.execute(
            "DELETE FROM access_audit_log WHERE id IN ( \
                 SELECT id FROM access_audit_log WHERE actor_id = $1 \
                 ORDER BY created_at DESC OFFSET $2)",
            &[&entry.actor_id, &keep],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn prune_audit(&self, max_per_actor: usize) -> StorageResult<u64> {
        let client = self.client().await?;
        let keep = max_per_actor as i64;
        let removed = client
            .execute(
                "DELETE FROM access_audit_log WHERE id IN ( \
                     SELECT id FROM ( \
                         SELECT id, ROW_NUMBER() OVER ( \
                             PARTITION BY actor_id ORDER BY created_at DESC) AS rn \
                         FROM access_audit_log) ranked \
                     WHERE rn > $1)",
                &[&keep],
            )
            .await?;
        Ok(removed)
    }

    async fn count_denials_since(
        &self,
        actor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM access_audit_log \
                 WHERE actor_id = $1 AND decision = 'denied' AND created_at >= $2",
                &[&actor_id, &since],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn audit_entries_for(&self, actor_id: Uuid) -> StorageResult<Vec<AccessAuditEntry>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, actor_id, actor_role, conversation_id, message_id, decision, \
                 reason, created_at FROM access_audit_log \
                 WHERE actor_id = $1 ORDER BY created_at DESC",
                &[&actor_id],
            )
            .await?;
        rows.iter().map(audit_from_row).collect()
    }
}
