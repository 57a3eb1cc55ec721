//! Secondary tantivy full-text index, kept alongside the Postgres
//! `tsvector` trigger (spec §4.5, SPEC_FULL.md §10.6).

use std::path::Path;
use std::sync::Arc;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, FAST, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::MailmeshResult;

struct Fields {
    message_id: Field,
    subject: Field,
    body: Field,
    from_addr: Field,
    received_at: Field,
}

/// Tantivy-backed index of non-deleted messages, keyed by message id
/// (spec §4.5: "one per non-deleted Message"). Writes happen on the same
/// path as the Postgres mirror insert so the two never diverge.
pub struct FtsIndex {
    index: Arc<Index>,
    fields: Fields,
    writer: Arc<Mutex<IndexWriter>>,
    reader: IndexReader,
}

impl FtsIndex {
    pub fn open_or_create(dir: &Path) -> MailmeshResult<Self> {
        std::fs::create_dir_all(dir)?;

        let mut builder = Schema::builder();
        let message_id = builder.add_text_field("message_id", STORED);
        let subject = builder.add_text_field("subject", TEXT | STORED);
        let body = builder.add_text_field("body", TEXT);
        let from_addr = builder.add_text_field("from_addr", TEXT | STORED);
        let received_at = builder.add_i64_field("received_at", FAST | STORED);
        let schema = builder.build();

        let index = match Index::open_in_dir(dir) {
            Ok(index) => index,
            Err(_) => Index::create_in_dir(dir, schema.clone())?,
        };

        let writer = index.writer(50_000_000)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommit)
            .try_into()?;

        Ok(Self {
            index: Arc::new(index),
            fields: Fields {
                message_id,
                subject,
                body,
                from_addr,
                received_at,
            },
            writer: Arc::new(Mutex::new(writer)),
            reader,
        })
    }

    /// Upserts the lexeme vector for one message: `subject || body ||
    /// from` (spec §4.5). Tantivy has no native upsert, so this deletes
    /// any existing document for the message id first, matching the
    /// `ON CONFLICT` semantics of the Postgres trigger this index
    /// mirrors.
    #[tracing::instrument(skip(self, subject, body, from_addr))]
    pub async fn upsert(
        &self,
        message_id: Uuid,
        subject: &str,
        body: &str,
        from_addr: &str,
        received_at: i64,
    ) -> MailmeshResult<()> {
        let mut writer = self.writer.lock().await;
        let term = tantivy::Term::from_field_text(self.fields.message_id, &message_id.to_string());
        writer.delete_term(term);
        writer.add_document(doc!(
            self.fields.message_id => message_id.to_string(),
            self.fields.subject => subject,
            self.fields.body => body,
            self.fields.from_addr => from_addr,
            self.fields.received_at => received_at,
        ))?;
        writer.commit()?;
        Ok(())
    }

    /// Removes the FTS row for a hard-deleted message (spec §4.5: "on
    /// Message delete (hard), cascade removes the FTS row").
    pub async fn remove(&self, message_id: Uuid) -> MailmeshResult<()> {
        let mut writer = self.writer.lock().await;
        let term = tantivy::Term::from_field_text(self.fields.message_id, &message_id.to_string());
        writer.delete_term(term);
        writer.commit()?;
        Ok(())
    }

    /// Natural-language search over subject/body/from, ranked by
    /// tantivy's default BM25 score then `received_at` descending (spec
    /// §6: "rank by tsrank desc then receivedAt desc").
    pub fn search(&self, query: &str, limit: usize) -> MailmeshResult<Vec<Uuid>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(
            &self.index,
            vec![self.fields.subject, self.fields.body, self.fields.from_addr],
        );
        let parsed = parser
            .parse_query(query)
            .map_err(|e| tantivy::TantivyError::InvalidArgument(e.to_string()))?;
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let retrieved = searcher.doc(doc_address)?;
            if let Some(value) = retrieved.get_first(self.fields.message_id) {
                if let Some(text) = value.as_text() {
                    if let Ok(id) = Uuid::parse_str(text) {
                        results.push(id);
                    }
                }
            }
        }
        Ok(results)
    }
}
