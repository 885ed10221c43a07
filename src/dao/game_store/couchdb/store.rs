use std::{sync::Arc, time::Duration};

use async_stream::stream;
use futures::{StreamExt, future::BoxFuture, stream::BoxStream};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::dao::{
    game_store::{AnswerWrite, ChangeEvent, ChangeFilter, GameStore},
    models::{
        GameSessionEntity, HintUsageEntity, PlayerAnswerEntity, PlayerEntity, RoundRecordEntity,
        RoundScoreEntity,
    },
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, ChangesResponse, CouchDocument, DocKind, END_SUFFIX, answer_doc_id,
        answers_prefix, decode_change, hint_doc_id, players_prefix, round_doc_id, score_doc_id,
        scores_prefix, seq_param, session_doc_id,
    },
};

/// Attempts for a revisioned write racing other writers of the same document.
const WRITE_ATTEMPTS: usize = 3;
/// Back-off after a failed `_changes` request.
const CHANGES_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct RevProbe {
    #[serde(rename = "_rev")]
    rev: String,
}

/// Shared store backed by a CouchDB database.
#[derive(Clone)]
pub struct CouchGameStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    changes_timeout: Duration,
}

impl CouchGameStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .credentials
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            changes_timeout: config.changes_timeout,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);
        let mut builder = self.client.get(&url);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user.as_ref(), Some(pass.as_ref()));
        }

        let response = builder
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let mut builder = self.client.put(&url);
                if let Some((ref user, ref pass)) = self.auth {
                    builder = builder.basic_auth(user.as_ref(), Some(pass.as_ref()));
                }
                let create =
                    builder
                        .send()
                        .await
                        .map_err(|source| CouchDaoError::DatabaseCreate {
                            database: database.clone(),
                            source,
                        })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, document: &CouchDocument<T>) -> CouchResult<()>
    where
        T: Serialize,
    {
        let doc_id = document.id.as_str();
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::DocumentConflict {
                doc_id: doc_id.to_string(),
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// Write `body` under `doc_id`, replacing whatever revision is current.
    async fn upsert_document<T>(&self, doc_id: String, kind: DocKind, body: T) -> CouchResult<()>
    where
        T: Serialize,
    {
        let mut document = CouchDocument::new(doc_id, kind, body);
        let mut attempt = 0;
        loop {
            let rev = self
                .get_document::<RevProbe>(&document.id)
                .await?
                .map(|probe| probe.rev);
            document.rev = rev;
            match self.put_document(&document).await {
                Err(CouchDaoError::DocumentConflict { .. }) if attempt + 1 < WRITE_ATTEMPTS => {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::new();
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let parsed = from_value::<CouchDocument<T>>(doc).map_err(|source| {
                    CouchDaoError::DeserializeValue {
                        path: row.id.clone(),
                        source,
                    }
                })?;
                documents.push(parsed.body);
            }
        }

        Ok(documents)
    }

    async fn poll_changes(&self, since: &str) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let query = [
            ("feed", "longpoll".to_string()),
            ("include_docs", "true".to_string()),
            ("since", since.to_string()),
            ("timeout", self.changes_timeout.as_millis().to_string()),
        ];

        let response = self
            .request(Method::GET, CHANGES)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }

    async fn write_answer(&self, answer: PlayerAnswerEntity) -> CouchResult<AnswerWrite> {
        let doc_id = answer_doc_id(answer.round_id, &answer.user_id);
        let mut document = CouchDocument::new(doc_id, DocKind::Answer, answer);
        let mut attempt = 0;
        loop {
            let existing = self
                .get_document::<CouchDocument<PlayerAnswerEntity>>(&document.id)
                .await?;
            if existing
                .as_ref()
                .is_some_and(|doc| doc.body.submitted_at.is_some())
            {
                return Ok(AnswerWrite::AlreadySubmitted);
            }

            document.rev = existing.and_then(|doc| doc.rev);
            match self.put_document(&document).await {
                Ok(()) => return Ok(AnswerWrite::Written),
                Err(CouchDaoError::DocumentConflict { .. }) if attempt + 1 < WRITE_ATTEMPTS => {
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl GameStore for CouchGameStore {
    fn find_session(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>> {
        let store = self.clone();
        let doc_id = session_doc_id(code);
        Box::pin(async move {
            let doc = store
                .get_document::<CouchDocument<GameSessionEntity>>(&doc_id)
                .await?;
            Ok(doc.map(|doc| doc.body))
        })
    }

    fn save_session(&self, session: GameSessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = session_doc_id(&session.code);
            store
                .upsert_document(doc_id, DocKind::Session, session)
                .await
                .map_err(Into::into)
        })
    }

    fn find_round(
        &self,
        code: &str,
        round_no: u32,
    ) -> BoxFuture<'static, StorageResult<Option<RoundRecordEntity>>> {
        let store = self.clone();
        let doc_id = round_doc_id(code, round_no);
        Box::pin(async move {
            let doc = store
                .get_document::<CouchDocument<RoundRecordEntity>>(&doc_id)
                .await?;
            Ok(doc.map(|doc| doc.body))
        })
    }

    fn upsert_round(&self, round: RoundRecordEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = round_doc_id(&round.game_code, round.round_no);
            store
                .upsert_document(doc_id, DocKind::Round, round)
                .await
                .map_err(Into::into)
        })
    }

    fn put_answer(
        &self,
        answer: PlayerAnswerEntity,
    ) -> BoxFuture<'static, StorageResult<AnswerWrite>> {
        let store = self.clone();
        Box::pin(async move { store.write_answer(answer).await.map_err(Into::into) })
    }

    fn list_answers(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PlayerAnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_documents::<PlayerAnswerEntity>(&answers_prefix(round_id))
                .await
                .map_err(Into::into)
        })
    }

    fn insert_hint_usage(&self, usage: HintUsageEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = hint_doc_id(&usage.game_code, usage.round_no, &usage.user_id);
            // No revision: CouchDB answers 409 when the ledger row already exists.
            let document = CouchDocument::new(doc_id, DocKind::Hint, usage);
            store.put_document(&document).await.map_err(Into::into)
        })
    }

    fn upsert_score(&self, score: RoundScoreEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = score_doc_id(score.round_id, &score.user_id);
            store
                .upsert_document(doc_id, DocKind::Score, score)
                .await
                .map_err(Into::into)
        })
    }

    fn list_scores(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundScoreEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_documents::<RoundScoreEntity>(&scores_prefix(round_id))
                .await
                .map_err(Into::into)
        })
    }

    fn list_players(&self, code: &str) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        let prefix = players_prefix(code);
        Box::pin(async move {
            store
                .list_documents::<PlayerEntity>(&prefix)
                .await
                .map_err(Into::into)
        })
    }

    fn subscribe(&self, filter: ChangeFilter) -> BoxStream<'static, StorageResult<ChangeEvent>> {
        let store = self.clone();
        stream! {
            let mut since = String::from("now");
            loop {
                match store.poll_changes(&since).await {
                    Ok(page) => {
                        since = seq_param(&page.last_seq);
                        for row in page.results {
                            if row.deleted {
                                continue;
                            }
                            let Some(doc) = row.doc else {
                                continue;
                            };
                            match decode_change(doc) {
                                Ok(Some(event)) if filter.matches(&event) => yield Ok(event),
                                Ok(_) => {}
                                Err(source) => {
                                    let err: StorageError =
                                        CouchDaoError::DeserializeValue { path: row.id, source }
                                            .into();
                                    yield Err(err);
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, ?filter, "CouchDB changes feed failed; retrying");
                        let err: StorageError = err.into();
                        yield Err(err);
                        sleep(CHANGES_RETRY_DELAY).await;
                    }
                }
            }
        }
        .boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = format!("{}/{}", store.base_url, store.database);
            let mut builder = store.client.get(&url);
            if let Some((ref user, ref pass)) = store.auth {
                builder = builder.basic_auth(user.as_ref(), Some(pass.as_ref()));
            }

            let response = builder
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }
}
