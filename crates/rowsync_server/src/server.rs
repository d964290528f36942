//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::session::{set_cookie, SessionStore, Upload};
use rowsync_core::{BatchInfo, ScopeInfo, SerializerFactory, SyncNamed, SyncSet, SyncSetup};
use rowsync_engine::{HttpRequest, HttpResponse, LocalOrchestrator};
use rowsync_protocol::headers::{
    CONTENT_TYPE, CONTENT_TYPE_JSON, COOKIE, SET_COOKIE, SYNC_ERROR, SYNC_HASH,
    SYNC_SERIALIZATION_FORMAT, SYNC_STEP,
};
use rowsync_protocol::{
    verify_hash, BatchSummary, ChangesPart, ChangesResponse, EndDownloadMessage,
    EnsureScopeRequest, EnsureScopeResponse, EstimatedChangesResponse, GetChangesRequest,
    GetMoreChangesRequest, GetMoreChangesResponse, HttpStep, ProtocolError, SendChangesRequest,
    SerializationFormat, SyncContext, SyncStage,
};
use rowsync_provider::{DbConnection, ProvisionFlags, ScopeType, SyncProvider};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-request values read from the headers.
struct Incoming<'a> {
    session: &'a str,
    factory: Arc<dyn SerializerFactory>,
    batch_size: usize,
    body: &'a [u8],
}

fn stage_of(step: HttpStep) -> SyncStage {
    match step {
        HttpStep::EnsureSchema | HttpStep::EnsureScopes => SyncStage::ScopeLoading,
        HttpStep::SendChanges | HttpStep::SendChangesInProgress => SyncStage::ChangesApplying,
        HttpStep::GetChanges | HttpStep::GetEstimatedChangesCount => SyncStage::ChangesSelecting,
        HttpStep::GetMoreChanges | HttpStep::SendEndDownloadChanges => {
            SyncStage::ChangesDownloading
        }
        _ => SyncStage::None,
    }
}

fn required<'a>(request: &'a HttpRequest, name: &str) -> ServerResult<&'a str> {
    request
        .header(name)
        .ok_or_else(|| ProtocolError::MissingHeader(name.to_string()).into())
}

fn decode<T: DeserializeOwned>(incoming: &Incoming<'_>) -> ServerResult<T> {
    let value = incoming.factory.decode(incoming.body)?;
    Ok(serde_json::from_value(value).map_err(ProtocolError::from)?)
}

fn encode<T: Serialize>(factory: &dyn SerializerFactory, message: &T) -> ServerResult<Vec<u8>> {
    let value = serde_json::to_value(message).map_err(ProtocolError::from)?;
    Ok(factory.encode(&value)?)
}

/// The sync server.
///
/// Serves the steps of the RowSync conversation against one database.
/// Transport is left to the embedder: hand every POST to
/// [`SyncServer::handle`] and write back the returned response.
///
/// # Example
///
/// ```rust,ignore
/// use rowsync_provider::sqlite::{SqliteConnection, SqliteSyncProvider};
/// use rowsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(
///     ServerConfig::default(),
///     Arc::new(SqliteSyncProvider::new()),
///     Box::new(SqliteConnection::open("server.db")?),
///     SyncSetup::new(["Orders", "Customers"]),
/// );
/// let response = server.handle(request).await;
/// ```
pub struct SyncServer {
    config: ServerConfig,
    local: LocalOrchestrator,
    setup: SyncSetup,
    sessions: SessionStore,
    token: CancellationToken,
}

impl SyncServer {
    /// Creates a server syncing `setup` from the database behind
    /// `connection`.
    pub fn new(
        config: ServerConfig,
        provider: Arc<dyn SyncProvider>,
        connection: Box<dyn DbConnection>,
        setup: SyncSetup,
    ) -> Self {
        let local = LocalOrchestrator::new(provider, connection, config.sync_options())
            .with_scope_type(ScopeType::Server);
        let sessions = SessionStore::new(config.max_sessions, config.session_ttl);
        Self {
            config,
            local,
            setup,
            sessions,
            token: CancellationToken::new(),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Orchestrator over the server database.
    pub fn local(&self) -> &LocalOrchestrator {
        &self.local
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Cancels every request in flight; later requests fail.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Serves one step. Failures become an error response carrying the
    /// error header and an envelope.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let step = request
            .header(SYNC_STEP)
            .and_then(|v| HttpStep::from_header(v).ok())
            .unwrap_or(HttpStep::None);

        let resolved = match self.sessions.resolve(request.header(COOKIE)) {
            Ok(resolved) => resolved,
            Err(e) => return self.error_response(&e, step),
        };
        for batch in resolved.expired {
            batch.try_remove_directory().await;
        }

        let mut response = match self.serve(&request, &resolved.id).await {
            Ok(body) => HttpResponse::ok(body).with_header(CONTENT_TYPE, CONTENT_TYPE_JSON),
            Err(e) => self.error_response(&e, step),
        };
        if resolved.issued {
            response = response.with_header(SET_COOKIE, set_cookie(&resolved.id));
        }
        response
    }

    fn error_response(&self, error: &ServerError, step: HttpStep) -> HttpResponse {
        let (status, reason) = error.status();
        tracing::warn!(%step, status, error = %error, "sync step failed");
        let envelope = error.to_envelope(stage_of(step), Some(self.local.source()));
        match serde_json::to_vec(&envelope) {
            Ok(body) => HttpResponse::new(status, reason, body)
                .with_header(SYNC_ERROR, error.type_name())
                .with_header(CONTENT_TYPE, CONTENT_TYPE_JSON),
            Err(_) => HttpResponse::new(status, reason, error.to_string()),
        }
    }

    async fn serve(&self, request: &HttpRequest, session: &str) -> ServerResult<Vec<u8>> {
        let step = HttpStep::from_header(required(request, SYNC_STEP)?)?;
        let hash = required(request, SYNC_HASH)?;
        if !verify_hash(&request.body, hash) {
            return Err(ServerError::HashMismatch);
        }
        let format = SerializationFormat::from_header(required(request, SYNC_SERIALIZATION_FORMAT)?)?;
        let factory = self
            .local
            .serializers()
            .get(&format.serializer_key)
            .map_err(|_| ServerError::UnknownSerializer(format.serializer_key.clone()))?;

        let incoming = Incoming {
            session,
            factory: Arc::clone(&factory),
            batch_size: self.config.effective_batch_size(format.batch_size),
            body: &request.body,
        };
        tracing::debug!(%step, session, bytes = request.body.len(), "sync step received");

        match step {
            HttpStep::EnsureScopes => {
                let request: EnsureScopeRequest = decode(&incoming)?;
                let response = self.ensure_scope(request.context)?;
                encode(factory.as_ref(), &response)
            }
            HttpStep::EnsureSchema => {
                let request: EnsureScopeRequest = decode(&incoming)?;
                let response = self.ensure_schema(request.context)?;
                encode(factory.as_ref(), &response)
            }
            HttpStep::SendChangesInProgress => {
                let request: SendChangesRequest = decode(&incoming)?;
                self.receive_part(&incoming, &request).await?;
                encode(factory.as_ref(), &ChangesResponse::ack(request.context))
            }
            HttpStep::SendChanges => {
                let request: SendChangesRequest = decode(&incoming)?;
                let response = self.receive_changes(&incoming, request).await?;
                encode(factory.as_ref(), &response)
            }
            HttpStep::GetChanges => {
                let request: GetChangesRequest = decode(&incoming)?;
                let (_, schema) = self.server_scope(&request.context.scope_name)?;
                let response = self
                    .select_changes(&incoming, &schema, request.context, request.last_server_sync_timestamp)
                    .await?;
                encode(factory.as_ref(), &response)
            }
            HttpStep::GetEstimatedChangesCount => {
                let request: GetChangesRequest = decode(&incoming)?;
                let (_, schema) = self.server_scope(&request.context.scope_name)?;
                let (server_timestamp, count) = self.local.estimate_changes(
                    &schema,
                    request.last_server_sync_timestamp.unwrap_or(0),
                    Some(request.context.client_scope_id),
                )?;
                let response = EstimatedChangesResponse {
                    context: request.context,
                    server_timestamp,
                    count,
                };
                encode(factory.as_ref(), &response)
            }
            HttpStep::GetMoreChanges => {
                let request: GetMoreChangesRequest = decode(&incoming)?;
                let batch = self.sessions.download(session).ok_or_else(|| {
                    ServerError::SessionState {
                        session: session.to_string(),
                        missing: "download batch",
                    }
                })?;
                let part = self.load_part(&batch, request.index).await?;
                let response = GetMoreChangesResponse {
                    context: request.context,
                    part,
                };
                encode(factory.as_ref(), &response)
            }
            HttpStep::SendEndDownloadChanges => {
                let message: EndDownloadMessage = decode(&incoming)?;
                for batch in self.sessions.close(session) {
                    batch.try_remove_directory().await;
                }
                encode(factory.as_ref(), &message)
            }
            other => Err(ServerError::UnsupportedStep(other)),
        }
    }

    /// Loads the server scope, provisioning tracking infrastructure on first
    /// use.
    fn server_scope(&self, scope_name: &str) -> ServerResult<(ScopeInfo, SyncSet)> {
        let mut scope = self.local.ensure_scope(scope_name, &self.setup)?;
        if let Some(schema) = scope.schema.clone() {
            return Ok((scope, schema));
        }
        let schema = self.local.get_schema(&self.setup)?;
        self.local.provision(&schema, ProvisionFlags::TRACKING)?;
        scope.schema = Some(schema.clone());
        self.local.save_scope(&scope)?;
        tracing::info!(scope = %scope_name, tables = schema.tables.len(), "server scope provisioned");
        Ok((scope, schema))
    }

    fn ensure_scope(&self, context: SyncContext) -> ServerResult<EnsureScopeResponse> {
        let (scope, schema) = self.server_scope(&context.scope_name)?;
        tracing::info!(scope = %context.scope_name, client = %context.client_scope_id, "scope ensured");
        Ok(EnsureScopeResponse {
            context,
            server_scope_id: scope.id,
            schema,
            setup: scope.setup.unwrap_or_else(|| self.setup.clone()),
        })
    }

    fn ensure_schema(&self, context: SyncContext) -> ServerResult<EnsureScopeResponse> {
        let schema = self.local.get_schema(&self.setup)?;
        let server_scope_id = self
            .local
            .get_scope(&context.scope_name)?
            .map_or(Uuid::nil(), |scope| scope.id);
        Ok(EnsureScopeResponse {
            context,
            server_scope_id,
            schema,
            setup: self.setup.clone(),
        })
    }

    /// Writes an uploaded part into the session's upload batch.
    ///
    /// Parts must arrive in index order. A part whose index was already
    /// received is a retry and is acknowledged without being written again;
    /// a part skipping ahead of the next expected index is rejected.
    async fn receive_part(
        &self,
        incoming: &Incoming<'_>,
        request: &SendChangesRequest,
    ) -> ServerResult<()> {
        let (_, schema) = self.server_scope(&request.context.scope_name)?;
        for table in &request.part.tables {
            if schema.table(table).is_none() {
                return Err(ServerError::InvalidRequest(format!(
                    "table {} is not part of scope {}",
                    table.full_name(),
                    request.context.scope_name
                )));
            }
        }

        let options = self.local.options();
        let mut upload = self.sessions.take_upload(incoming.session).unwrap_or_else(|| {
            Upload::new(BatchInfo::new(
                &options.batch_directory,
                &schema,
                &options.serializer_key,
            ))
        });
        let index = request.part.index;
        if index < upload.expected {
            tracing::debug!(session = incoming.session, index, "changes part already received");
            self.sessions.put_upload(incoming.session, upload);
            return Ok(());
        }
        if index > upload.expected {
            let expected = upload.expected;
            self.sessions.put_upload(incoming.session, upload);
            return Err(ServerError::InvalidRequest(format!(
                "changes part {index} received while part {expected} is missing"
            )));
        }

        let factory = self.local.serializers().get(&upload.batch.serializer_key)?;
        for table in request.part.tables.iter().filter(|t| t.has_rows()) {
            let mut serializer = factory.create_local_serializer();
            let slot = upload.batch.next_index();
            if let Err(e) = upload
                .batch
                .save_batch_part_info(slot, table, serializer.as_mut())
                .await
            {
                upload.batch.try_remove_directory().await;
                return Err(e.into());
            }
        }
        upload.expected = index + 1;
        tracing::debug!(
            session = incoming.session,
            index,
            rows = request.part.rows_count(),
            "changes part received"
        );
        self.sessions.put_upload(incoming.session, upload);
        Ok(())
    }

    /// Applies the uploaded batch and answers with the first part of the
    /// server changes.
    async fn receive_changes(
        &self,
        incoming: &Incoming<'_>,
        request: SendChangesRequest,
    ) -> ServerResult<ChangesResponse> {
        self.receive_part(incoming, &request).await?;
        let (_, schema) = self.server_scope(&request.context.scope_name)?;
        let since = request.last_server_sync_timestamp.unwrap_or(0);

        let mut applied = rowsync_engine::ApplyStats::default();
        if let Some(Upload { batch: mut upload, .. }) =
            self.sessions.take_upload(incoming.session)
        {
            upload.ensure_last_batch();
            let result = self
                .local
                .apply_changes(&upload, request.context.client_scope_id, since, &self.token)
                .await;
            upload.try_remove_directory().await;
            applied = result?;
        }

        let mut response = self
            .select_changes(incoming, &schema, request.context, request.last_server_sync_timestamp)
            .await?;
        response.applied = applied.applied;
        response.conflicts = applied.conflicts;
        Ok(response)
    }

    /// Selects server changes for the client into the session's download
    /// batch and returns the first part.
    async fn select_changes(
        &self,
        incoming: &Incoming<'_>,
        schema: &SyncSet,
        context: SyncContext,
        last_server_sync_timestamp: Option<i64>,
    ) -> ServerResult<ChangesResponse> {
        let batch = self
            .local
            .get_changes_in_parts(
                schema,
                last_server_sync_timestamp.unwrap_or(0),
                Some(context.client_scope_id),
                incoming.batch_size,
                &self.token,
            )
            .await?;

        let mut response = ChangesResponse::ack(context);
        response.server_timestamp = batch.timestamp;
        response.batch = Some(BatchSummary {
            parts_count: batch.parts().len(),
            rows_count: batch.rows_count(),
        });

        if batch.parts().is_empty() {
            batch.try_remove_directory().await;
            for stale in self.sessions.close(incoming.session) {
                stale.try_remove_directory().await;
            }
            return Ok(response);
        }

        response.part = Some(self.load_part(&batch, 0).await?);
        if let Some(stale) = self.sessions.put_download(incoming.session, Some(batch)) {
            stale.try_remove_directory().await;
        }
        Ok(response)
    }

    async fn load_part(&self, batch: &BatchInfo, index: usize) -> ServerResult<ChangesPart> {
        let part = batch
            .part(index)
            .ok_or_else(|| ServerError::InvalidRequest(format!("no part {index} in batch")))?;
        let factory = self.local.serializers().get(&batch.serializer_key)?;
        let mut tables = Vec::with_capacity(part.tables.len());
        for table in &part.tables {
            let mut serializer = factory.create_local_serializer();
            tables.push(
                batch
                    .load_batch_part_info(part, table, serializer.as_mut())
                    .await?,
            );
        }
        Ok(ChangesPart {
            index,
            is_last: part.is_last_batch,
            tables,
        })
    }
}
