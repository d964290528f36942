//! Remote orchestrator: the client's view of a sync server over HTTP.

use crate::config::HttpOptions;
use crate::converter::SyncConverter;
use crate::error::{SyncError, SyncResult};
use crate::http::HttpRequestHandler;
use crate::transport::HttpTransport;
use rowsync_core::{
    BatchInfo, JsonSerializerFactory, SerializerFactory, SerializerRegistry, SyncSet, SyncSetup,
};
use rowsync_protocol::{
    ChangesPart, ChangesResponse, EndDownloadMessage, EnsureScopeRequest, EnsureScopeResponse,
    EstimatedChangesResponse, GetChangesRequest, GetMoreChangesRequest, GetMoreChangesResponse,
    HttpStep, SendChangesRequest, SyncContext, SyncStage,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Talks to a sync server through an [`HttpRequestHandler`].
pub struct WebRemoteOrchestrator {
    options: HttpOptions,
    transport: Arc<dyn HttpTransport>,
    factory: Arc<dyn SerializerFactory>,
    handler: HttpRequestHandler,
    converter: Option<Arc<dyn SyncConverter>>,
    serializers: SerializerRegistry,
    batch_size: usize,
}

impl WebRemoteOrchestrator {
    /// Creates an orchestrator encoding messages as JSON.
    pub fn new(options: HttpOptions, transport: Arc<dyn HttpTransport>) -> Self {
        let factory: Arc<dyn SerializerFactory> = Arc::new(JsonSerializerFactory);
        let handler =
            HttpRequestHandler::new(options.clone(), Arc::clone(&transport), Arc::clone(&factory));
        Self {
            options,
            transport,
            factory,
            handler,
            converter: None,
            serializers: SerializerRegistry::new(),
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
        }
    }

    fn rebuild_handler(&mut self) {
        self.handler = HttpRequestHandler::new(
            self.options.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.factory),
        );
    }

    /// Installs a converter; its key is sent with every request.
    pub fn with_converter(mut self, converter: Arc<dyn SyncConverter>) -> Self {
        self.options.converter = Some(converter.key().to_string());
        self.converter = Some(converter);
        self.rebuild_handler();
        self
    }

    /// Encodes messages with another serializer.
    pub fn with_message_serializer(mut self, factory: Arc<dyn SerializerFactory>) -> Self {
        self.factory = factory;
        self.rebuild_handler();
        self
    }

    /// Replaces the registry used for local batch files.
    pub fn with_serializers(mut self, serializers: SerializerRegistry) -> Self {
        self.serializers = serializers;
        self
    }

    /// Rows per part requested from the server; 0 means unbounded.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// The request handler.
    pub fn handler(&self) -> &HttpRequestHandler {
        &self.handler
    }

    /// Ensures the server scope and returns its id, schema and setup.
    ///
    /// # Errors
    ///
    /// Returns the handler's errors.
    pub async fn ensure_scope(
        &self,
        context: &SyncContext,
        setup: Option<&SyncSetup>,
        token: &CancellationToken,
    ) -> SyncResult<EnsureScopeResponse> {
        let request = EnsureScopeRequest {
            context: context.at_stage(SyncStage::ScopeLoading),
            setup: setup.cloned(),
        };
        self.handler
            .process_request(context, HttpStep::EnsureScopes, &request, self.batch_size, token)
            .await
    }

    /// Reads the server schema for the setup without touching server scopes.
    ///
    /// # Errors
    ///
    /// Returns the handler's errors.
    pub async fn get_schema(
        &self,
        context: &SyncContext,
        setup: Option<&SyncSetup>,
        token: &CancellationToken,
    ) -> SyncResult<EnsureScopeResponse> {
        let request = EnsureScopeRequest {
            context: context.at_stage(SyncStage::Provisioning),
            setup: setup.cloned(),
        };
        self.handler
            .process_request(context, HttpStep::EnsureSchema, &request, self.batch_size, token)
            .await
    }

    async fn load_part(
        &self,
        batch: &BatchInfo,
        position: usize,
        is_last: bool,
    ) -> SyncResult<ChangesPart> {
        let part = &batch.parts()[position];
        let factory = self.serializers.get(&batch.serializer_key)?;
        let mut tables = Vec::with_capacity(part.tables.len());
        for table in &part.tables {
            let mut serializer = factory.create_local_serializer();
            let mut loaded = batch
                .load_batch_part_info(part, table, serializer.as_mut())
                .await?;
            if let Some(converter) = &self.converter {
                converter.before_serialize(&mut loaded);
            }
            tables.push(loaded);
        }
        Ok(ChangesPart {
            index: position,
            is_last,
            tables,
        })
    }

    /// Uploads a local batch part by part. Every part but the last is sent
    /// as `SendChangesInProgress`; the last one (or an empty part when the
    /// batch has none) as `SendChanges`, whose response starts the download.
    ///
    /// # Errors
    ///
    /// Returns the handler's errors, or a serializer error while reading
    /// part files.
    pub async fn send_changes(
        &self,
        context: &SyncContext,
        batch: &BatchInfo,
        last_server_sync_timestamp: Option<i64>,
        token: &CancellationToken,
    ) -> SyncResult<ChangesResponse> {
        let context = context.at_stage(SyncStage::ChangesUploading);
        let mut order: Vec<usize> = (0..batch.parts().len()).collect();
        order.sort_by_key(|&i| batch.parts()[i].index);
        let count = order.len().max(1);

        for position in 0..count {
            let is_last = position + 1 == count;
            // Part files are read one at a time; an empty batch sends one
            // empty last part.
            let mut part = match order.get(position) {
                Some(&i) => self.load_part(batch, i, is_last).await?,
                None => ChangesPart::empty(0),
            };
            part.index = position;
            part.is_last = is_last;

            let step = if is_last {
                HttpStep::SendChanges
            } else {
                HttpStep::SendChangesInProgress
            };
            let request = SendChangesRequest {
                context: context.clone(),
                last_server_sync_timestamp,
                part,
            };
            let response: ChangesResponse = self
                .handler
                .process_request(&context, step, &request, self.batch_size, token)
                .await?;
            tracing::debug!(index = position, count, "changes part uploaded");
            if is_last {
                return Ok(response);
            }
        }
        Err(SyncError::UnexpectedResponse(
            "upload ended without a last part".into(),
        ))
    }

    /// Asks for server changes without uploading anything.
    ///
    /// # Errors
    ///
    /// Returns the handler's errors.
    pub async fn get_changes(
        &self,
        context: &SyncContext,
        last_server_sync_timestamp: Option<i64>,
        token: &CancellationToken,
    ) -> SyncResult<ChangesResponse> {
        let request = GetChangesRequest {
            context: context.at_stage(SyncStage::ChangesSelecting),
            last_server_sync_timestamp,
        };
        self.handler
            .process_request(context, HttpStep::GetChanges, &request, self.batch_size, token)
            .await
    }

    /// Counts the rows the server would send.
    ///
    /// # Errors
    ///
    /// Returns the handler's errors.
    pub async fn estimate_changes(
        &self,
        context: &SyncContext,
        last_server_sync_timestamp: Option<i64>,
        token: &CancellationToken,
    ) -> SyncResult<EstimatedChangesResponse> {
        let request = GetChangesRequest {
            context: context.at_stage(SyncStage::ChangesSelecting),
            last_server_sync_timestamp,
        };
        self.handler
            .process_request(
                context,
                HttpStep::GetEstimatedChangesCount,
                &request,
                self.batch_size,
                token,
            )
            .await
    }

    /// Fetches one server part.
    ///
    /// # Errors
    ///
    /// Returns the handler's errors.
    pub async fn get_more_changes(
        &self,
        context: &SyncContext,
        index: usize,
        token: &CancellationToken,
    ) -> SyncResult<ChangesPart> {
        let request = GetMoreChangesRequest {
            context: context.at_stage(SyncStage::ChangesDownloading),
            index,
        };
        let response: GetMoreChangesResponse = self
            .handler
            .process_request(context, HttpStep::GetMoreChanges, &request, self.batch_size, token)
            .await?;
        if response.part.index != index {
            return Err(SyncError::UnexpectedResponse(format!(
                "asked for part {index}, got {}",
                response.part.index
            )));
        }
        Ok(response.part)
    }

    /// Tells the server the download is complete so it can drop the batch.
    ///
    /// # Errors
    ///
    /// Returns the handler's errors.
    pub async fn end_download(
        &self,
        context: &SyncContext,
        token: &CancellationToken,
    ) -> SyncResult<()> {
        let request = EndDownloadMessage {
            context: context.at_stage(SyncStage::ChangesDownloading),
        };
        let _: EndDownloadMessage = self
            .handler
            .process_request(
                context,
                HttpStep::SendEndDownloadChanges,
                &request,
                self.batch_size,
                token,
            )
            .await?;
        Ok(())
    }

    /// Downloads the server batch announced by `first` into a local batch
    /// under `directory`, fetching the remaining parts one by one, then
    /// acknowledges the end of the download.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnexpectedResponse`] if `first` announces no
    /// batch, the handler's errors, or a serializer error. Partial files are
    /// removed on failure.
    pub async fn download_changes(
        &self,
        context: &SyncContext,
        first: ChangesResponse,
        schema: &SyncSet,
        directory: &Path,
        serializer_key: &str,
        token: &CancellationToken,
    ) -> SyncResult<BatchInfo> {
        let summary = first.batch.ok_or_else(|| {
            SyncError::UnexpectedResponse("changes response announces no batch".into())
        })?;
        let mut batch = BatchInfo::new(directory, schema, serializer_key);
        batch.timestamp = first.server_timestamp;

        let result = self
            .fill_batch(context, &mut batch, summary.parts_count, first.part, token)
            .await;
        if let Err(e) = result {
            batch.try_remove_directory().await;
            return Err(e);
        }
        batch.ensure_last_batch();

        if summary.parts_count > 0 {
            self.end_download(context, token).await?;
        }
        tracing::info!(
            rows = batch.rows_count(),
            parts = summary.parts_count,
            "server changes downloaded"
        );
        Ok(batch)
    }

    async fn fill_batch(
        &self,
        context: &SyncContext,
        batch: &mut BatchInfo,
        parts_count: usize,
        first: Option<ChangesPart>,
        token: &CancellationToken,
    ) -> SyncResult<()> {
        let factory = self.serializers.get(&batch.serializer_key)?;
        let mut next = first;
        for index in 0..parts_count {
            let part = match next.take() {
                Some(part) if part.index == index => part,
                _ => self.get_more_changes(context, index, token).await?,
            };
            for mut table in part.tables {
                if !table.has_rows() {
                    continue;
                }
                if let Some(converter) = &self.converter {
                    converter.after_deserialize(&mut table);
                }
                let mut serializer = factory.create_local_serializer();
                let position = batch.next_index();
                batch
                    .save_batch_part_info(position, &table, serializer.as_mut())
                    .await?;
            }
        }
        Ok(())
    }
}
