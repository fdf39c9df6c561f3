use std::collections::HashSet;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bridge_api::{BridgeError, NormalizedRecord, Readiness, StorageBackend};

use crate::error::PipelineError;
use crate::line::render;
use crate::PRECISION;

// ═══════════════════════════════════════════════════════════════
//  Write pipeline: channel → create db → use db → insert line
// ═══════════════════════════════════════════════════════════════

/// Пишет нормализованные записи в backend, создавая базы по требованию.
///
/// Единственный владелец множества известных баз, поэтому без блокировок.
/// Если писателей станет несколько, множество должно стать общим под
/// мьютексом, иначе `create_database` может уйти дважды.
pub struct WritePipeline {
    backend: Box<dyn StorageBackend>,
    known_databases: HashSet<String>,
    readiness: Readiness,
}

impl WritePipeline {
    pub fn new(backend: Box<dyn StorageBackend>, readiness: Readiness) -> Self {
        Self {
            backend,
            known_databases: HashSet::new(),
            readiness,
        }
    }

    /// Базы, существование которых уже подтверждено.
    pub fn known_databases(&self) -> &HashSet<String> {
        &self.known_databases
    }

    /// Читать канал до его закрытия или отмены. Возвращает ошибку только
    /// если она фатальна; ошибки отдельных записей логируются.
    pub async fn run(
        &mut self,
        mut rx: mpsc::Receiver<NormalizedRecord>,
        token: CancellationToken,
    ) -> Result<(), PipelineError> {
        loop {
            let record = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                record = rx.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
            };

            if let Err(e) = self.write(&record).await {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(
                    database = %record.database,
                    table = %record.table,
                    error = %e,
                    "dropping record"
                );
            }
        }

        Ok(())
    }

    /// Записать одну запись.
    pub async fn write(&mut self, record: &NormalizedRecord) -> Result<(), PipelineError> {
        self.ensure_database(&record.database).await?;

        self.backend
            .use_database(&record.database)
            .await
            .map_err(|source| escalate(source, |source| PipelineError::DatabaseSelect {
                database: record.database.clone(),
                source,
            }))?;
        self.readiness.mark_ready();

        let line = render(record, PRECISION);
        tracing::debug!(database = %record.database, %line, "inserting");

        self.backend
            .insert_lines(std::slice::from_ref(&line), PRECISION)
            .await
            .map_err(|source| escalate(source, |source| PipelineError::BackendWrite {
                database: record.database.clone(),
                source,
            }))?;

        Ok(())
    }

    async fn ensure_database(&mut self, database: &str) -> Result<(), PipelineError> {
        if self.known_databases.contains(database) {
            return Ok(());
        }

        tracing::info!(%database, "creating database");
        self.backend
            .create_database(database)
            .await
            .map_err(|source| escalate(source, |source| PipelineError::DatabaseProvision {
                database: database.to_string(),
                source,
            }))?;

        self.known_databases.insert(database.to_string());
        self.readiness.mark_ready();
        Ok(())
    }
}

/// Ошибка соединения фатальна независимо от того, на каком шаге возникла.
fn escalate(source: BridgeError, local: impl FnOnce(BridgeError) -> PipelineError) -> PipelineError {
    if source.is_connection() {
        PipelineError::BackendConnectionLost(source)
    } else {
        local(source)
    }
}

/// Запустить write pipeline отдельной задачей. Фатальная ошибка уходит в
/// `fatal`.
pub fn spawn_writer(
    mut writer: WritePipeline,
    rx: mpsc::Receiver<NormalizedRecord>,
    fatal: mpsc::Sender<PipelineError>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("writer starting");
        if let Err(e) = writer.run(rx, token).await {
            tracing::error!(error = %e, "writer failed");
            let _ = fatal.send(e).await;
        }
        tracing::info!(databases = writer.known_databases().len(), "writer stopped");
    })
}
