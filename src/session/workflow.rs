//! Per-user workflow sequencing the guided NL-to-SQL session.
//!
//! Every asynchronous action captures the session epoch when it is issued and
//! re-checks it before applying its result. Resets and newer actions bump the
//! epoch, so a late response from a superseded action is dropped.

use crate::backend::QueryBackend;
use crate::backend::models::ExtractedSchema;
use crate::session::execution::{QueryExecutionCoordinator, rows_to_csv};
use crate::session::generation::{QueryGenerationCoordinator, QuestionInput};
use crate::session::history::{HistoryLogger, HistoryTicket};
use crate::session::recommendations::{RecommendationCache, RecommendationState};
use crate::session::resolver::{ConfigSource, SessionConfigResolver};
use crate::session::schema::{SchemaContextBuilder, TableCatalog, TableSelection};
use crate::session::{
    ConnectionConfig, ConnectionSummary, ContextId, GeneratedQuery, ResolutionError, Row,
    ValidationError, WorkflowError,
};
use crate::store::client::ClientStore;
use crate::store::{ConnectionStore, HistoryStore, SecretStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    SelectConnection,
    SelectTables,
    BuildingContext,
    QueryInput,
    ReviewGeneratedSql,
    Executing,
    Results,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::SelectConnection => "select-connection",
            Step::SelectTables => "select-tables",
            Step::BuildingContext => "building-context",
            Step::QueryInput => "query-input",
            Step::ReviewGeneratedSql => "review-generated-sql",
            Step::Executing => "executing",
            Step::Results => "results",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The asynchronous operation currently awaited, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingOperation {
    ResolvingConfig,
    ListingTables,
    BuildingContext,
    Generating,
    Executing,
}

struct WorkflowState {
    step: Step,
    error: Option<String>,
    pending: Option<PendingOperation>,
    epoch: u64,
    config: Option<ConnectionConfig>,
    catalog: Option<TableCatalog>,
    selection: Option<TableSelection>,
    context: Option<ContextId>,
    recommendations_visible: bool,
    question: String,
    generated: Option<GeneratedQuery>,
    history: Option<HistoryTicket>,
    sql_draft: String,
    rows: Option<Vec<Row>>,
}

impl WorkflowState {
    fn new(epoch: u64) -> Self {
        Self {
            step: Step::SelectConnection,
            error: None,
            pending: None,
            epoch,
            config: None,
            catalog: None,
            selection: None,
            context: None,
            recommendations_visible: false,
            question: String::new(),
            generated: None,
            history: None,
            sql_draft: String::new(),
            rows: None,
        }
    }

    /// Start a new generation of the session; in-flight results become stale.
    fn advance_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn discard_generation(&mut self) {
        self.generated = None;
        self.history = None;
        self.sql_draft.clear();
        self.rows = None;
    }

    fn fail(&mut self, err: WorkflowError) -> WorkflowError {
        self.pending = None;
        self.error = Some(err.to_string());
        err
    }

    fn require(&self, allowed: &[Step], action: &'static str) -> Result<(), WorkflowError> {
        if allowed.contains(&self.step) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                step: self.step,
                action,
            })
        }
    }
}

/// Serializable view of a session. Never carries the password.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub step: Step,
    pub error: Option<String>,
    pub pending: Option<PendingOperation>,
    pub connection: Option<ConnectionSummary>,
    pub tables: Option<TableCatalog>,
    pub selection: Option<TableSelection>,
    pub context: Option<ContextId>,
    pub question: String,
    pub generated: Option<GeneratedQuery>,
    pub sql_draft: String,
    pub rows: Option<Vec<Row>>,
    pub row_count: Option<usize>,
    pub recommendations_visible: bool,
    pub recommendations: RecommendationState,
}

/// Shared services a session is built from.
#[derive(Clone)]
pub struct SessionServices {
    pub backend: Arc<dyn QueryBackend>,
    pub connections: Arc<dyn ConnectionStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub history: Arc<dyn HistoryStore>,
    pub client: Arc<dyn ClientStore>,
    pub recommendation_debounce: Duration,
}

pub struct WorkflowStateMachine {
    user_id: String,
    resolver: SessionConfigResolver,
    schema: SchemaContextBuilder,
    generator: QueryGenerationCoordinator,
    executor: QueryExecutionCoordinator,
    recommendations: RecommendationCache,
    client: Arc<dyn ClientStore>,
    state: Mutex<WorkflowState>,
}

impl WorkflowStateMachine {
    pub fn new(user_id: impl Into<String>, services: &SessionServices) -> Self {
        let history = HistoryLogger::new(services.history.clone());
        Self {
            user_id: user_id.into(),
            resolver: SessionConfigResolver::new(
                services.connections.clone(),
                services.secrets.clone(),
                services.client.clone(),
            ),
            schema: SchemaContextBuilder::new(services.backend.clone()),
            generator: QueryGenerationCoordinator::new(services.backend.clone(), history.clone()),
            executor: QueryExecutionCoordinator::new(services.backend.clone(), history),
            recommendations: RecommendationCache::new(
                services.backend.clone(),
                services.recommendation_debounce,
            ),
            client: services.client.clone(),
            state: Mutex::new(WorkflowState::new(0)),
        }
    }

    async fn lock(&self) -> MutexGuard<'_, WorkflowState> {
        self.state.lock().await
    }

    /// Re-acquire the state for an operation issued at `epoch`, or report it stale.
    async fn reacquire(
        &self,
        epoch: u64,
        operation: &str,
    ) -> Result<MutexGuard<'_, WorkflowState>, WorkflowError> {
        let st = self.lock().await;
        if st.epoch != epoch {
            debug!(
                "Dropping stale {} result for {} (epoch {} != {})",
                operation, self.user_id, epoch, st.epoch
            );
            return Err(WorkflowError::Stale);
        }
        Ok(st)
    }

    /// Drop the active context and everything derived from it, with its
    /// cached recommendations, in one critical section.
    fn discard_context(&self, st: &mut WorkflowState) {
        if let Some(context) = st.context.take() {
            self.recommendations.invalidate(&context);
            debug!("Discarded context {} for {}", context, self.user_id);
        }
        st.recommendations_visible = false;
        st.question.clear();
        st.discard_generation();
    }

    /// Resolve a configuration and list its tables. Restarts the session.
    pub async fn start(&self, source: ConfigSource) -> Result<TableCatalog, WorkflowError> {
        let epoch = {
            let mut st = self.lock().await;
            let epoch = st.advance_epoch();
            self.recommendations.clear();
            *st = WorkflowState::new(epoch);
            if let Some(inline) = &source.inline {
                if let Err(e) = inline.validate() {
                    return Err(st.fail(e.into()));
                }
            }
            st.pending = Some(PendingOperation::ResolvingConfig);
            epoch
        };

        let resolved = self.resolver.resolve(&self.user_id, &source).await;
        let config = {
            let mut st = self.reacquire(epoch, "configuration").await?;
            match resolved {
                Ok(config) => {
                    // Under the lock, so a concurrent start-over clears it afterwards.
                    self.resolver.remember(&self.user_id, &config).await;
                    st.config = Some(config.clone());
                    st.pending = Some(PendingOperation::ListingTables);
                    config
                }
                Err(e) => return Err(st.fail(e.into())),
            }
        };

        let listed = self.schema.list_tables(&config).await;
        let mut st = self.reacquire(epoch, "table listing").await?;
        match listed {
            Ok(catalog) => {
                st.pending = None;
                st.catalog = Some(catalog.clone());
                st.step = Step::SelectTables;
                info!(
                    "Session for {} connected to {}",
                    self.user_id, config.database
                );
                Ok(catalog)
            }
            Err(e) => Err(st.fail(e.into())),
        }
    }

    /// Materialize a context over `tables`. On failure the session stays at
    /// table selection.
    pub async fn select_tables(&self, tables: &[String]) -> Result<ContextId, WorkflowError> {
        let (epoch, config, selection) = {
            let mut st = self.lock().await;
            st.require(&[Step::SelectTables, Step::BuildingContext], "select tables")?;
            let selection = match TableSelection::new(tables) {
                Ok(selection) => selection,
                Err(e) => return Err(st.fail(e.into())),
            };
            let config = match st.config.clone() {
                Some(config) => config,
                None => return Err(st.fail(ResolutionError::ConfigNotFound.into())),
            };

            if let Some(catalog) = &st.catalog {
                for table in selection.tables() {
                    if !catalog.contains(table) {
                        debug!("Table '{}' is not in the listed catalog", table);
                    }
                }
            }

            let epoch = st.advance_epoch();
            self.discard_context(&mut st);
            st.selection = Some(selection.clone());
            st.step = Step::BuildingContext;
            st.pending = Some(PendingOperation::BuildingContext);
            st.error = None;
            (epoch, config, selection)
        };

        let created = self.schema.create_context(&config, &selection).await;
        let mut st = self.reacquire(epoch, "context").await?;
        match created {
            Ok(context) => {
                st.pending = None;
                st.context = Some(context.clone());
                st.step = Step::QueryInput;
                Ok(context)
            }
            Err(e) => {
                st.step = Step::SelectTables;
                Err(st.fail(e.into()))
            }
        }
    }

    /// Return to table selection, discarding the context.
    pub async fn reselect_tables(&self) -> Result<(), WorkflowError> {
        let mut st = self.lock().await;
        st.require(
            &[
                Step::SelectTables,
                Step::BuildingContext,
                Step::QueryInput,
                Step::ReviewGeneratedSql,
                Step::Executing,
                Step::Results,
            ],
            "reselect tables",
        )?;
        st.advance_epoch();
        self.discard_context(&mut st);
        st.step = Step::SelectTables;
        st.pending = None;
        st.error = None;
        Ok(())
    }

    pub async fn preview_schema(&self, table: &str) -> Result<ExtractedSchema, WorkflowError> {
        let config = {
            let st = self.lock().await;
            st.config
                .clone()
                .ok_or(WorkflowError::Resolution(ResolutionError::ConfigNotFound))?
        };
        let selection = TableSelection::new([table])?;
        Ok(self
            .schema
            .preview_schema(&config, selection.primary())
            .await?)
    }

    /// Show recommendations for the active context, scheduling a fetch if needed.
    pub async fn show_recommendations(&self) -> Result<RecommendationState, WorkflowError> {
        let mut st = self.lock().await;
        let Some(context) = st.context.clone() else {
            return Err(WorkflowError::InvalidTransition {
                step: st.step,
                action: "show recommendations",
            });
        };
        st.recommendations_visible = true;
        Ok(self.recommendations.get(&context))
    }

    /// Hide recommendations; a fetch still waiting on its debounce is cancelled.
    pub async fn hide_recommendations(&self) {
        let mut st = self.lock().await;
        st.recommendations_visible = false;
        if let Some(context) = &st.context {
            self.recommendations.cancel(context);
        }
    }

    pub async fn recommendations(&self) -> RecommendationState {
        let st = self.lock().await;
        match &st.context {
            Some(context) => self.recommendations.peek(context),
            None => RecommendationState::Idle,
        }
    }

    pub async fn generate(&self, input: QuestionInput) -> Result<GeneratedQuery, WorkflowError> {
        let (epoch, context, text) = {
            let mut st = self.lock().await;
            st.require(&[Step::QueryInput], "generate SQL")?;
            let text = match input.compose() {
                Ok(text) => text,
                Err(e) => return Err(st.fail(e.into())),
            };
            let Some(context) = st.context.clone() else {
                return Err(WorkflowError::InvalidTransition {
                    step: st.step,
                    action: "generate SQL",
                });
            };
            let epoch = st.advance_epoch();
            st.question = text.clone();
            st.pending = Some(PendingOperation::Generating);
            st.error = None;
            (epoch, context, text)
        };

        let generated = self.generator.generate(&self.user_id, &context, &text).await;
        let mut st = self.reacquire(epoch, "generation").await?;
        match generated {
            Ok((generated, ticket)) => {
                st.pending = None;
                st.sql_draft = generated.sql.clone();
                st.generated = Some(generated.clone());
                st.history = Some(ticket);
                st.rows = None;
                st.step = Step::ReviewGeneratedSql;
                Ok(generated)
            }
            Err(e) => Err(st.fail(e)),
        }
    }

    /// Replace the SQL draft. Executing an edited draft is not linked to history.
    pub async fn edit_sql(&self, sql: String) -> Result<(), WorkflowError> {
        let mut st = self.lock().await;
        st.require(&[Step::ReviewGeneratedSql, Step::Results], "edit SQL")?;
        st.sql_draft = sql;
        st.error = None;
        Ok(())
    }

    /// Run the current draft once. Success or failure both land on results.
    pub async fn execute(&self) -> Result<Vec<Row>, WorkflowError> {
        let (epoch, config, table, sql, correlation) = {
            let mut st = self.lock().await;
            st.require(&[Step::ReviewGeneratedSql, Step::Results], "execute SQL")?;
            let config = match st.config.clone() {
                Some(config) => config,
                None => return Err(st.fail(ResolutionError::ConfigNotFound.into())),
            };
            let sql = st.sql_draft.trim().to_string();
            if sql.is_empty() {
                return Err(st.fail(ValidationError::BlankSql.into()));
            }
            let table = st
                .selection
                .as_ref()
                .map(|s| s.primary().to_string())
                .unwrap_or_default();
            let correlation = match &st.generated {
                Some(generated) if generated.sql.trim() == sql => st.history.clone(),
                _ => None,
            };

            let epoch = st.advance_epoch();
            st.step = Step::Executing;
            st.pending = Some(PendingOperation::Executing);
            st.error = None;
            st.rows = None;
            (epoch, config, table, sql, correlation)
        };

        let executed = self
            .executor
            .execute(&config, &table, &sql, correlation)
            .await;
        let mut st = self.reacquire(epoch, "execution").await?;
        st.step = Step::Results;
        match executed {
            Ok(rows) => {
                st.pending = None;
                st.rows = Some(rows.clone());
                Ok(rows)
            }
            Err(e) => Err(st.fail(e)),
        }
    }

    /// Back to the question, keeping the context.
    pub async fn edit_question(&self) -> Result<(), WorkflowError> {
        let mut st = self.lock().await;
        st.require(
            &[Step::ReviewGeneratedSql, Step::Results],
            "edit the question",
        )?;
        st.advance_epoch();
        st.discard_generation();
        st.step = Step::QueryInput;
        st.pending = None;
        st.error = None;
        Ok(())
    }

    /// Discard the question and everything generated from it, keeping the context.
    pub async fn clear(&self) -> Result<(), WorkflowError> {
        let mut st = self.lock().await;
        st.require(
            &[Step::QueryInput, Step::ReviewGeneratedSql, Step::Results],
            "clear the query",
        )?;
        st.advance_epoch();
        st.question.clear();
        st.discard_generation();
        st.step = Step::QueryInput;
        st.pending = None;
        st.error = None;
        Ok(())
    }

    /// One step back along the workflow.
    pub async fn back(&self) -> Result<Step, WorkflowError> {
        let step = self.lock().await.step;
        match step {
            Step::SelectConnection => {}
            Step::SelectTables => self.start_over().await,
            Step::BuildingContext | Step::QueryInput => self.reselect_tables().await?,
            Step::ReviewGeneratedSql => self.edit_question().await?,
            Step::Executing | Step::Results => {
                let mut st = self.lock().await;
                st.advance_epoch();
                st.rows = None;
                st.pending = None;
                st.error = None;
                st.step = Step::ReviewGeneratedSql;
            }
        }
        Ok(self.lock().await.step)
    }

    /// Forget everything, including the client-stored configuration.
    pub async fn start_over(&self) {
        let mut st = self.lock().await;
        let epoch = st.advance_epoch();
        self.recommendations.clear();
        *st = WorkflowState::new(epoch);
        self.client.clear(&self.user_id).await;
        info!("Session for {} reset", self.user_id);
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let st = self.lock().await;
        let recommendations = match &st.context {
            Some(context) => self.recommendations.peek(context),
            None => RecommendationState::Idle,
        };
        WorkflowSnapshot {
            step: st.step,
            error: st.error.clone(),
            pending: st.pending,
            connection: st.config.as_ref().map(ConnectionConfig::summary),
            tables: st.catalog.clone(),
            selection: st.selection.clone(),
            context: st.context.clone(),
            question: st.question.clone(),
            generated: st.generated.clone(),
            sql_draft: st.sql_draft.clone(),
            row_count: st.rows.as_ref().map(Vec::len),
            rows: st.rows.clone(),
            recommendations_visible: st.recommendations_visible,
            recommendations,
        }
    }

    /// The last results as CSV, if there are any.
    pub async fn results_csv(&self) -> Option<Result<String, csv::Error>> {
        let st = self.lock().await;
        let rows = st.rows.as_ref()?;
        let csv = rows_to_csv(rows);
        if let Err(e) = &csv {
            warn!("Failed to render results for {}: {}", self.user_id, e);
        }
        Some(csv)
    }
}
