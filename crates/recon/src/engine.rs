//! Reconciliation orchestrator.
//!
//! An [`Engine`] holds everything registered at startup. Each job gets its
//! own [`EngineSession`], which binds the job's mapping and arguments once
//! and then previews rows or runs the import exactly once.

use std::collections::HashSet;

use log::{debug, info, warn};
use sheetsync_io::{ColumnId, Row, TabularSource};

use crate::binding::ColumnBinding;
use crate::config::EngineSettings;
use crate::context::{ContextDefinition, ContextRegistry};
use crate::error::{ImportError, ImportFailure, ValidationErrors};
use crate::job::{ImportCounters, ImportJob};
use crate::mapping::{FieldMappingRegistry, TargetSchema};
use crate::materializer::{delete_scope, identity_constraints, resolve_arguments, ResolvedArgument, RowMaterializer};
use crate::reference::{PassthroughResolver, ReferenceResolver};
use crate::repository::{Constraint, Entity, Query, Repository};
use crate::resolver::IdentityResolver;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    contexts: ContextRegistry,
    registry: FieldMappingRegistry,
    resolver: Box<dyn ReferenceResolver>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(contexts: ContextRegistry, registry: FieldMappingRegistry) -> Self {
        Self {
            contexts,
            registry,
            resolver: Box::new(PassthroughResolver),
            settings: EngineSettings::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: impl ReferenceResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    pub fn registry(&self) -> &FieldMappingRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &dyn ReferenceResolver {
        self.resolver.as_ref()
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn initialize<'a, E: Entity + 'static>(
        &'a self,
        job: &'a ImportJob,
        source: &'a dyn TabularSource,
    ) -> Result<EngineSession<'a, E>, ImportError> {
        EngineSession::initialize(
            job,
            &self.contexts,
            &self.registry,
            source,
            self.resolver.as_ref(),
            self.settings,
        )
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
    Failed,
}

/// One job bound to its context, schema and source.
pub struct EngineSession<'a, E> {
    job: &'a ImportJob,
    context: &'a ContextDefinition,
    schema: &'a TargetSchema<E>,
    source: &'a dyn TabularSource,
    binding: ColumnBinding,
    arguments: Vec<ResolvedArgument>,
    identity: Vec<Constraint>,
    scope: Vec<Constraint>,
    settings: EngineSettings,
    state: RunState,
}

impl<'a, E: Entity + 'static> EngineSession<'a, E> {
    /// Bind `job` for processing. Every configuration problem surfaces
    /// here, before any row is read.
    pub fn initialize(
        job: &'a ImportJob,
        contexts: &'a ContextRegistry,
        registry: &'a FieldMappingRegistry,
        source: &'a dyn TabularSource,
        resolver: &dyn ReferenceResolver,
        settings: EngineSettings,
    ) -> Result<Self, ImportError> {
        settings.validate()?;
        let context = contexts.get(&job.context)?;
        let schema = registry.schema::<E>(&context.target)?;
        let binding = ColumnBinding::new(&job.mapping)?;

        for bound in binding.bindings() {
            if schema.table().get(&bound.property).is_none() {
                return Err(ImportError::Configuration(format!(
                    "target '{}' has no mapped property '{}'",
                    context.target, bound.property
                )));
            }
            let setter = bound.mapping.setter_name(&bound.property);
            if !schema.has_setter(&setter) {
                return Err(ImportError::Configuration(format!(
                    "target '{}' has no setter '{setter}' for property '{}'",
                    context.target, bound.property
                )));
            }
            if let Some(query) = bound.mapping.query_property.as_deref() {
                if bound.mapping.identifier && E::default().field(query).is_none() {
                    return Err(ImportError::Configuration(format!(
                        "target '{}' has no field '{query}' (query_property of '{}')",
                        context.target, bound.property
                    )));
                }
            }
        }

        let arguments = resolve_arguments(context, &job.arguments, resolver)?;
        for argument in arguments.iter().filter(|a| a.value.is_some()) {
            if !schema.has_setter(&argument.setter) {
                return Err(ImportError::Configuration(format!(
                    "target '{}' has no setter '{}' for argument '{}'",
                    context.target, argument.setter, argument.name
                )));
            }
        }

        let width = source.columns().len();
        for bound in binding.bindings() {
            if bound.column.index() >= width {
                warn!(
                    "property '{}' is bound to column {} but the file has {width} columns",
                    bound.property, bound.column
                );
            }
        }

        let identity = identity_constraints(&arguments);
        let scope = delete_scope(&arguments);
        Ok(Self {
            job,
            context,
            schema,
            source,
            binding,
            arguments,
            identity,
            scope,
            settings,
            state: RunState::NotStarted,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn context(&self) -> &ContextDefinition {
        self.context
    }

    pub fn binding(&self) -> &ColumnBinding {
        &self.binding
    }

    pub fn list_columns(&self) -> Vec<(ColumnId, String)> {
        self.source.columns()
    }

    pub fn count_data_rows(&self) -> usize {
        self.source.row_count()
    }

    /// What data row `row_number` would produce, without touching any
    /// repository. Rejected cells and failed validation are reported in
    /// `errors`; the entity keeps every value that was accepted.
    pub fn materialize_preview(&self, row_number: usize) -> Result<Preview<E>, ImportError> {
        let row = self.source.row(row_number)?;
        let mut entity = E::default();
        let mut errors = match self.materializer().populate(&mut entity, &row) {
            Ok(()) => ValidationErrors::new(),
            Err(ImportError::Validation(rejected)) => rejected,
            Err(e) => return Err(e),
        };
        if let Err(invalid) = self.schema.validate(&entity) {
            for message in invalid.messages() {
                errors.push(message.clone());
            }
        }

        let fields = self
            .binding
            .bindings()
            .iter()
            .map(|b| {
                let getter = b.mapping.getter_name(&b.property);
                let value = self.schema.get(&getter, &entity)?;
                Ok::<_, ImportError>((b.property.clone(), value))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Preview {
            entity,
            fields,
            errors: (!errors.is_empty()).then_some(errors),
        })
    }

    /// Bound properties of data row `row_number` as read back through their
    /// getters. Rejected cells show the entity's default.
    pub fn mapping_preview(&self, row_number: usize) -> Result<Vec<(String, Value)>, ImportError> {
        Ok(self.materialize_preview(row_number)?.fields)
    }

    /// Synchronize the file into `repo`. A session runs at most once.
    pub fn run<R: Repository<E>>(&mut self, repo: &mut R) -> Result<ImportCounters, ImportFailure> {
        if self.state != RunState::NotStarted {
            return Err(ImportFailure {
                error: ImportError::Configuration("import session has already run".into()),
                committed: ImportCounters::default(),
            });
        }
        self.state = RunState::Running;
        info!(
            "importing {} into context '{}' ({} rows, flags {:?})",
            self.job.file.display(),
            self.context.name,
            self.source.row_count(),
            self.job.flags
        );

        let mut progress = Progress::new(self.settings.records_per_flush);
        match self.reconcile(repo, &mut progress) {
            Ok(()) => {
                self.state = RunState::Completed;
                let counters = progress.snapshot();
                info!("import finished: {counters} ({} flushes)", progress.flushes);
                Ok(counters)
            }
            Err(error) => {
                self.state = RunState::Failed;
                log::error!(
                    "import aborted after {} rows: {error}; committed {}",
                    progress.rows,
                    progress.committed
                );
                Err(ImportFailure {
                    error,
                    committed: progress.committed,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn materializer(&self) -> RowMaterializer<'_, E> {
        RowMaterializer::new(self.schema, &self.binding, &self.arguments)
    }

    fn reconcile<R: Repository<E>>(
        &self,
        repo: &mut R,
        progress: &mut Progress,
    ) -> Result<(), ImportError> {
        let flags = self.job.flags;
        let materializer = self.materializer();
        let resolver = IdentityResolver::new(&materializer, &self.identity);
        let mut processed: HashSet<R::Id> = HashSet::new();

        for row in self.source.rows() {
            let row = row?;
            progress.rows += 1;

            let existing = match resolver.find_existing(&row, repo) {
                Ok(existing) => existing,
                Err(ImportError::Validation(errors)) => {
                    warn!("row {}: skipped, identifier rejected: {errors}", row.number());
                    continue;
                }
                Err(e) => return Err(e),
            };

            match existing {
                Some((id, mut entity)) => {
                    processed.insert(id.clone());
                    if !flags.update {
                        debug!("row {}: matches {id}, updates disabled", row.number());
                        continue;
                    }
                    if !self.prepare(&materializer, &mut entity, &row)? {
                        continue;
                    }
                    repo.update(&id, entity)?;
                    progress.counters.updated += 1;
                    debug!("row {}: updated {id}", row.number());
                    Self::written(repo, progress)?;
                }
                None => {
                    if !flags.insert {
                        debug!("row {}: no match, inserts disabled", row.number());
                        continue;
                    }
                    let mut entity = E::default();
                    if !self.prepare(&materializer, &mut entity, &row)? {
                        continue;
                    }
                    let id = repo.add(entity)?;
                    debug!("row {}: inserted {id}", row.number());
                    processed.insert(id);
                    progress.counters.inserted += 1;
                    Self::written(repo, progress)?;
                }
            }
        }

        if flags.delete {
            let mut scope = Query::new();
            for c in &self.scope {
                scope.push(c.field.clone(), c.value.clone());
            }
            let stale: Vec<R::Id> = repo
                .find_all(&scope)?
                .into_iter()
                .map(|(id, _)| id)
                .filter(|id| !processed.contains(id))
                .collect();
            debug!("delete pass: {} stale records in scope [{scope}]", stale.len());
            for id in stale {
                repo.remove(&id)?;
                progress.counters.deleted += 1;
                Self::written(repo, progress)?;
            }
        }

        Self::flush(repo, progress)
    }

    fn written<R: Repository<E>>(repo: &mut R, progress: &mut Progress) -> Result<(), ImportError> {
        progress.pending += 1;
        if progress.pending >= progress.per_flush {
            Self::flush(repo, progress)?;
        }
        Ok(())
    }

    fn flush<R: Repository<E>>(repo: &mut R, progress: &mut Progress) -> Result<(), ImportError> {
        repo.flush()?;
        progress.committed();
        Ok(())
    }

    /// Populate and validate. `false` means the row is skipped.
    fn prepare(
        &self,
        materializer: &RowMaterializer<'_, E>,
        entity: &mut E,
        row: &Row,
    ) -> Result<bool, ImportError> {
        let result = materializer
            .populate(entity, row)
            .and_then(|()| self.schema.validate(entity).map_err(ImportError::Validation));
        match result {
            Ok(()) => Ok(true),
            Err(ImportError::Validation(errors)) => {
                skipped_invalid(row, &errors);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn skipped_invalid(row: &Row, errors: &ValidationErrors) {
    warn!("row {}: skipped, {errors}", row.number());
}

/// One row as the import would see it.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview<E> {
    pub entity: E,
    /// Bound properties read back through their getters, in mapping order.
    pub fields: Vec<(String, Value)>,
    /// `Some` when the row would be skipped.
    pub errors: Option<ValidationErrors>,
}

impl<E> Preview<E> {
    pub fn is_valid(&self) -> bool {
        self.errors.is_none()
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Counters plus the flush window.
struct Progress {
    counters: ImportCounters,
    committed: ImportCounters,
    rows: usize,
    pending: usize,
    per_flush: usize,
    flushes: usize,
}

impl Progress {
    fn new(per_flush: usize) -> Self {
        Self {
            counters: ImportCounters::default(),
            committed: ImportCounters::default(),
            rows: 0,
            pending: 0,
            per_flush,
            flushes: 0,
        }
    }

    fn snapshot(&self) -> ImportCounters {
        ImportCounters {
            skipped: self.rows - self.counters.inserted - self.counters.updated,
            ..self.counters
        }
    }

    fn committed(&mut self) {
        self.flushes += 1;
        self.pending = 0;
        self.committed = self.snapshot();
        debug!("flush {}: committed {}", self.flushes, self.committed);
    }
}
