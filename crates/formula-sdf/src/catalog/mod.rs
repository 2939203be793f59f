//! The sheet-defined function catalog.
//!
//! Records are reachable by case-folded name and by a stable integer index. Compiled bodies
//! call each other through the index, so an index is never reused: deleting a function
//! leaves an arity-preserving tombstone that answers `#DELETED!`.
//!
//! Structural changes (create, register, delete, regenerate, specialize, reset) run one at
//! a time under a reentrant mutation lock. The table locks are never held across a
//! collaborator call. A record is published (name + index) before its body is compiled,
//! which lets the body refer to the function itself.

mod guard;
mod record;
mod slots;
mod specialize;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use ahash::{AHashMap, AHashSet};
use thiserror::Error;

pub use record::{Origin, Phase, SdfInfo};

use guard::MutationLock;
pub(crate) use record::normalize_name;
use slots::SlotTable;
use specialize::{Claim, SpecializationCache, SpecializationKey};

use crate::address::CellId;
use crate::backend::{Backend, CatalogObserver, CompileError, SdfProgram};
use crate::dispatch::{Applier, Arity, Callable};
use crate::settings::CatalogSettings;
use crate::value::{ErrorKind, FunctionValue, Value};
use crate::MAX_ARITY;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("function {name} declares {got} inputs, at most {max} are supported")]
    InvalidArity {
        name: String,
        got: usize,
        max: usize,
    },
    #[error("unknown function {0}")]
    NotFound(String),
    #[error("{0} is a specialized function and cannot be regenerated")]
    ResidualRegeneration(String),
    #[error("{0} has no compiled body to specialize yet")]
    NotCompiled(String),
    #[error("failed to compile {name}: {source}")]
    Compile {
        name: String,
        #[source]
        source: CompileError,
    },
}

struct Tables {
    by_name: HashMap<String, Arc<SdfInfo>>,
    cell_to_function: AHashMap<CellId, AHashSet<String>>,
    next_index: usize,
}

impl Tables {
    fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            cell_to_function: AHashMap::new(),
            next_index: 0,
        }
    }

    fn index_cells(&mut self, name: &str, cells: &[CellId]) {
        for cell in cells {
            self.cell_to_function
                .entry(*cell)
                .or_default()
                .insert(name.to_string());
        }
    }

    fn unindex_cells(&mut self, name: &str) {
        self.cell_to_function.retain(|_, names| {
            names.remove(name);
            !names.is_empty()
        });
    }
}

/// Output of one compilation, not yet installed.
struct Compiled {
    used_cells: Vec<CellId>,
    is_volatile: bool,
    program: Arc<dyn SdfProgram>,
    body: Applier,
}

pub struct FunctionCatalog {
    backend: Backend,
    settings: CatalogSettings,
    tables: RwLock<Tables>,
    slots: RwLock<SlotTable>,
    specializations: RwLock<Arc<SpecializationCache>>,
    observer: RwLock<Option<Arc<dyn CatalogObserver>>>,
    residual_counter: AtomicU64,
    mutations: MutationLock,
    this: Weak<FunctionCatalog>,
}

impl FunctionCatalog {
    pub fn new(backend: Backend) -> Arc<Self> {
        Self::with_settings(backend, CatalogSettings::default())
    }

    pub fn with_settings(backend: Backend, settings: CatalogSettings) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            backend,
            slots: RwLock::new(SlotTable::with_capacity(settings.initial_capacity)),
            settings,
            tables: RwLock::new(Tables::new()),
            specializations: RwLock::new(Arc::new(SpecializationCache::new())),
            observer: RwLock::new(None),
            residual_counter: AtomicU64::new(0),
            mutations: MutationLock::default(),
            this: this.clone(),
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn CatalogObserver>>) {
        *write(&self.observer) = observer;
    }

    /// Drops every function and rebuilds all tables from scratch. Indices restart at zero.
    pub fn reset(&self) {
        let _guard = self.mutations.acquire();
        let records: Vec<Arc<SdfInfo>> = read(&self.tables).by_name.values().cloned().collect();
        for sdf in &records {
            if !sdf.is_residual() {
                self.backend.namespace.remove(sdf.name());
            }
            sdf.mark_deleted();
        }
        *write(&self.tables) = Tables::new();
        *write(&self.slots) = SlotTable::with_capacity(self.settings.initial_capacity);
        *write(&self.specializations) = Arc::new(SpecializationCache::new());
        log::debug!("function catalog reset ({} functions dropped)", records.len());
    }

    // ----------------------------------------------------------------------------------
    // Lookup
    // ----------------------------------------------------------------------------------

    /// Case-insensitive lookup of a live function.
    pub fn lookup(&self, name: &str) -> Option<Arc<SdfInfo>> {
        read(&self.tables).by_name.get(&normalize_name(name)).cloned()
    }

    /// The live record at `index`, if any.
    pub fn get(&self, index: usize) -> Option<Arc<SdfInfo>> {
        read(&self.slots).record(index).cloned()
    }

    /// The callable installed at `index`. `None` past the end of the table.
    pub fn callable(&self, index: usize) -> Option<Callable> {
        read(&self.slots).callable(index).cloned()
    }

    /// Dispatches through the index table.
    pub fn call_index(&self, index: usize, args: &[Value]) -> Value {
        match self.callable(index) {
            Some(callable) => callable.call(args),
            None => Value::Error(ErrorKind::Ref),
        }
    }

    /// All live records, ordered by index.
    pub fn records(&self) -> Vec<Arc<SdfInfo>> {
        read(&self.slots).live_records().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.tables).by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the index table (always a power of two).
    pub fn capacity(&self) -> usize {
        read(&self.slots).len()
    }

    /// Names of the functions whose compiled bodies read any of `changed`.
    pub fn check_for_modifications(
        &self,
        changed: impl IntoIterator<Item = CellId>,
    ) -> BTreeSet<String> {
        let tables = read(&self.tables);
        let mut names = BTreeSet::new();
        for cell in changed {
            if let Some(users) = tables.cell_to_function.get(&cell) {
                names.extend(users.iter().cloned());
            }
        }
        names
    }

    // ----------------------------------------------------------------------------------
    // Lifecycle
    // ----------------------------------------------------------------------------------

    /// Creates and compiles a function. A second create of a live, compiled name is a no-op.
    pub fn create(
        &self,
        name: &str,
        output: CellId,
        inputs: &[CellId],
    ) -> Result<Arc<SdfInfo>, CatalogError> {
        self.create_inner(name, output, inputs, false)
    }

    fn create_inner(
        &self,
        name: &str,
        output: CellId,
        inputs: &[CellId],
        overwrite: bool,
    ) -> Result<Arc<SdfInfo>, CatalogError> {
        let _guard = self.mutations.acquire();
        let key = normalize_name(name);
        let arity = Arity::new(inputs.len()).ok_or_else(|| CatalogError::InvalidArity {
            name: key.clone(),
            got: inputs.len(),
            max: MAX_ARITY,
        })?;

        let (sdf, fresh) = match self.lookup(&key) {
            Some(existing) if !overwrite && !existing.is_placeholder() => {
                log::debug!("function {key} already exists; create is a no-op");
                return Ok(existing);
            }
            Some(existing) => (existing, false),
            None => self.register_with(output, inputs.to_vec(), &key, arity, Origin::Sheet),
        };

        let compiled = match self.compile(&sdf) {
            Ok(compiled) => compiled,
            Err(source) => {
                if fresh {
                    self.rollback(&sdf);
                } else if !sdf.is_placeholder() {
                    log::warn!("regenerating {key} failed, keeping previous body: {source}");
                }
                return Err(CatalogError::Compile { name: key, source });
            }
        };

        let is_volatile = compiled.is_volatile;
        self.install(&sdf, compiled);
        self.publish_in_namespace(&sdf, is_volatile);
        if fresh {
            log::debug!("created function {key} at index {}", sdf.index());
            if let Some(observer) = read(&self.observer).clone() {
                observer.function_created(&key);
            }
        }
        Ok(sdf)
    }

    /// Registers `name`, or returns the existing record unchanged.
    pub fn register(
        &self,
        output: CellId,
        inputs: &[CellId],
        name: &str,
    ) -> Result<Arc<SdfInfo>, CatalogError> {
        let key = normalize_name(name);
        let arity = Arity::new(inputs.len()).ok_or_else(|| CatalogError::InvalidArity {
            name: key.clone(),
            got: inputs.len(),
            max: MAX_ARITY,
        })?;
        let _guard = self.mutations.acquire();
        Ok(self
            .register_with(output, inputs.to_vec(), &key, arity, Origin::Sheet)
            .0)
    }

    fn register_with(
        &self,
        output: CellId,
        inputs: Vec<CellId>,
        key: &str,
        arity: Arity,
        origin: Origin,
    ) -> (Arc<SdfInfo>, bool) {
        let mut tables = write(&self.tables);
        if let Some(existing) = tables.by_name.get(key) {
            return (existing.clone(), false);
        }
        let index = tables.next_index;
        tables.next_index += 1;
        let sdf = Arc::new(SdfInfo::new(
            key.to_string(),
            index,
            output,
            inputs,
            arity,
            origin,
        ));
        tables.by_name.insert(key.to_string(), sdf.clone());

        let mut slots = write(&self.slots);
        slots.set_callable(index, Callable::Pending(arity));
        slots.set_record(index, Some(sdf.clone()));
        (sdf, true)
    }

    /// Installs `callable` at the record's index.
    pub fn update(&self, sdf: &SdfInfo, callable: Callable) {
        let _guard = self.mutations.acquire();
        write(&self.slots).set_callable(sdf.index(), callable.clone());
        sdf.set_callable(callable);
    }

    /// Retires a record: the name disappears and its index keeps a tombstone.
    pub fn unregister(&self, sdf: &SdfInfo) {
        let _guard = self.mutations.acquire();
        let mut tables = write(&self.tables);
        let owns_name = tables
            .by_name
            .get(sdf.name())
            .is_some_and(|current| current.index() == sdf.index());
        if owns_name {
            tables.by_name.remove(sdf.name());
        }
        let mut slots = write(&self.slots);
        slots.set_callable(sdf.index(), Callable::Deleted(sdf.arity()));
        slots.set_record(sdf.index(), None);
        drop(slots);
        drop(tables);
        sdf.mark_deleted();
        if sdf.is_residual() && self.specialization_cache().forget(sdf.index()) > 0 {
            log::trace!("dropped cached specialization {}", sdf.name());
        }
    }

    /// Deletes `name`. Returns `false` if no such function exists.
    pub fn delete(&self, name: &str) -> bool {
        let _guard = self.mutations.acquire();
        let Some(sdf) = self.lookup(name) else {
            return false;
        };
        self.unregister(&sdf);
        write(&self.tables).unindex_cells(sdf.name());
        self.backend.namespace.remove(sdf.name());
        log::debug!("deleted function {} (index {} retired)", sdf.name(), sdf.index());
        if let Some(observer) = read(&self.observer).clone() {
            observer.function_deleted(sdf.name());
        }
        true
    }

    /// Recompiles a sheet function in place. Index and identity are preserved; if the new
    /// body fails to compile the previous one stays installed.
    pub fn regenerate(&self, name: &str) -> Result<Arc<SdfInfo>, CatalogError> {
        let sdf = self
            .lookup(name)
            .ok_or_else(|| CatalogError::NotFound(normalize_name(name)))?;
        self.regenerate_record(&sdf)
    }

    pub fn regenerate_record(&self, sdf: &Arc<SdfInfo>) -> Result<Arc<SdfInfo>, CatalogError> {
        let _guard = self.mutations.acquire();
        if sdf.is_residual() {
            return Err(CatalogError::ResidualRegeneration(sdf.name().to_string()));
        }
        if sdf.phase() == Phase::Deleted {
            return Err(CatalogError::NotFound(sdf.name().to_string()));
        }
        let previous_cells = sdf.used_cells();
        let previous_entry = self.backend.namespace.get(sdf.name());
        write(&self.tables).unindex_cells(sdf.name());
        self.backend.namespace.remove(sdf.name());

        let result = self.create_inner(sdf.name(), sdf.output(), sdf.inputs(), true);
        if result.is_err() {
            write(&self.tables).index_cells(sdf.name(), &previous_cells);
            if let Some(entry) = previous_entry {
                self.backend
                    .namespace
                    .register(sdf.name(), entry.applier, entry.is_volatile);
            }
        } else {
            log::debug!("regenerated function {} at index {}", sdf.name(), sdf.index());
        }
        result
    }

    /// Regenerates every live sheet function. Returns the failures; each failed function
    /// keeps its previous body.
    pub fn regenerate_all(&self) -> Vec<(String, CatalogError)> {
        let _guard = self.mutations.acquire();
        let mut failures = Vec::new();
        for sdf in self.records() {
            if sdf.is_residual() {
                continue;
            }
            if let Err(err) = self.regenerate_record(&sdf) {
                failures.push((sdf.name().to_string(), err));
            }
        }
        failures
    }

    // ----------------------------------------------------------------------------------
    // Specialization
    // ----------------------------------------------------------------------------------

    /// Compiles (once) the residual function of a partial application.
    pub fn specialize(&self, value: &FunctionValue) -> Result<Arc<SdfInfo>, CatalogError> {
        let cache = self.specialization_cache();
        let key = SpecializationKey::new(value);
        if let Some(hit) = cache.get(&key) {
            return Ok(hit);
        }

        let _guard = self.mutations.acquire();
        let base = value.sdf();
        let program = base
            .program()
            .ok_or_else(|| CatalogError::NotCompiled(base.name().to_string()))?;
        let residual_inputs = program.residual_inputs(value);
        let arity = Arity::new(residual_inputs.len()).ok_or_else(|| {
            CatalogError::InvalidArity {
                name: base.name().to_string(),
                got: residual_inputs.len(),
                max: MAX_ARITY,
            }
        })?;

        let claim = cache.claim(key.clone(), || {
            Ok::<_, CatalogError>(self.register_residual(base, &residual_inputs, arity))
        })?;
        let sdf = match claim {
            Claim::Existing(sdf) => return Ok(sdf),
            Claim::Claimed(sdf) => sdf,
        };

        let compiled = self.handle().and_then(|catalog| {
            let residual = program.partial_evaluate(&catalog, value.args(), &residual_inputs)?;
            let body = residual.compile_to_callable(&catalog, &sdf)?;
            Ok((residual, body))
        });
        match compiled {
            Ok((residual, body)) => {
                self.install(
                    &sdf,
                    Compiled {
                        used_cells: base.used_cells(),
                        is_volatile: base.is_volatile(),
                        program: residual,
                        body,
                    },
                );
                log::debug!(
                    "specialized {} as {} (arity {arity})",
                    base.name(),
                    sdf.name()
                );
                Ok(sdf)
            }
            Err(source) => {
                cache.remove(&key);
                self.rollback(&sdf);
                Err(CatalogError::Compile {
                    name: sdf.name().to_string(),
                    source,
                })
            }
        }
    }

    /// Bound-argument sequences of the cached specializations of `name`.
    pub fn pending_specializations(&self, name: &str) -> Vec<Arc<[Value]>> {
        self.specialization_cache().pending(&normalize_name(name))
    }

    pub fn specialization_count(&self) -> usize {
        self.specialization_cache().len()
    }

    fn register_residual(
        &self,
        base: &Arc<SdfInfo>,
        residual_inputs: &[CellId],
        arity: Arity,
    ) -> Arc<SdfInfo> {
        loop {
            let n = self.residual_counter.fetch_add(1, Ordering::Relaxed) + 1;
            let name = format!("{}{}{n}", base.name(), self.settings.residual_separator);
            let (sdf, fresh) = self.register_with(
                base.output(),
                residual_inputs.to_vec(),
                &name,
                arity,
                Origin::Residual { base: base.clone() },
            );
            if fresh {
                return sdf;
            }
        }
    }

    // ----------------------------------------------------------------------------------
    // Internals
    // ----------------------------------------------------------------------------------

    fn compile(&self, sdf: &Arc<SdfInfo>) -> Result<Compiled, CompileError> {
        let catalog = self.handle()?;
        let cells = &*self.backend.cells;
        let graph = self.backend.graphs.build(sdf.output(), sdf.inputs(), cells)?;
        let order = graph.precedent_order();
        let is_volatile = order.iter().any(|cell| cells.is_volatile(*cell));
        let program = self
            .backend
            .codegen
            .generate(&catalog, sdf, &order, cells)?;
        let used_cells = graph.referenced_cells();
        let body = program.compile_to_callable(&catalog, sdf)?;
        Ok(Compiled {
            used_cells,
            is_volatile,
            program,
            body,
        })
    }

    fn install(&self, sdf: &Arc<SdfInfo>, compiled: Compiled) {
        if !sdf.is_residual() {
            write(&self.tables).index_cells(sdf.name(), &compiled.used_cells);
        }
        sdf.install(compiled.is_volatile, compiled.used_cells, compiled.program);
        self.update(sdf, Callable::compiled(sdf.arity(), compiled.body));
    }

    fn publish_in_namespace(&self, sdf: &SdfInfo, is_volatile: bool) {
        let applier = self.index_applier(sdf.index());
        let namespace = &self.backend.namespace;
        if !namespace.update_applier(sdf.name(), applier.clone(), is_volatile) {
            namespace.register(sdf.name(), applier, is_volatile);
        }
    }

    /// An applier that calls whatever is installed at `index` when it runs.
    fn index_applier(&self, index: usize) -> Applier {
        let catalog = self.this.clone();
        Arc::new(move |args: &[Value]| match catalog.upgrade() {
            Some(catalog) => catalog.call_index(index, args),
            None => Value::Error(ErrorKind::Ref),
        })
    }

    /// Undoes a registration whose first compilation failed.
    /// Drops a record whose first compile failed. Its index stays consumed: the
    /// in-flight record may already have been handed out.
    fn rollback(&self, sdf: &SdfInfo) {
        write(&self.tables).by_name.remove(sdf.name());
        let mut slots = write(&self.slots);
        slots.set_callable(sdf.index(), Callable::Deleted(sdf.arity()));
        slots.set_record(sdf.index(), None);
        drop(slots);
        sdf.mark_deleted();
    }

    fn specialization_cache(&self) -> Arc<SpecializationCache> {
        read(&self.specializations).clone()
    }

    fn handle(&self) -> Result<Arc<FunctionCatalog>, CompileError> {
        self.this
            .upgrade()
            .ok_or_else(|| CompileError::Unsupported("function catalog is shutting down".into()))
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
