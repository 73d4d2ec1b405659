//! Per-session converter registry
//!
//! Every session builds its own registry: the built-ins are seeded fresh and
//! user registrations only ever land in the registry of the session they were
//! made on. Nothing here is global.

use super::builtin::{BuiltinConverter, READ_PAIRS, WRITE_PAIRS};
use super::Converter;
use crate::error::{ExcelError, Result};
use crate::types::CellKind;
use crate::value::AppKind;
use indexmap::IndexMap;
use log::debug;
use std::sync::Arc;

type ReadKey = (AppKind, CellKind);

/// Converters of one session, keyed for read and for write
pub struct ConverterRegistry {
    builtin_readers: IndexMap<ReadKey, Arc<dyn Converter>>,
    builtin_writers: IndexMap<AppKind, Arc<dyn Converter>>,
    readers: IndexMap<ReadKey, Arc<dyn Converter>>,
    writers: IndexMap<AppKind, Arc<dyn Converter>>,
    frozen: bool,
}

impl ConverterRegistry {
    /// Fresh registry seeded with the built-in converters
    pub fn with_builtins() -> Self {
        let builtin_readers = READ_PAIRS
            .iter()
            .map(|&(app, cell)| {
                let converter: Arc<dyn Converter> = Arc::new(BuiltinConverter::new(app, cell));
                ((app, cell), converter)
            })
            .collect();
        let builtin_writers = WRITE_PAIRS
            .iter()
            .map(|&(app, cell)| {
                let converter: Arc<dyn Converter> = Arc::new(BuiltinConverter::new(app, cell));
                (app, converter)
            })
            .collect();

        ConverterRegistry {
            builtin_readers,
            builtin_writers,
            readers: IndexMap::new(),
            writers: IndexMap::new(),
            frozen: false,
        }
    }

    /// Add a converter. A later registration for the same key replaces the earlier one.
    pub fn register(&mut self, converter: Arc<dyn Converter>) -> Result<()> {
        if self.frozen {
            return Err(ExcelError::Configuration(format!(
                "cannot register converter {} after the session has started",
                converter.name()
            )));
        }
        let app = converter.app_kind();
        let cell = converter.cell_kind();
        debug!(
            "Registering converter {} for {} <-> {}",
            converter.name(),
            app,
            cell
        );
        self.readers.insert((app, cell), Arc::clone(&converter));
        self.writers.insert(app, converter);
        Ok(())
    }

    /// Reject further registrations
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Read converter: user registrations first, then built-ins
    pub fn resolve(&self, app: AppKind, cell: CellKind) -> Result<Arc<dyn Converter>> {
        lookup(&self.readers, app, cell)
            .or_else(|| lookup(&self.builtin_readers, app, cell))
            .ok_or_else(|| unsupported(app, cell))
    }

    /// Read converter from the built-ins only
    pub fn resolve_builtin(&self, app: AppKind, cell: CellKind) -> Result<Arc<dyn Converter>> {
        lookup(&self.builtin_readers, app, cell).ok_or_else(|| unsupported(app, cell))
    }

    /// Write converter: the last user registration for `app`, then the built-in
    pub fn resolve_writer(&self, app: AppKind) -> Result<Arc<dyn Converter>> {
        self.writers
            .get(&app)
            .or_else(|| self.builtin_writers.get(&app))
            .cloned()
            .ok_or_else(|| unsupported(app, CellKind::Empty))
    }

    /// Write converter from the built-ins only
    pub fn resolve_builtin_writer(&self, app: AppKind) -> Result<Arc<dyn Converter>> {
        self.builtin_writers
            .get(&app)
            .cloned()
            .ok_or_else(|| unsupported(app, CellKind::Empty))
    }

    /// Every converter visible to this session, user registrations first
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Converter>> {
        self.readers
            .values()
            .chain(self.builtin_readers.values())
            .chain(self.builtin_writers.values())
    }

    /// User-registered converters only
    pub fn registered(&self) -> impl Iterator<Item = &Arc<dyn Converter>> {
        self.readers.values()
    }

    /// Whether a converter with this name is visible to the session
    pub fn contains(&self, name: &str) -> bool {
        self.iter().any(|c| c.name() == name)
    }

    /// Whether a converter of type `C` is registered in this session
    pub fn contains_type<C: Converter + 'static>(&self) -> bool {
        self.contains(std::any::type_name::<C>())
    }

    /// Number of read keys (built-in and registered)
    pub fn len(&self) -> usize {
        let overlapping = self
            .readers
            .keys()
            .filter(|key| self.builtin_readers.contains_key(*key))
            .count();
        self.builtin_readers.len() + self.readers.len() - overlapping
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        ConverterRegistry::with_builtins()
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field(
                "registered",
                &self.readers.values().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("builtins", &self.builtin_readers.len())
            .field("frozen", &self.frozen)
            .finish()
    }
}

fn lookup(
    map: &IndexMap<ReadKey, Arc<dyn Converter>>,
    app: AppKind,
    cell: CellKind,
) -> Option<Arc<dyn Converter>> {
    map.get(&(app, cell))
        .or_else(|| {
            cell.lookup_fallback()
                .and_then(|fallback| map.get(&(app, fallback)))
        })
        .cloned()
}

fn unsupported(app: AppKind, cell: CellKind) -> ExcelError {
    ExcelError::UnsupportedType {
        app: app.to_string(),
        cell: cell.to_string(),
    }
}
