//! Configuration holder chain
//!
//! Holders form a tree rooted at the session: session -> sheet -> field. Each
//! holder may override converters, the date/number format, the "use default
//! converter" flag and the raw flag. Resolution walks from the leaf to the root
//! and then falls through to the session's registry.

use crate::converter::{Converter, ConverterRegistry, Resolved};
use crate::error::Result;
use crate::schema::FieldDescriptor;
use crate::types::CellKind;
use crate::value::AppKind;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Level of a holder in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderScope {
    Session,
    Sheet,
    Field,
}

/// Overrides carried by one holder
#[derive(Clone, Default)]
pub struct HolderConfig {
    converters: IndexMap<AppKind, Arc<dyn Converter>>,
    format: Option<String>,
    use_default_converter: bool,
    raw: bool,
}

impl HolderConfig {
    pub fn new() -> Self {
        HolderConfig::default()
    }

    /// Override the converter for the converter's application kind at this level
    pub fn converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converters
            .insert(converter.app_kind(), Arc::new(converter));
        self
    }

    pub fn format(mut self, pattern: impl Into<String>) -> Self {
        self.format = Some(pattern.into());
        self
    }

    pub fn use_default_converter(mut self, enabled: bool) -> Self {
        self.use_default_converter = enabled;
        self
    }

    pub fn raw(mut self, enabled: bool) -> Self {
        self.raw = enabled;
        self
    }

    pub(crate) fn from_field(field: &FieldDescriptor) -> Self {
        let mut converters = IndexMap::new();
        if let Some(converter) = &field.converter {
            converters.insert(field.kind, Arc::clone(converter));
        }
        HolderConfig {
            converters,
            format: field.format.clone(),
            use_default_converter: field.use_default_converter,
            raw: field.raw,
        }
    }
}

impl fmt::Debug for HolderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HolderConfig")
            .field(
                "converters",
                &self
                    .converters
                    .iter()
                    .map(|(kind, c)| (kind, c.name()))
                    .collect::<Vec<_>>(),
            )
            .field("format", &self.format)
            .field("use_default_converter", &self.use_default_converter)
            .field("raw", &self.raw)
            .finish()
    }
}

/// One node of the chain
#[derive(Debug)]
pub struct Holder {
    scope: HolderScope,
    name: String,
    parent: Option<Arc<Holder>>,
    config: HolderConfig,
}

/// What a holder chain decides before the registry is consulted
enum Decision {
    Identity,
    Converter(Arc<dyn Converter>),
    BuiltinOnly,
    Registry,
}

impl Holder {
    /// Root holder of a session
    pub fn session(config: HolderConfig) -> Arc<Holder> {
        Arc::new(Holder {
            scope: HolderScope::Session,
            name: String::from("session"),
            parent: None,
            config,
        })
    }

    /// Sheet holder under a session holder
    pub fn sheet(parent: &Arc<Holder>, name: impl Into<String>, config: HolderConfig) -> Arc<Holder> {
        Arc::new(Holder {
            scope: HolderScope::Sheet,
            name: name.into(),
            parent: Some(Arc::clone(parent)),
            config,
        })
    }

    /// Field holder under a sheet holder
    pub fn field(parent: &Arc<Holder>, field: &FieldDescriptor) -> Arc<Holder> {
        Arc::new(Holder {
            scope: HolderScope::Field,
            name: field.name.clone(),
            parent: Some(Arc::clone(parent)),
            config: HolderConfig::from_field(field),
        })
    }

    pub fn scope(&self) -> HolderScope {
        self.scope
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Holder>> {
        self.parent.as_ref()
    }

    /// This holder followed by its ancestors up to the session
    pub fn chain(&self) -> impl Iterator<Item = &Holder> {
        std::iter::successors(Some(self), |holder| holder.parent.as_deref())
    }

    fn decide(&self, app: AppKind) -> Decision {
        if app == AppKind::Cell {
            return Decision::Identity;
        }
        for holder in self.chain() {
            if holder.config.raw {
                return Decision::Identity;
            }
            if let Some(converter) = holder.config.converters.get(&app) {
                return Decision::Converter(Arc::clone(converter));
            }
            if holder.config.use_default_converter {
                return Decision::BuiltinOnly;
            }
        }
        Decision::Registry
    }

    /// Whether reads of `app` pass the raw cell through untouched
    pub fn is_identity(&self, app: AppKind) -> bool {
        matches!(self.decide(app), Decision::Identity)
    }

    /// Converter for reading a `cell`-kind cell into `app`
    pub fn resolve_read(
        &self,
        registry: &ConverterRegistry,
        app: AppKind,
        cell: CellKind,
    ) -> Result<Resolved> {
        match self.decide(app) {
            Decision::Identity => Ok(Resolved::Identity),
            Decision::Converter(converter) => Ok(Resolved::Converter(converter)),
            Decision::BuiltinOnly => registry.resolve_builtin(app, cell).map(Resolved::Converter),
            Decision::Registry => registry.resolve(app, cell).map(Resolved::Converter),
        }
    }

    /// Converter for writing an `app` value
    pub fn resolve_write(&self, registry: &ConverterRegistry, app: AppKind) -> Result<Resolved> {
        match self.decide(app) {
            Decision::Identity => Ok(Resolved::Identity),
            Decision::Converter(converter) => Ok(Resolved::Converter(converter)),
            Decision::BuiltinOnly => registry.resolve_builtin_writer(app).map(Resolved::Converter),
            Decision::Registry => registry.resolve_writer(app).map(Resolved::Converter),
        }
    }

    /// Nearest format pattern along the chain
    pub fn resolve_format(&self) -> Option<&str> {
        self.chain().find_map(|holder| holder.config.format.as_deref())
    }
}

/// A field bound to a column, with its leaf holder
#[derive(Debug, Clone)]
pub(crate) struct FieldBinding {
    pub field: FieldDescriptor,
    pub column: u32,
    pub holder: Arc<Holder>,
}

impl FieldBinding {
    pub fn new(field: FieldDescriptor, column: u32, sheet: &Arc<Holder>) -> Self {
        let holder = Holder::field(sheet, &field);
        FieldBinding {
            field,
            column,
            holder,
        }
    }

    pub fn format(&self) -> Option<&str> {
        self.holder.resolve_format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{FieldConfig, GlobalConfig};
    use crate::types::CellValue;
    use crate::value::Value;

    struct Tagged(&'static str);

    impl Converter for Tagged {
        fn app_kind(&self) -> AppKind {
            AppKind::Text
        }

        fn cell_kind(&self) -> CellKind {
            CellKind::String
        }

        fn to_value(&self, _: &CellValue, _: &FieldConfig<'_>, _: &GlobalConfig) -> Result<Value> {
            Ok(Value::Text(self.0.to_string()))
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    fn chain(
        session: HolderConfig,
        sheet: HolderConfig,
        field: FieldDescriptor,
    ) -> Arc<Holder> {
        let root = Holder::session(session);
        let sheet = Holder::sheet(&root, "Sheet1", sheet);
        Holder::field(&sheet, &field)
    }

    fn resolved_name(holder: &Holder, registry: &ConverterRegistry) -> String {
        holder
            .resolve_read(registry, AppKind::Text, CellKind::String)
            .unwrap()
            .name()
            .to_string()
    }

    #[test]
    fn test_nearest_override_wins() {
        let mut registry = ConverterRegistry::with_builtins();
        registry.register(Arc::new(Tagged("registry"))).unwrap();

        let leaf = chain(
            HolderConfig::new().converter(Tagged("session")),
            HolderConfig::new().converter(Tagged("sheet")),
            FieldDescriptor::new("name", AppKind::Text).converter(Tagged("field")),
        );
        assert_eq!(resolved_name(&leaf, &registry), "field");

        let leaf = chain(
            HolderConfig::new().converter(Tagged("session")),
            HolderConfig::new().converter(Tagged("sheet")),
            FieldDescriptor::new("name", AppKind::Text),
        );
        assert_eq!(resolved_name(&leaf, &registry), "sheet");

        let leaf = chain(
            HolderConfig::new(),
            HolderConfig::new(),
            FieldDescriptor::new("name", AppKind::Text),
        );
        assert_eq!(resolved_name(&leaf, &registry), "registry");
    }

    #[test]
    fn test_use_default_skips_registry_overrides() {
        let mut registry = ConverterRegistry::with_builtins();
        registry.register(Arc::new(Tagged("registry"))).unwrap();

        let leaf = chain(
            HolderConfig::new().converter(Tagged("session")),
            HolderConfig::new(),
            FieldDescriptor::new("name", AppKind::Text).use_default_converter(),
        );
        assert_eq!(resolved_name(&leaf, &registry), "builtin");
    }

    #[test]
    fn test_raw_and_cell_kind_are_identity() {
        let registry = ConverterRegistry::with_builtins();
        let leaf = chain(
            HolderConfig::new(),
            HolderConfig::new().raw(true),
            FieldDescriptor::new("name", AppKind::Text),
        );
        assert!(leaf.is_identity(AppKind::Text));
        assert!(matches!(
            leaf.resolve_write(&registry, AppKind::Text).unwrap(),
            Resolved::Identity
        ));

        let plain = chain(
            HolderConfig::new(),
            HolderConfig::new(),
            FieldDescriptor::new("cell", AppKind::Cell),
        );
        assert!(plain.is_identity(AppKind::Cell));
    }

    #[test]
    fn test_format_resolution() {
        let leaf = chain(
            HolderConfig::new().format("%Y-%m-%d"),
            HolderConfig::new(),
            FieldDescriptor::new("born", AppKind::Date),
        );
        assert_eq!(leaf.resolve_format(), Some("%Y-%m-%d"));

        let leaf = chain(
            HolderConfig::new().format("%Y-%m-%d"),
            HolderConfig::new().format("%d/%m/%Y"),
            FieldDescriptor::new("born", AppKind::Date).format("%m/%d/%Y"),
        );
        assert_eq!(leaf.resolve_format(), Some("%m/%d/%Y"));
        assert_eq!(leaf.chain().count(), 3);
        assert_eq!(leaf.scope(), HolderScope::Field);
    }
}
