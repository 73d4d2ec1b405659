//! Per-session context: registry, holder chain, position and state

use crate::converter::{ConverterRegistry, GlobalConfig, Resolved};
use crate::error::Result;
use crate::holder::Holder;
use crate::types::CellKind;
use crate::value::AppKind;
use std::sync::Arc;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Converters may still be registered
    Building,
    /// Reading or writing has started; the registry is frozen
    Active,
    /// `finish()` was called
    Finished,
}

/// Read engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Idle,
    OpeningArchive,
    SheetScan,
    RowStreaming,
    Finished,
    Error,
}

/// Write engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    HeaderWritten,
    RowStreaming,
    Flushing,
    Finished,
}

/// Sheet currently being processed
#[derive(Debug, Clone)]
pub struct SheetScope {
    pub index: usize,
    pub name: String,
    pub holder: Arc<Holder>,
}

/// State shared by the engines of one session
#[derive(Debug)]
pub struct Context<S> {
    registry: ConverterRegistry,
    root: Arc<Holder>,
    global: GlobalConfig,
    sheet: Option<SheetScope>,
    row: Option<u32>,
    session: SessionState,
    state: S,
}

pub type ReadContext = Context<ReadState>;
pub type WriteContext = Context<WriteState>;

impl<S: Copy> Context<S> {
    pub(crate) fn new(
        registry: ConverterRegistry,
        root: Arc<Holder>,
        global: GlobalConfig,
        state: S,
    ) -> Self {
        Context {
            registry,
            root,
            global,
            sheet: None,
            row: None,
            session: SessionState::Building,
            state,
        }
    }

    /// Registry of this session
    pub fn converter_registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut ConverterRegistry {
        &mut self.registry
    }

    /// Nearest holder: the current sheet's, or the session's before any sheet
    pub fn current_holder(&self) -> HolderRef<'_> {
        let holder = self
            .sheet
            .as_ref()
            .map(|s| s.holder.as_ref())
            .unwrap_or(self.root.as_ref());
        HolderRef {
            holder,
            registry: &self.registry,
        }
    }

    pub fn root_holder(&self) -> &Arc<Holder> {
        &self.root
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub(crate) fn set_date1904(&mut self, date1904: bool) {
        self.global.date1904 = date1904;
    }

    pub fn sheet(&self) -> Option<&SheetScope> {
        self.sheet.as_ref()
    }

    pub fn sheet_name(&self) -> &str {
        self.sheet.as_ref().map(|s| s.name.as_str()).unwrap_or("")
    }

    pub(crate) fn enter_sheet(&mut self, scope: SheetScope) {
        self.sheet = Some(scope);
        self.row = None;
    }

    pub(crate) fn leave_sheet(&mut self) {
        self.sheet = None;
        self.row = None;
    }

    /// 0-based index of the row being processed
    pub fn row_index(&self) -> Option<u32> {
        self.row
    }

    pub(crate) fn set_row(&mut self, row: u32) {
        self.row = Some(row);
    }

    pub fn session_state(&self) -> SessionState {
        self.session
    }

    /// Freeze the registry and move to `Active`; no-op once active
    pub(crate) fn activate(&mut self) {
        if self.session == SessionState::Building {
            self.registry.freeze();
            self.session = SessionState::Active;
        }
    }

    pub(crate) fn close(&mut self) {
        self.session = SessionState::Finished;
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: S) {
        self.state = state;
    }
}

/// Borrowed view of one holder together with the session's registry
#[derive(Clone, Copy)]
pub struct HolderRef<'a> {
    holder: &'a Holder,
    registry: &'a ConverterRegistry,
}

impl<'a> HolderRef<'a> {
    pub fn holder(&self) -> &'a Holder {
        self.holder
    }

    pub fn converter_registry(&self) -> &'a ConverterRegistry {
        self.registry
    }

    pub fn resolve_read(&self, app: AppKind, cell: CellKind) -> Result<Resolved> {
        self.holder.resolve_read(self.registry, app, cell)
    }

    pub fn resolve_write(&self, app: AppKind) -> Result<Resolved> {
        self.holder.resolve_write(self.registry, app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::{HolderConfig, HolderScope};

    #[test]
    fn test_current_holder_follows_sheet() {
        let root = Holder::session(HolderConfig::new());
        let mut ctx = ReadContext::new(
            ConverterRegistry::with_builtins(),
            Arc::clone(&root),
            GlobalConfig::default(),
            ReadState::Idle,
        );
        assert_eq!(ctx.current_holder().holder().scope(), HolderScope::Session);

        ctx.enter_sheet(SheetScope {
            index: 0,
            name: "Data".into(),
            holder: Holder::sheet(&root, "Data", HolderConfig::new()),
        });
        ctx.set_row(4);
        assert_eq!(ctx.current_holder().holder().scope(), HolderScope::Sheet);
        assert_eq!(ctx.sheet_name(), "Data");
        assert_eq!(ctx.row_index(), Some(4));

        ctx.leave_sheet();
        assert_eq!(ctx.row_index(), None);
    }

    #[test]
    fn test_activate_freezes_registry() {
        let mut ctx = WriteContext::new(
            ConverterRegistry::with_builtins(),
            Holder::session(HolderConfig::new()),
            GlobalConfig::default(),
            WriteState::Idle,
        );
        assert_eq!(ctx.session_state(), SessionState::Building);
        ctx.activate();
        assert!(ctx.converter_registry().is_frozen());
        assert_eq!(ctx.session_state(), SessionState::Active);
        assert!(ctx
            .current_holder()
            .resolve_write(AppKind::Integer)
            .is_ok());
    }
}
