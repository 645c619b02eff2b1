//! The three composite kinds of one store

use crate::composite::{CompositeSpecification, Sources};
use crate::search::SearchComposite;
use crate::table::TableComposite;
use crate::view::ViewComposite;
use std::sync::Arc;
use strata_spec::CompositeKind;
use strata_store::SearchProvider;

/// Views, tables and search documents sharing one set of sources
#[derive(Debug, Clone)]
pub struct Composites {
    /// Views
    pub views: ViewComposite,
    /// Table rows
    pub tables: TableComposite,
    /// Search documents
    pub search: SearchComposite,
}

impl Composites {
    /// Create all three kinds over `sources`
    #[must_use]
    pub fn new(sources: &Sources, provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            views: ViewComposite::new(sources.clone()),
            tables: TableComposite::new(sources.clone()),
            search: SearchComposite::new(sources.clone(), provider),
        }
    }

    /// The implementation for `kind`
    #[must_use]
    pub fn get(&self, kind: CompositeKind) -> &dyn CompositeSpecification {
        match kind {
            CompositeKind::View => &self.views,
            CompositeKind::Table => &self.tables,
            CompositeKind::Search => &self.search,
        }
    }

    /// Every kind in materialization order
    pub fn iter(&self) -> impl Iterator<Item = &dyn CompositeSpecification> {
        CompositeKind::ALL.into_iter().map(|k| self.get(k))
    }
}
