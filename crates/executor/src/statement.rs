//! DML statement descriptions
//!
//! Statement kinds are tagged variants dispatched by the yieldable loop,
//! not a trait hierarchy: the executor upstream hands the core one of three
//! shapes plus the statement text for error annotation and logging.

/// Predicate deciding whether a row participates in a delete or update.
pub type RowFilter<K, V> = Box<dyn FnMut(&K, &V) -> bool + Send>;

/// SET-clause application: committed row in, replacement row out.
pub type RowTransform<V> = Box<dyn FnMut(&V) -> V + Send>;

/// Row-level hooks fired around each mutation. `before` returning false
/// vetoes the row; `after` observes completed mutations.
pub struct RowHooks<V> {
    pub before: Option<Box<dyn FnMut(&V) -> bool + Send>>,
    pub after: Option<Box<dyn FnMut(&V) + Send>>,
}

impl<V> Default for RowHooks<V> {
    fn default() -> Self {
        Self {
            before: None,
            after: None,
        }
    }
}

/// The operation a DML statement performs.
pub enum DmlOp<K, V> {
    Delete {
        filter: RowFilter<K, V>,
    },
    Update {
        filter: RowFilter<K, V>,
        apply: RowTransform<V>,
    },
    Insert {
        rows: Vec<(K, V)>,
    },
}

/// One DML statement: delete, update, or insert, with an optional row
/// limit and row hooks.
pub struct DmlStatement<K, V> {
    pub text: String,
    pub op: DmlOp<K, V>,
    pub limit: Option<usize>,
    pub hooks: RowHooks<V>,
}

impl<K, V> DmlStatement<K, V> {
    pub fn delete(text: impl Into<String>, filter: RowFilter<K, V>) -> Self {
        Self {
            text: text.into(),
            op: DmlOp::Delete { filter },
            limit: None,
            hooks: RowHooks::default(),
        }
    }

    pub fn update(
        text: impl Into<String>,
        filter: RowFilter<K, V>,
        apply: RowTransform<V>,
    ) -> Self {
        Self {
            text: text.into(),
            op: DmlOp::Update { filter, apply },
            limit: None,
            hooks: RowHooks::default(),
        }
    }

    pub fn insert(text: impl Into<String>, rows: Vec<(K, V)>) -> Self {
        Self {
            text: text.into(),
            op: DmlOp::Insert { rows },
            limit: None,
            hooks: RowHooks::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_hooks(mut self, hooks: RowHooks<V>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn kind(&self) -> &'static str {
        match self.op {
            DmlOp::Delete { .. } => "DELETE",
            DmlOp::Update { .. } => "UPDATE",
            DmlOp::Insert { .. } => "INSERT",
        }
    }
}
