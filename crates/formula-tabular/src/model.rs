use crate::backend::{ColumnarTableBackend, InMemoryTableBackend, TableBackend};
use crate::context::{FilterContext, RowContext};
use crate::engine::TabularEngine;
use crate::error::{TabularError, TabularResult};
use crate::parser::{Expr, FilterArg};
use crate::value::Value;
use formula_colstore::ColumnarTable;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    OneToMany,
    OneToOne,
    ManyToMany,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrossFilterDirection {
    /// Filters flow from the to-side (dimension) to the from-side (fact) only.
    Single,
    Both,
}

/// A declared link `from_table[from_column] -> to_table[to_column]`.
///
/// The to-side is the "one" side: for `OneToMany` the from-side is the fact table whose key
/// column references the dimension's key column.
#[derive(Clone, Debug, PartialEq)]
pub struct Relationship {
    pub name: String,
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub cardinality: Cardinality,
    pub cross_filter_direction: CrossFilterDirection,
    pub is_active: bool,
    pub enforce_referential_integrity: bool,
}

#[derive(Clone, Debug)]
pub struct Measure {
    pub name: String,
    pub expression: String,
    pub(crate) parsed: Expr,
}

#[derive(Clone, Debug)]
pub struct CalculatedColumn {
    pub table: String,
    pub name: String,
    pub expression: String,
    pub(crate) parsed: Expr,
}

/// Index sizes for one relationship, exposed for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelationshipIndexStats {
    /// Distinct key values on the to-side.
    pub to_keys: usize,
    /// Distinct key values on the from-side, blank included.
    pub from_keys: usize,
    /// Rows indexed on the from-side.
    pub from_rows: usize,
    /// From-side rows whose key is blank or has no to-side match.
    pub unmatched_from_rows: usize,
}

#[derive(Clone, Debug)]
enum TableStorage {
    InMemory(InMemoryTableBackend),
    Columnar(ColumnarTableBackend),
}

#[derive(Clone, Debug)]
pub struct Table {
    name: String,
    storage: TableStorage,
}

impl Table {
    /// An empty mutable table.
    pub fn new(name: impl Into<String>, columns: Vec<impl Into<String>>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        Self {
            name: name.into(),
            storage: TableStorage::InMemory(InMemoryTableBackend::new(columns)),
        }
    }

    /// An immutable table backed by a host-built columnar store.
    pub fn from_columnar(name: impl Into<String>, table: ColumnarTable) -> Self {
        Self {
            name: name.into(),
            storage: TableStorage::Columnar(ColumnarTableBackend::new(table)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        self.backend().columns()
    }

    pub fn row_count(&self) -> usize {
        self.backend().row_count()
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self.storage, TableStorage::Columnar(_))
    }

    pub fn backend(&self) -> &dyn TableBackend {
        match &self.storage {
            TableStorage::InMemory(backend) => backend,
            TableStorage::Columnar(backend) => backend,
        }
    }

    /// Append a row before the table is registered with a [`DataModel`]. Once registered,
    /// use [`DataModel::insert_row`] so relationship indices stay current.
    pub fn push_row(&mut self, row: Vec<Value>) -> TabularResult<()> {
        let name = self.name.clone();
        self.in_memory_mut("push_row")?.push_row(&name, row)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<Value> {
        self.backend().value(row, column)
    }

    pub(crate) fn column_idx(&self, column: &str) -> Option<usize> {
        self.backend().column_index(column)
    }

    pub(crate) fn value_by_idx(&self, row: usize, idx: usize) -> Option<Value> {
        self.backend().value_by_idx(row, idx)
    }

    pub(crate) fn columnar(&self) -> Option<&ColumnarTableBackend> {
        match &self.storage {
            TableStorage::Columnar(backend) => Some(backend),
            TableStorage::InMemory(_) => None,
        }
    }

    fn in_memory_mut(&mut self, operation: &str) -> TabularResult<&mut InMemoryTableBackend> {
        match &mut self.storage {
            TableStorage::InMemory(backend) => Ok(backend),
            TableStorage::Columnar(_) => Err(TabularError::ImmutableTable {
                table: self.name.clone(),
                operation: operation.to_string(),
            }),
        }
    }
}

/// Rows of the to-side that carry one key value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum KeyRows {
    One(usize),
    /// Only reachable for non-enforced `OneToMany` relationships with duplicate dimension keys.
    Many(Vec<usize>),
}

impl KeyRows {
    pub(crate) fn as_slice(&self) -> &[usize] {
        match self {
            KeyRows::One(row) => std::slice::from_ref(row),
            KeyRows::Many(rows) => rows,
        }
    }

    fn push(&mut self, row: usize) {
        match self {
            KeyRows::One(first) => *self = KeyRows::Many(vec![*first, row]),
            KeyRows::Many(rows) => rows.push(row),
        }
    }

    /// Drop the most recently pushed row; returns `true` when nothing is left.
    fn pop(&mut self) -> bool {
        match self {
            KeyRows::One(_) => true,
            KeyRows::Many(rows) => {
                rows.pop();
                if let [only] = rows.as_slice() {
                    *self = KeyRows::One(*only);
                }
                false
            }
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RelationshipInfo {
    pub(crate) rel: Relationship,
    pub(crate) from_idx: usize,
    pub(crate) to_idx: usize,
    pub(crate) to_index: HashMap<Value, KeyRows>,
    pub(crate) from_index: HashMap<Value, Vec<usize>>,
}

impl RelationshipInfo {
    fn requires_unique_to_keys(&self) -> bool {
        self.rel.cardinality == Cardinality::OneToOne || self.rel.enforce_referential_integrity
    }

    fn build(tables: &HashMap<String, Table>, rel: Relationship) -> TabularResult<Self> {
        let from_table = tables
            .get(&rel.from_table)
            .ok_or_else(|| TabularError::UnknownTable(rel.from_table.clone()))?;
        let to_table = tables
            .get(&rel.to_table)
            .ok_or_else(|| TabularError::UnknownTable(rel.to_table.clone()))?;
        let from_idx =
            from_table
                .column_idx(&rel.from_column)
                .ok_or_else(|| TabularError::UnknownColumn {
                    table: rel.from_table.clone(),
                    column: rel.from_column.clone(),
                })?;
        let to_idx = to_table
            .column_idx(&rel.to_column)
            .ok_or_else(|| TabularError::UnknownColumn {
                table: rel.to_table.clone(),
                column: rel.to_column.clone(),
            })?;

        let mut info = RelationshipInfo {
            rel,
            from_idx,
            to_idx,
            to_index: HashMap::new(),
            from_index: HashMap::new(),
        };
        for row in 0..to_table.row_count() {
            let key = to_table.value_by_idx(row, to_idx).unwrap_or_default();
            info.index_to_row(key, row)?;
        }
        for row in 0..from_table.row_count() {
            let key = from_table.value_by_idx(row, from_idx).unwrap_or_default();
            info.index_from_row(key, row)?;
        }
        Ok(info)
    }

    fn index_to_row(&mut self, key: Value, row: usize) -> TabularResult<()> {
        let unique = self.requires_unique_to_keys();
        match self.to_index.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(KeyRows::One(row));
            }
            Entry::Occupied(slot) if unique => {
                return Err(TabularError::NonUniqueKey {
                    table: self.rel.to_table.clone(),
                    column: self.rel.to_column.clone(),
                    value: slot.key().clone(),
                });
            }
            Entry::Occupied(mut slot) => slot.get_mut().push(row),
        }
        Ok(())
    }

    fn index_from_row(&mut self, key: Value, row: usize) -> TabularResult<()> {
        if self.rel.cardinality == Cardinality::OneToOne && self.from_index.contains_key(&key) {
            return Err(TabularError::NonUniqueKey {
                table: self.rel.from_table.clone(),
                column: self.rel.from_column.clone(),
                value: key,
            });
        }
        if self.rel.enforce_referential_integrity
            && !key.is_blank()
            && !self.to_index.contains_key(&key)
        {
            return Err(TabularError::ReferentialIntegrityViolation {
                relationship: self.rel.name.clone(),
                from_table: self.rel.from_table.clone(),
                from_column: self.rel.from_column.clone(),
                to_table: self.rel.to_table.clone(),
                to_column: self.rel.to_column.clone(),
                value: key,
            });
        }
        self.from_index.entry(key).or_default().push(row);
        Ok(())
    }

    /// `true` when a from-side key has no to-side row to land on.
    pub(crate) fn is_unmatched(&self, key: &Value) -> bool {
        key.is_blank() || !self.to_index.contains_key(key)
    }

    fn stats(&self) -> RelationshipIndexStats {
        RelationshipIndexStats {
            to_keys: self.to_index.len(),
            from_keys: self.from_index.len(),
            from_rows: self.from_index.values().map(Vec::len).sum(),
            unmatched_from_rows: self
                .from_index
                .iter()
                .filter(|(key, _)| self.is_unmatched(key))
                .map(|(_, rows)| rows.len())
                .sum(),
        }
    }
}

/// Undo record for one index entry touched while inserting a row.
enum IndexUndo {
    To { rel: usize, key: Value },
    From { rel: usize, key: Value },
}

#[derive(Clone, Debug, Default)]
pub struct DataModel {
    pub(crate) tables: HashMap<String, Table>,
    pub(crate) relationships: Vec<RelationshipInfo>,
    pub(crate) measures: HashMap<String, Measure>,
    pub(crate) calculated_columns: Vec<CalculatedColumn>,
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn add_table(&mut self, table: Table) -> TabularResult<()> {
        let name = table.name.clone();
        if self.tables.contains_key(&name) {
            return Err(TabularError::DuplicateTable { table: name });
        }
        log::debug!(
            "registered table {name} ({} rows, accelerated: {})",
            table.row_count(),
            table.is_accelerated()
        );
        self.tables.insert(name, table);
        Ok(())
    }

    /// Validate and register a relationship, building both key indices.
    pub fn add_relationship(&mut self, relationship: Relationship) -> TabularResult<()> {
        if relationship.cardinality == Cardinality::ManyToMany {
            return Err(TabularError::UnsupportedCardinality {
                relationship: relationship.name.clone(),
                cardinality: relationship.cardinality,
            });
        }
        if self
            .relationships
            .iter()
            .any(|info| info.rel.name == relationship.name)
        {
            return Err(TabularError::DuplicateRelationship {
                relationship: relationship.name,
            });
        }
        if relationship.is_active {
            if let Some(existing) = self.relationships.iter().find(|info| {
                info.rel.is_active
                    && info.rel.from_table == relationship.from_table
                    && info.rel.to_table == relationship.to_table
            }) {
                return Err(TabularError::AmbiguousRelationship {
                    from_table: relationship.from_table.clone(),
                    to_table: relationship.to_table.clone(),
                    detail: format!(
                        "{} is already active; register {} as inactive",
                        existing.rel.name, relationship.name
                    ),
                });
            }
        }

        let info = RelationshipInfo::build(&self.tables, relationship)?;
        log::debug!(
            "registered relationship {} ({} to-side keys, {} from-side keys)",
            info.rel.name,
            info.to_index.len(),
            info.from_index.len()
        );
        self.relationships.push(info);
        Ok(())
    }

    pub fn add_measure(
        &mut self,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> TabularResult<()> {
        let name = name.into();
        let name = Self::normalize_measure_name(&name).to_string();
        if self.measures.contains_key(&name) {
            return Err(TabularError::DuplicateMeasure { measure: name });
        }
        let expression = expression.into();
        let parsed = crate::parser::parse(&expression)?;
        if self.measure_reaches(&parsed, &name) {
            return Err(TabularError::Eval(format!(
                "measure [{name}] refers to itself"
            )));
        }
        self.measures.insert(
            name.clone(),
            Measure {
                name,
                expression,
                parsed,
            },
        );
        Ok(())
    }

    /// Evaluate `expression` once per row of `table` and append the results as a new column.
    ///
    /// The definition is kept, so later [`DataModel::insert_row`] calls compute the column for
    /// the new row instead of taking it from the caller.
    pub fn add_calculated_column(
        &mut self,
        table: impl Into<String>,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> TabularResult<()> {
        let table = table.into();
        let name = name.into();
        let expression = expression.into();

        let table_ref = self
            .tables
            .get(&table)
            .ok_or_else(|| TabularError::UnknownTable(table.clone()))?;
        if table_ref.is_accelerated() {
            return Err(TabularError::ImmutableTable {
                table,
                operation: "add_calculated_column".into(),
            });
        }
        if table_ref.column_idx(&name).is_some() {
            return Err(TabularError::DuplicateColumn {
                table,
                column: name,
            });
        }

        let parsed = crate::parser::parse(&expression)?;
        let engine = TabularEngine::new();
        let filter = FilterContext::empty();
        let values = (0..table_ref.row_count())
            .map(|row| {
                let row_ctx = RowContext::new().with_row(&table, row);
                engine.evaluate_expr(self, &parsed, &filter, &row_ctx)
            })
            .collect::<TabularResult<Vec<_>>>()?;

        let table_mut = self
            .tables
            .get_mut(&table)
            .ok_or_else(|| TabularError::UnknownTable(table.clone()))?;
        let backend = table_mut.in_memory_mut("add_calculated_column")?;
        backend.add_column(&table, name.clone(), values)?;

        log::debug!("materialized calculated column {table}[{name}]");
        self.calculated_columns.push(CalculatedColumn {
            table,
            name,
            expression,
            parsed,
        });
        Ok(())
    }

    /// Record that an existing column holds the results of `expression`, without evaluating it.
    ///
    /// Hosts use this when the column was persisted with its values. On a mutable table the
    /// column is then computed by [`DataModel::insert_row`] like any other calculated column.
    pub fn add_calculated_column_definition(
        &mut self,
        table: impl Into<String>,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> TabularResult<()> {
        let table = table.into();
        let name = name.into();
        let expression = expression.into();

        let table_ref = self
            .tables
            .get(&table)
            .ok_or_else(|| TabularError::UnknownTable(table.clone()))?;
        if table_ref.column_idx(&name).is_none() {
            return Err(TabularError::UnknownColumn {
                table,
                column: name,
            });
        }
        if self
            .calculated_columns
            .iter()
            .any(|c| c.table == table && c.name == name)
        {
            return Err(TabularError::DuplicateColumn {
                table,
                column: name,
            });
        }

        let parsed = crate::parser::parse(&expression)?;
        self.calculated_columns.push(CalculatedColumn {
            table,
            name,
            expression,
            parsed,
        });
        Ok(())
    }

    /// Append one row to a mutable table.
    ///
    /// `values` supplies the non-calculated columns in schema order. The row is indexed into the
    /// relationships touching the table before its calculated columns are evaluated, so they see
    /// it through relationships; relationships keyed on a calculated column follow once it is
    /// filled. Any failure leaves the table and all indices exactly as they were.
    pub fn insert_row(&mut self, table: &str, values: Vec<Value>) -> TabularResult<()> {
        let table_ref = self
            .tables
            .get(table)
            .ok_or_else(|| TabularError::UnknownTable(table.to_string()))?;
        if table_ref.is_accelerated() {
            return Err(TabularError::ImmutableTable {
                table: table.to_string(),
                operation: "insert_row".into(),
            });
        }

        // (definition position, column index) of each calculated column on this table.
        let calculated = self
            .calculated_columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.table == table)
            .map(|(pos, c)| {
                table_ref
                    .column_idx(&c.name)
                    .map(|idx| (pos, idx))
                    .ok_or_else(|| TabularError::UnknownColumn {
                        table: table.to_string(),
                        column: c.name.clone(),
                    })
            })
            .collect::<TabularResult<Vec<_>>>()?;

        let column_count = table_ref.columns().len();
        let expected = column_count - calculated.len();
        if values.len() != expected {
            return Err(TabularError::SchemaMismatch {
                table: table.to_string(),
                expected,
                actual: values.len(),
            });
        }

        let mut provided = values.into_iter();
        let row: Vec<Value> = (0..column_count)
            .map(|idx| {
                if calculated.iter().any(|&(_, c)| c == idx) {
                    Value::Blank
                } else {
                    provided.next().unwrap_or_default()
                }
            })
            .collect();

        let backend = self.in_memory_mut(table)?;
        backend.push_row(table, row)?;
        let row = backend.row_count() - 1;

        // Relationships keyed on a calculated column wait until that column is filled.
        let is_calculated = |idx: usize| calculated.iter().any(|&(_, c)| c == idx);
        let result = self
            .index_inserted_row(table, row, |idx| !is_calculated(idx))
            .and_then(|undo| {
                let filled = self
                    .fill_calculated_cells(table, row, &calculated)
                    .and_then(|()| self.index_inserted_row(table, row, is_calculated));
                if filled.is_err() {
                    self.unindex_row(undo);
                }
                filled.map(drop)
            });
        if let Err(err) = result {
            log::debug!("rejected insert into {table}: {err}");
            self.in_memory_mut(table)?.pop_row();
            return Err(err);
        }
        Ok(())
    }

    fn in_memory_mut(&mut self, table: &str) -> TabularResult<&mut InMemoryTableBackend> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| TabularError::UnknownTable(table.to_string()))?
            .in_memory_mut("insert_row")
    }

    fn fill_calculated_cells(
        &mut self,
        table: &str,
        row: usize,
        calculated: &[(usize, usize)],
    ) -> TabularResult<()> {
        let engine = TabularEngine::new();
        let filter = FilterContext::empty();
        let row_ctx = RowContext::new().with_row(table, row);
        for &(pos, idx) in calculated {
            let value =
                engine.evaluate_expr(self, &self.calculated_columns[pos].parsed, &filter, &row_ctx)?;
            self.in_memory_mut(table)?.set_value_by_idx(row, idx, value)?;
        }
        Ok(())
    }

    /// Add `row` to every relationship index touching `table` whose key column on that table
    /// passes `include`. On failure nothing stays indexed; on success the returned entries undo
    /// the insertion.
    fn index_inserted_row(
        &mut self,
        table: &str,
        row: usize,
        include: impl Fn(usize) -> bool,
    ) -> TabularResult<Vec<IndexUndo>> {
        let Self {
            tables,
            relationships,
            ..
        } = self;
        let table_ref = tables
            .get(table)
            .ok_or_else(|| TabularError::UnknownTable(table.to_string()))?;

        let mut undo = Vec::new();
        let mut result = Ok(());
        'outer: for (rel, info) in relationships.iter_mut().enumerate() {
            // To-side first so a self-referencing relationship can match its own new row.
            if info.rel.to_table == table && include(info.to_idx) {
                let key = table_ref.value_by_idx(row, info.to_idx).unwrap_or_default();
                if let Err(err) = info.index_to_row(key.clone(), row) {
                    result = Err(err);
                    break 'outer;
                }
                undo.push(IndexUndo::To { rel, key });
            }
            if info.rel.from_table == table && include(info.from_idx) {
                let key = table_ref.value_by_idx(row, info.from_idx).unwrap_or_default();
                if let Err(err) = info.index_from_row(key.clone(), row) {
                    result = Err(err);
                    break 'outer;
                }
                undo.push(IndexUndo::From { rel, key });
            }
        }

        match result {
            Ok(()) => Ok(undo),
            Err(err) => {
                self.unindex_row(undo);
                Err(err)
            }
        }
    }

    fn unindex_row(&mut self, undo: Vec<IndexUndo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                IndexUndo::To { rel, key } => {
                    let index = &mut self.relationships[rel].to_index;
                    if index.get_mut(&key).is_some_and(KeyRows::pop) {
                        index.remove(&key);
                    }
                }
                IndexUndo::From { rel, key } => {
                    let index = &mut self.relationships[rel].from_index;
                    if let Some(rows) = index.get_mut(&key) {
                        rows.pop();
                        if rows.is_empty() {
                            index.remove(&key);
                        }
                    }
                }
            }
        }
    }

    /// Recompute every relationship index from table contents.
    ///
    /// Either all indices are replaced or, when validation fails, none are.
    pub fn rebuild_relationship_indices(&mut self) -> TabularResult<()> {
        let rebuilt = self
            .relationships
            .iter()
            .map(|info| RelationshipInfo::build(&self.tables, info.rel.clone()))
            .collect::<TabularResult<Vec<_>>>()?;
        self.relationships = rebuilt;
        log::debug!("rebuilt {} relationship indices", self.relationships.len());
        Ok(())
    }

    pub fn relationship_index_stats(&self, name: &str) -> Option<RelationshipIndexStats> {
        self.relationships
            .iter()
            .find(|info| info.rel.name == name)
            .map(RelationshipInfo::stats)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().map(|info| &info.rel)
    }

    pub fn measure(&self, name: &str) -> Option<&Measure> {
        self.measures.get(Self::normalize_measure_name(name))
    }

    pub fn calculated_columns(&self) -> &[CalculatedColumn] {
        &self.calculated_columns
    }

    pub fn evaluate_measure(&self, name: &str, filter: &FilterContext) -> TabularResult<Value> {
        let measure = self
            .measure(name)
            .ok_or_else(|| TabularError::UnknownMeasure(name.to_string()))?;
        TabularEngine::new().evaluate_expr(self, &measure.parsed, filter, &RowContext::new())
    }

    /// Index of the relationship joining the two columns, in either orientation.
    pub(crate) fn find_relationship(
        &self,
        left: (&str, &str),
        right: (&str, &str),
    ) -> Option<usize> {
        self.relationships.iter().position(|info| {
            let from = (info.rel.from_table.as_str(), info.rel.from_column.as_str());
            let to = (info.rel.to_table.as_str(), info.rel.to_column.as_str());
            (from == left && to == right) || (from == right && to == left)
        })
    }

    pub(crate) fn table_or_err(&self, name: &str) -> TabularResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| TabularError::UnknownTable(name.to_string()))
    }

    pub(crate) fn column_idx_or_err(&self, table: &str, column: &str) -> TabularResult<usize> {
        self.table_or_err(table)?
            .column_idx(column)
            .ok_or_else(|| TabularError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Whether evaluating `expr` can reach measure `target` through measure references.
    fn measure_reaches(&self, expr: &Expr, target: &str) -> bool {
        let mut pending = Vec::new();
        collect_measure_refs(expr, &mut pending);
        let mut seen = HashSet::new();
        while let Some(name) = pending.pop() {
            if name == target {
                return true;
            }
            if !seen.insert(name) {
                continue;
            }
            if let Some(measure) = self.measures.get(name) {
                collect_measure_refs(&measure.parsed, &mut pending);
            }
        }
        false
    }

    pub(crate) fn normalize_measure_name(name: &str) -> &str {
        name.strip_prefix('[')
            .and_then(|n| n.strip_suffix(']'))
            .unwrap_or(name)
            .trim()
    }
}

fn collect_measure_refs<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Measure(name) => out.push(DataModel::normalize_measure_name(name)),
        Expr::UnaryOp { expr, .. } => collect_measure_refs(expr, out),
        Expr::BinaryOp { left, right, .. } => {
            collect_measure_refs(left, out);
            collect_measure_refs(right, out);
        }
        Expr::Call { args, .. } => args.iter().for_each(|arg| collect_measure_refs(arg, out)),
        Expr::Calculate { expr, filters } | Expr::CalculateTable { table: expr, filters } => {
            collect_measure_refs(expr, out);
            filters.iter().for_each(|arg| filter_arg_measure_refs(arg, out));
        }
        _ => {}
    }
}

fn filter_arg_measure_refs<'a>(arg: &'a FilterArg, out: &mut Vec<&'a str>) {
    match arg {
        FilterArg::Compare { value: expr, .. }
        | FilterArg::Predicate(expr)
        | FilterArg::Table(expr) => collect_measure_refs(expr, out),
        FilterArg::KeepFilters(inner) => filter_arg_measure_refs(inner, out),
        _ => {}
    }
}
