//! Set difference between two table definitions.

use super::column::ColumnDefinition;
use super::foreign_key::ForeignKeyDefinition;
use super::index::IndexDefinition;
use super::table::TableDefinition;
use super::trigger::TriggerDefinition;

/// One atomic schema change. [`diff`] emits them in execution order:
/// foreign key drops, trigger drops, index drops, column drops, column
/// modifications, table option changes, column additions, index additions,
/// foreign key additions, trigger creations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    DropForeignKey(ForeignKeyDefinition),
    DropTrigger(TriggerDefinition),
    DropIndex(IndexDefinition),
    DropColumn(ColumnDefinition),
    ModifyColumn {
        from: ColumnDefinition,
        to: ColumnDefinition,
    },
    /// Full set of target table options.
    TableOptions {
        engine: Option<String>,
        charset: Option<String>,
        collation: Option<String>,
        comment: Option<String>,
    },
    AddColumn {
        column: ColumnDefinition,
        after: Option<String>,
    },
    AddIndex(IndexDefinition),
    AddForeignKey(ForeignKeyDefinition),
    CreateTrigger(TriggerDefinition),
}

/// Changes turning `current` into `target`. Columns are matched by name,
/// indexes by column list and uniqueness, foreign keys by their full
/// signature, triggers by name.
pub fn diff(current: &TableDefinition, target: &TableDefinition) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    // Drops
    for fk in &current.foreign_keys {
        if !target
            .foreign_keys
            .iter()
            .any(|f| f.signature() == fk.signature())
        {
            changes.push(SchemaChange::DropForeignKey(fk.clone()));
        }
    }
    for trigger in &current.triggers {
        let kept = target
            .triggers
            .iter()
            .any(|t| t.name == trigger.name && t.is_equivalent(trigger));
        if !kept {
            changes.push(SchemaChange::DropTrigger(trigger.clone()));
        }
    }
    for index in &current.indexes {
        if !target
            .indexes
            .iter()
            .any(|i| same_index(i, index))
        {
            changes.push(SchemaChange::DropIndex(index.clone()));
        }
    }
    for column in &current.columns {
        if !target.has_column(&column.name) {
            changes.push(SchemaChange::DropColumn(column.clone()));
        }
    }

    // Modifications
    for column in &target.columns {
        if let Some(existing) = current.column(&column.name) {
            if existing != column {
                changes.push(SchemaChange::ModifyColumn {
                    from: existing.clone(),
                    to: column.clone(),
                });
            }
        }
    }
    if current.engine != target.engine
        || current.charset != target.charset
        || current.collation != target.collation
        || current.comment != target.comment
    {
        changes.push(SchemaChange::TableOptions {
            engine: target.engine.clone(),
            charset: target.charset.clone(),
            collation: target.collation.clone(),
            comment: target.comment.clone(),
        });
    }

    // Additions
    let mut previous: Option<String> = None;
    for column in &target.columns {
        if !current.has_column(&column.name) {
            changes.push(SchemaChange::AddColumn {
                column: column.clone(),
                after: previous.clone(),
            });
        }
        previous = Some(column.name.clone());
    }
    for index in &target.indexes {
        if !current.indexes.iter().any(|i| same_index(i, index)) {
            changes.push(SchemaChange::AddIndex(index.clone()));
        }
    }
    for fk in &target.foreign_keys {
        if !current
            .foreign_keys
            .iter()
            .any(|f| f.signature() == fk.signature())
        {
            changes.push(SchemaChange::AddForeignKey(fk.clone()));
        }
    }
    for trigger in &target.triggers {
        let present = current
            .triggers
            .iter()
            .any(|t| t.name == trigger.name && t.is_equivalent(trigger));
        if !present {
            changes.push(SchemaChange::CreateTrigger(trigger.clone()));
        }
    }

    changes
}

/// Indexes are the same when columns and uniqueness match. A primary key
/// never matches a plain unique index on the same columns.
fn same_index(a: &IndexDefinition, b: &IndexDefinition) -> bool {
    a.signature() == b.signature() && a.is_primary() == b.is_primary()
}
