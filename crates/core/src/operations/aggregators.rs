// Aggregators - group rows by composite keys and flatten them back

use std::collections::HashMap;

use crate::context::step;
use crate::domain::{Row, RowStream, Value};
use crate::error::{AppError, Result};

/// Values of the grouping columns, in column order
pub type GroupKey = Vec<Value>;

/// Groups in first-seen key order
pub type Groups = Vec<(GroupKey, Vec<Row>)>;

/// Nested grouping, one level per list of columns
#[derive(Debug, Clone, PartialEq)]
pub enum GroupTree {
    Rows(Vec<Row>),
    Levels(Vec<(GroupKey, GroupTree)>),
}

fn key_of(row: &Row, columns: &[String]) -> Result<GroupKey> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().ok_or_else(|| AppError::MissingKey(c.clone())))
        .collect()
}

/// Values are not hashable (decimals), so groups are indexed by their rendering
fn index_key(key: &GroupKey) -> String {
    format!("{:?}", key)
}

fn insert_row(groups: &mut Groups, index: &mut HashMap<String, usize>, key: GroupKey, row: Row) {
    let slot = *index.entry(index_key(&key)).or_insert_with(|| {
        groups.push((key, Vec::new()));
        groups.len() - 1
    });
    groups[slot].1.push(row);
}

pub fn group_by(columns: &[&str], rows: RowStream) -> Result<Groups> {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    step("group_by", || {
        let mut groups = Groups::new();
        let mut index = HashMap::new();
        for row in rows {
            let row = row?;
            let key = key_of(&row, &columns)?;
            insert_row(&mut groups, &mut index, key, row);
        }
        Ok(groups)
    })
}

/// Group by several levels of columns, e.g. `[["region"], ["branch", "desk"]]`
pub fn multilevel_group_by(levels: &[&[&str]], rows: RowStream) -> Result<GroupTree> {
    let levels: Vec<Vec<String>> = levels
        .iter()
        .map(|level| level.iter().map(|c| c.to_string()).collect())
        .collect();
    step("multilevel_group_by", || {
        let rows = rows.collect::<Result<Vec<Row>>>()?;
        build_tree(&levels, rows)
    })
}

fn build_tree(levels: &[Vec<String>], rows: Vec<Row>) -> Result<GroupTree> {
    let Some((columns, rest)) = levels.split_first() else {
        return Ok(GroupTree::Rows(rows));
    };

    let mut groups = Groups::new();
    let mut index = HashMap::new();
    for row in rows {
        let key = key_of(&row, columns)?;
        insert_row(&mut groups, &mut index, key, row);
    }

    groups
        .into_iter()
        .map(|(key, rows)| Ok((key, build_tree(rest, rows)?)))
        .collect::<Result<Vec<_>>>()
        .map(GroupTree::Levels)
}

/// Flatten groups, writing each group key back into its rows
pub fn ungroup(columns: &[&str], groups: Groups) -> Result<RowStream> {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    step("ungroup", || {
        for (key, _) in &groups {
            if key.len() != columns.len() {
                return Err(AppError::Data(format!(
                    "group key has {} values for {} columns",
                    key.len(),
                    columns.len()
                )));
            }
        }
        let rows: RowStream = Box::new(groups.into_iter().flat_map(move |(key, rows)| {
            let named: Vec<(String, Value)> = columns.iter().cloned().zip(key).collect();
            rows.into_iter().map(move |mut row| {
                row.extend(named.iter().cloned());
                Ok(row)
            })
        }));
        Ok(rows)
    })
}
