//! Inventory serialization — item trees to and from flat store rows.
//!
//! An inventory is an ordered sequence of [`ItemBlock`]s (slot index plus
//! item). Items can be containers holding further items, so the store
//! representation is a flat row set linked by serial ids:
//!
//! ```text
//! sid   pid   slot  kind  count  attributes
//!   1     0      3   100      1  {"aid": 2000}     <- root, inventory slot 3
//!   2     1      0   200      1  {}                <- first item inside sid 1
//!   3     1      1   101     20  {}                <- second item inside sid 1
//! ```
//!
//! Serial ids (`sid`) are assigned in depth-first order during
//! [`flatten`]; [`build`] sorts rows by sid and re-attaches children by
//! `pid`, which reproduces the original ordering. Attributes are a
//! free-form JSON object so new item properties never require a schema
//! change.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StoreError};

/// Free-form item attributes (action ids, text, charges, ...).
pub type ItemAttributes = serde_json::Map<String, serde_json::Value>;

/// An item as this layer sees it: a type, a stack count, attributes and
/// (for containers) contained items in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item type identifier from the game's item catalog.
    pub kind: u32,
    /// Stack count (1 for non-stackable items).
    pub count: u16,
    /// Free-form attributes.
    #[serde(default)]
    pub attributes: ItemAttributes,
    /// Contained items, in container order. Empty for non-containers.
    #[serde(default)]
    pub contents: Vec<Item>,
}

impl Item {
    /// Create a plain item with no attributes or contents.
    #[must_use]
    pub fn new(kind: u32, count: u16) -> Self {
        Self {
            kind,
            count,
            attributes: ItemAttributes::new(),
            contents: Vec::new(),
        }
    }

    /// Total number of items in this subtree, including self.
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        1 + self.contents.iter().map(Item::subtree_len).sum::<usize>()
    }
}

/// One inventory slot's (position, item) pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBlock {
    /// Inventory slot index.
    pub slot: i32,
    /// The item in that slot (possibly a container tree).
    pub item: Item,
}

/// A single flattened row, ready for insertion into an item table.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRow {
    /// Serial id, unique per owner, depth-first order.
    pub sid: i64,
    /// Parent serial id; 0 for root items.
    pub pid: i64,
    /// Inventory slot for roots, container position for children.
    pub slot: i32,
    /// Item type identifier.
    pub kind: u32,
    /// Stack count.
    pub count: u16,
    /// Attributes serialized as a JSON object.
    pub attributes: String,
}

/// Flatten an ordered inventory into rows, assigning serial ids from
/// `first_sid` upward in depth-first order.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if an attribute map fails to
/// encode (practically unreachable for JSON object maps).
pub fn flatten(blocks: &[ItemBlock], first_sid: i64) -> Result<Vec<ItemRow>> {
    let mut rows = Vec::new();
    let mut next_sid = first_sid;
    for block in blocks {
        flatten_item(&block.item, 0, block.slot, &mut next_sid, &mut rows)?;
    }
    Ok(rows)
}

fn flatten_item(
    item: &Item,
    pid: i64,
    slot: i32,
    next_sid: &mut i64,
    rows: &mut Vec<ItemRow>,
) -> Result<()> {
    let sid = *next_sid;
    *next_sid += 1;

    let attributes = serde_json::to_string(&item.attributes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    rows.push(ItemRow {
        sid,
        pid,
        slot,
        kind: item.kind,
        count: item.count,
        attributes,
    });

    for (position, child) in item.contents.iter().enumerate() {
        let position = i32::try_from(position).unwrap_or(i32::MAX);
        flatten_item(child, sid, position, next_sid, rows)?;
    }
    Ok(())
}

/// Rebuild an ordered inventory from flat rows.
///
/// Rows are processed in ascending sid order; because sids were assigned
/// depth-first, a child's parent always appears before it, and sibling
/// order is preserved. Rows whose `pid` refers to a missing parent are
/// logged and skipped rather than failing the whole load.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if an attribute blob is not a
/// valid JSON object.
pub fn build(mut rows: Vec<ItemRow>) -> Result<Vec<ItemBlock>> {
    rows.sort_by_key(|row| row.sid);

    // Index of each sid within `blocks`, as a path of content indices.
    let mut paths: std::collections::HashMap<i64, Vec<usize>> = std::collections::HashMap::new();
    let mut blocks: Vec<ItemBlock> = Vec::new();

    for row in rows {
        let attributes: ItemAttributes = serde_json::from_str(&row.attributes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let item = Item {
            kind: row.kind,
            count: row.count,
            attributes,
            contents: Vec::new(),
        };

        if row.pid == 0 {
            paths.insert(row.sid, vec![blocks.len()]);
            blocks.push(ItemBlock {
                slot: row.slot,
                item,
            });
        } else if let Some(parent_path) = paths.get(&row.pid).cloned() {
            let parent = resolve_path(&mut blocks, &parent_path);
            let mut path = parent_path;
            path.push(parent.contents.len());
            parent.contents.push(item);
            paths.insert(row.sid, path);
        } else {
            warn!(sid = row.sid, pid = row.pid, "Skipping orphan item row");
        }
    }

    Ok(blocks)
}

/// Follow a path of content indices down to the item it names.
fn resolve_path<'a>(blocks: &'a mut [ItemBlock], path: &[usize]) -> &'a mut Item {
    let mut item = &mut blocks[path[0]].item;
    for &index in &path[1..] {
        item = &mut item.contents[index];
    }
    item
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn backpack() -> Item {
        let mut attributes = ItemAttributes::new();
        attributes.insert("aid".into(), serde_json::json!(2000));
        Item {
            kind: 100,
            count: 1,
            attributes,
            contents: vec![
                Item::new(200, 1),
                Item {
                    kind: 100,
                    count: 1,
                    attributes: ItemAttributes::new(),
                    contents: vec![Item::new(300, 50)],
                },
            ],
        }
    }

    #[test]
    fn flatten_assigns_depth_first_sids() {
        let blocks = vec![
            ItemBlock {
                slot: 3,
                item: backpack(),
            },
            ItemBlock {
                slot: 5,
                item: Item::new(400, 1),
            },
        ];
        let rows = flatten(&blocks, 1).expect("flatten");
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].sid, 1);
        assert_eq!(rows[0].pid, 0);
        assert_eq!(rows[0].slot, 3);
        // Nested backpack's content comes before the second root block.
        assert_eq!(rows[3].pid, 3);
        assert_eq!(rows[4].pid, 0);
        assert_eq!(rows[4].slot, 5);
    }

    #[test]
    fn round_trip_preserves_structure() {
        let blocks = vec![
            ItemBlock {
                slot: 1,
                item: backpack(),
            },
            ItemBlock {
                slot: 8,
                item: Item::new(999, 3),
            },
        ];
        let rows = flatten(&blocks, 1).expect("flatten");
        let rebuilt = build(rows).expect("build");
        assert_eq!(rebuilt, blocks);
    }

    #[test]
    fn round_trip_with_nonzero_first_sid() {
        let blocks = vec![ItemBlock {
            slot: 0,
            item: backpack(),
        }];
        let rows = flatten(&blocks, 40).expect("flatten");
        assert_eq!(rows[0].sid, 40);
        let rebuilt = build(rows).expect("build");
        assert_eq!(rebuilt, blocks);
    }

    #[test]
    fn orphan_rows_are_skipped() {
        let mut rows = flatten(
            &[ItemBlock {
                slot: 1,
                item: Item::new(1, 1),
            }],
            1,
        )
        .expect("flatten");
        rows.push(ItemRow {
            sid: 9,
            pid: 7, // no such parent
            slot: 0,
            kind: 2,
            count: 1,
            attributes: "{}".into(),
        });
        let rebuilt = build(rows).expect("build");
        assert_eq!(rebuilt.len(), 1);
        assert!(rebuilt[0].item.contents.is_empty());
    }

    #[test]
    fn malformed_attributes_fail_the_load() {
        let rows = vec![ItemRow {
            sid: 1,
            pid: 0,
            slot: 0,
            kind: 1,
            count: 1,
            attributes: "not json".into(),
        }];
        assert!(matches!(
            build(rows),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn subtree_len_counts_nested() {
        assert_eq!(backpack().subtree_len(), 4);
    }
}
