/*!
 * Path-indexed property tree
 *
 * Fetch results arrive as flat (dotted path, value) records. This module
 * rebuilds them into a nested structure that can be read back either one
 * dotted path at a time or as whole subtrees, and flattened again into the
 * wire shape via `fullitems`.
 */

use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{PropRecord, PropValue};

/// Errors from property tree access
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("no value at path '{path}'")]
    NotFound { path: String },

    #[error("empty segment in path '{path}'")]
    EmptySegment { path: String },
}

/// One node of the tree.
///
/// A branch may carry a direct value of its own: the server can populate
/// both `a.b` and `a.b.c`, in which case the value of `a.b` lives in the
/// branch's `own` slot while `c` is an ordinary child.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(PropValue),
    Branch {
        children: BTreeMap<String, Node>,
        own: Option<PropValue>,
    },
}

impl Node {
    fn branch() -> Node {
        Node::Branch {
            children: BTreeMap::new(),
            own: None,
        }
    }
}

/// Result of a permissive `get`: either the direct value at the path, or
/// the whole subtree when the path names a branch with no direct value.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeValue<'a> {
    Value(&'a PropValue),
    Subtree(&'a BTreeMap<String, Node>),
}

impl<'a> TreeValue<'a> {
    pub fn as_value(&self) -> Option<&'a PropValue> {
        match self {
            TreeValue::Value(v) => Some(v),
            TreeValue::Subtree(_) => None,
        }
    }
}

/// Nested map keyed by dot-separated property paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyTree {
    root: BTreeMap<String, Node>,
}

impl PropertyTree {
    pub fn new() -> Self {
        PropertyTree::default()
    }

    /// Build a tree from flat fetch records by replaying each dotted path.
    pub fn from_propset(propset: &[PropRecord]) -> Result<Self, TreeError> {
        let mut tree = PropertyTree::new();
        for rec in propset {
            tree.set(&rec.name, rec.value.clone())?;
        }
        Ok(tree)
    }

    /// Recursively convert an externally supplied value graph.
    ///
    /// Maps become branches, arrays of uniform `{key, value}` records become
    /// branches keyed by `key`, everything else is a leaf. Live remote
    /// handles stop the recursion: following them would walk an unbounded,
    /// possibly cyclic server-side graph.
    pub fn deep(record: &BTreeMap<String, PropValue>) -> Self {
        let root = record
            .iter()
            .map(|(k, v)| (k.clone(), deep_node(v)))
            .collect();
        PropertyTree { root }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Permissive lookup: the direct value if the path has one, else the
    /// whole subtree, else `None`.
    pub fn get(&self, path: &str) -> Option<TreeValue<'_>> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        let mut current = &self.root;
        for (i, seg) in segments.iter().enumerate() {
            let node = current.get(*seg)?;
            let last = i + 1 == segments.len();
            match node {
                Node::Leaf(v) => {
                    return if last { Some(TreeValue::Value(v)) } else { None };
                }
                Node::Branch { children, own } => {
                    if last {
                        return match own {
                            Some(v) => Some(TreeValue::Value(v)),
                            None => Some(TreeValue::Subtree(children)),
                        };
                    }
                    current = children;
                }
            }
        }
        None
    }

    /// Strict lookup: only a direct value at the exact path counts.
    pub fn get_strict(&self, path: &str) -> Result<&PropValue, TreeError> {
        match self.get(path) {
            Some(TreeValue::Value(v)) => Ok(v),
            _ => Err(TreeError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Store a value at a dotted path, creating intermediate branches as
    /// needed. A leaf encountered mid-path is demoted to a branch and its
    /// value preserved in the branch's own slot.
    pub fn set(&mut self, path: &str, value: impl Into<PropValue>) -> Result<(), TreeError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(TreeError::EmptySegment {
                path: path.to_string(),
            });
        }
        let value = value.into();
        let mut current = &mut self.root;
        let (last, inner) = segments.split_last().expect("path has at least one segment");

        for seg in inner {
            let node = current.entry(seg.to_string()).or_insert_with(Node::branch);
            if let Node::Leaf(_) = node {
                let prior = match std::mem::replace(node, Node::branch()) {
                    Node::Leaf(v) => v,
                    Node::Branch { .. } => unreachable!(),
                };
                if let Node::Branch { own, .. } = node {
                    *own = Some(prior);
                }
            }
            current = match node {
                Node::Branch { children, .. } => children,
                Node::Leaf(_) => unreachable!(),
            };
        }

        match current.get_mut(*last) {
            Some(Node::Branch { own, .. }) => *own = Some(value),
            _ => {
                current.insert(last.to_string(), Node::Leaf(value));
            }
        }
        Ok(())
    }

    /// Delete the direct value at a path if one exists, otherwise the whole
    /// subtree. Branches left holding only their own value collapse back to
    /// leaves; emptied branches are pruned, recursively toward the root.
    pub fn delete(&mut self, path: &str) -> Result<(), TreeError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(TreeError::EmptySegment {
                path: path.to_string(),
            });
        }
        delete_in(&mut self.root, &segments).map_err(|_| TreeError::NotFound {
            path: path.to_string(),
        })
    }

    /// All dotted paths holding a direct value, depth-first, parents before
    /// children, siblings in key order.
    pub fn fullkeys(&self) -> Vec<String> {
        self.fullitems().into_iter().map(|(k, _)| k).collect()
    }

    /// All `(dotted path, value)` pairs. Replaying these with `set` onto a
    /// fresh tree reproduces an equivalent tree.
    pub fn fullitems(&self) -> Vec<(String, PropValue)> {
        let mut items = Vec::new();
        collect_items(&self.root, String::new(), &mut items);
        items
    }
}

fn deep_node(value: &PropValue) -> Node {
    match value {
        PropValue::Map(m) => Node::Branch {
            children: m.iter().map(|(k, v)| (k.clone(), deep_node(v))).collect(),
            own: None,
        },
        PropValue::List(items) if !items.is_empty() => match uniform_kv_entries(items) {
            Some(entries) => Node::Branch {
                children: entries
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), deep_node(v)))
                    .collect(),
                own: None,
            },
            None => Node::Leaf(value.clone()),
        },
        // Scalars, refs, empty lists
        other => Node::Leaf(other.clone()),
    }
}

/// Check whether every list element is a `{key, value}` record with a
/// string key; such lists are really maps in the wire format.
fn uniform_kv_entries(items: &[PropValue]) -> Option<Vec<(&str, &PropValue)>> {
    items
        .iter()
        .map(|item| {
            let map = item.as_map()?;
            let key = map.get("key")?.as_str()?;
            let value = map.get("value")?;
            Some((key, value))
        })
        .collect()
}

// Returns Err(()) when nothing exists at the path; the caller re-attaches
// the full dotted path for the diagnostic.
fn delete_in(map: &mut BTreeMap<String, Node>, segments: &[&str]) -> Result<(), ()> {
    let (head, rest) = segments.split_first().ok_or(())?;
    if rest.is_empty() {
        match map.get_mut(*head) {
            None => return Err(()),
            Some(Node::Leaf(_)) => {
                map.remove(*head);
            }
            Some(Node::Branch { children, own }) => {
                if own.is_some() {
                    *own = None;
                    if children.is_empty() {
                        map.remove(*head);
                    }
                } else {
                    map.remove(*head);
                }
            }
        }
        return Ok(());
    }

    let node = map.get_mut(*head).ok_or(())?;
    let collapse = match node {
        Node::Leaf(_) => return Err(()),
        Node::Branch { children, own } => {
            delete_in(children, rest)?;
            if children.is_empty() {
                Some(own.take())
            } else {
                None
            }
        }
    };
    match collapse {
        Some(Some(v)) => *node = Node::Leaf(v),
        Some(None) => {
            map.remove(*head);
        }
        None => {}
    }
    Ok(())
}

fn collect_items(map: &BTreeMap<String, Node>, prefix: String, out: &mut Vec<(String, PropValue)>) {
    for (key, node) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match node {
            Node::Leaf(v) => out.push((path, v.clone())),
            Node::Branch { children, own } => {
                // Own value first so replay demotes it back into the slot
                if let Some(v) = own {
                    out.push((path.clone(), v.clone()));
                }
                collect_items(children, path, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> PropertyTree {
        PropertyTree::new()
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut t = tree();
        t.set("a.b.c", "deep").unwrap();
        t.set("name", "vm1").unwrap();
        assert_eq!(t.get_strict("a.b.c").unwrap().as_str(), Some("deep"));
        assert_eq!(t.get_strict("name").unwrap().as_str(), Some("vm1"));
    }

    #[test]
    fn test_leaf_demotion_preserves_value() {
        let mut t = tree();
        t.set("a.b", "mid").unwrap();
        t.set("a.b.c", "deep").unwrap();
        // Both remain retrievable
        assert_eq!(t.get_strict("a.b").unwrap().as_str(), Some("mid"));
        assert_eq!(t.get_strict("a.b.c").unwrap().as_str(), Some("deep"));
    }

    #[test]
    fn test_permissive_get_returns_subtree() {
        let mut t = tree();
        t.set("a.b.c", 1i64).unwrap();
        match t.get("a.b") {
            Some(TreeValue::Subtree(children)) => {
                assert!(children.contains_key("c"));
            }
            other => panic!("expected subtree, got {:?}", other),
        }
        // A subtree result carries no direct value; a leaf result does
        assert!(t.get("a.b").unwrap().as_value().is_none());
        assert_eq!(
            t.get("a.b.c").unwrap().as_value(),
            Some(&PropValue::Int(1))
        );
        assert!(t.get_strict("a.b").is_err());
    }

    #[test]
    fn test_get_absent() {
        let mut t = tree();
        t.set("a.b", 1i64).unwrap();
        assert!(t.get("a.x").is_none());
        assert!(t.get("a.b.c").is_none());
        assert!(t.get_strict("a.x").is_err());
    }

    #[test]
    fn test_delete_leaf_collapses_parent() {
        let mut t = tree();
        t.set("a.b", "mid").unwrap();
        t.set("a.b.c", "deep").unwrap();
        t.delete("a.b.c").unwrap();
        // Branch at a.b held only its own value; it collapses to a leaf
        assert_eq!(t.get_strict("a.b").unwrap().as_str(), Some("mid"));
        t.delete("a.b").unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn test_delete_own_value_keeps_subtree() {
        let mut t = tree();
        t.set("a.b", "mid").unwrap();
        t.set("a.b.c", "deep").unwrap();
        t.delete("a.b").unwrap();
        assert!(t.get_strict("a.b").is_err());
        assert_eq!(t.get_strict("a.b.c").unwrap().as_str(), Some("deep"));
    }

    #[test]
    fn test_delete_subtree_prunes_ancestors() {
        let mut t = tree();
        t.set("a.b.c.d", 1i64).unwrap();
        t.delete("a.b").unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn test_delete_absent_is_not_found() {
        let mut t = tree();
        t.set("a", 1i64).unwrap();
        assert_eq!(
            t.delete("a.b"),
            Err(TreeError::NotFound {
                path: "a.b".to_string()
            })
        );
    }

    #[test]
    fn test_empty_segment_rejected() {
        let mut t = tree();
        assert!(matches!(
            t.set("a..b", 1i64),
            Err(TreeError::EmptySegment { .. })
        ));
        assert!(t.get(".a").is_none());
    }

    #[test]
    fn test_fullitems_roundtrip() {
        let mut t = tree();
        t.set("config.tools.version", "10341").unwrap();
        t.set("config.tools", "present").unwrap();
        t.set("name", "vm1").unwrap();
        t.set("runtime.powerState", "poweredOn").unwrap();

        let items = t.fullitems();
        let mut replayed = tree();
        for (path, value) in &items {
            replayed.set(path, value.clone()).unwrap();
        }
        assert_eq!(t, replayed);

        let keys = t.fullkeys();
        assert_eq!(
            keys,
            vec![
                "config.tools",
                "config.tools.version",
                "name",
                "runtime.powerState"
            ]
        );
    }

    #[test]
    fn test_from_propset() {
        let propset = vec![
            PropRecord::new("name", "vm1"),
            PropRecord::new("config.guestId", "otherLinux64Guest"),
        ];
        let t = PropertyTree::from_propset(&propset).unwrap();
        assert_eq!(t.get_strict("name").unwrap().as_str(), Some("vm1"));
        assert_eq!(
            t.get_strict("config.guestId").unwrap().as_str(),
            Some("otherLinux64Guest")
        );
    }

    #[test]
    fn test_deep_converts_kv_lists_and_stops_at_refs() {
        use crate::types::ObjectRef;
        let mut kv = BTreeMap::new();
        kv.insert("key".to_string(), PropValue::from("guestinfo.ip"));
        kv.insert("value".to_string(), PropValue::from("10.0.0.7"));

        let mut record = BTreeMap::new();
        record.insert(
            "extraConfig".to_string(),
            PropValue::List(vec![PropValue::Map(kv)]),
        );
        record.insert(
            "parent".to_string(),
            PropValue::Ref(ObjectRef::new("Folder", "group-v3")),
        );
        record.insert("name".to_string(), PropValue::from("vm1"));

        let t = PropertyTree::deep(&record);
        assert_eq!(
            t.get_strict("extraConfig.guestinfo.ip").unwrap().as_str(),
            Some("10.0.0.7")
        );
        // The live handle stays a leaf, not a recursed subtree
        assert!(matches!(
            t.get_strict("parent").unwrap(),
            &PropValue::Ref(_)
        ));
    }

    #[test]
    fn test_deep_nonuniform_list_stays_leaf() {
        let mut record = BTreeMap::new();
        record.insert(
            "tags".to_string(),
            PropValue::List(vec![PropValue::from("a"), PropValue::from("b")]),
        );
        let t = PropertyTree::deep(&record);
        assert!(matches!(
            t.get_strict("tags").unwrap(),
            &PropValue::List(_)
        ));
    }
}
