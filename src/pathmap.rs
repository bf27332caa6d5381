/*!
 * Graph path resolver
 *
 * Containers form a hierarchy reachable by parent links. This module
 * resolves every relevant node to a slash-delimited name path from the
 * root down ("/F1/F2/Obj") and builds both directions of the mapping in
 * one pass, since computing either yields the other as a byproduct.
 *
 * The climb is memoized: before walking further up, the resolver checks
 * whether the current parent was already resolved in this pass and splices
 * that prefix in, so many nodes sharing a prefix cost one walk, not one
 * walk per node.
 */

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::shape_key;
use crate::error::Result;
use crate::query::QueryEngine;
use crate::session::Session;
use crate::types::{ObjectRef, PropValue};

/// Bidirectional map between container objects and their resolved paths.
///
/// Rebuilt lazily on first access and cached; it is not kept consistent
/// with server-side moves or renames. Staleness within the cache TTL is
/// the accepted tradeoff; `QueryEngine::clear_caches` forces a rebuild.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathMaps {
    by_path: HashMap<String, ObjectRef>,
    by_obj: HashMap<ObjectRef, String>,
}

impl PathMaps {
    pub fn object_at(&self, path: &str) -> Option<&ObjectRef> {
        self.by_path.get(path)
    }

    pub fn path_of(&self, obj: &ObjectRef) -> Option<&str> {
        self.by_obj.get(obj).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_obj.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_obj.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObjectRef)> {
        self.by_path.iter().map(|(p, o)| (p.as_str(), o))
    }

    /// Derive a secondary map with one named intermediate level removed
    /// from every path ("/dc/vm/web" → "/dc/web" for segment "vm").
    ///
    /// This is a string rewrite over the already-resolved map, not a new
    /// graph walk. Only the first occurrence of the segment is collapsed.
    /// Nodes whose path ends at the stripped level are omitted: the level
    /// itself has no address in the pruned map.
    pub fn strip_segment(&self, segment: &str) -> PathMaps {
        let needle = format!("/{}/", segment);
        let tail = format!("/{}", segment);
        let mut pruned = PathMaps::default();
        for (path, obj) in &self.by_path {
            if path.ends_with(&tail) && !path[..path.len() - tail.len()].contains(&needle) {
                continue;
            }
            let rewritten = match path.find(&needle) {
                Some(i) => format!("{}{}", &path[..i], &path[i + needle.len() - 1..]),
                None => path.clone(),
            };
            pruned.by_path.insert(rewritten.clone(), obj.clone());
            pruned.by_obj.insert(obj.clone(), rewritten);
        }
        pruned
    }
}

/// Name and parent link for one node, as fetched in the batched query.
#[derive(Debug, Clone)]
pub(crate) struct NodeInfo {
    pub name: String,
    pub parent: Option<ObjectRef>,
}

/// Build both path maps from fetched (name, parent) records.
///
/// Returns the maps plus the total number of climb steps taken, which the
/// tests use to verify prefix memoization.
pub(crate) fn build_path_maps(
    info: &HashMap<ObjectRef, NodeInfo>,
    root: Option<&ObjectRef>,
) -> (PathMaps, usize) {
    let mut resolved: HashMap<ObjectRef, String> = HashMap::new();
    let mut steps = 0usize;

    for obj in info.keys() {
        if resolved.contains_key(obj) {
            continue;
        }
        let mut stack: Vec<(ObjectRef, String)> = Vec::new();
        let mut cur = obj.clone();
        let prefix = loop {
            if let Some(known) = resolved.get(&cur) {
                // Memoized prefix: splice it in and stop climbing
                break known.clone();
            }
            if root.is_some_and(|r| *r == cur) {
                break String::new();
            }
            let node = match info.get(&cur) {
                Some(node) => node,
                // Topmost fetched node: the root marker supplies the
                // leading slash during unwind
                None => break String::new(),
            };
            if stack.len() > info.len() {
                warn!(node = %cur, "parent links form a cycle; rooting path here");
                break String::new();
            }
            stack.push((cur.clone(), node.name.clone()));
            steps += 1;
            match &node.parent {
                Some(parent) => cur = parent.clone(),
                None => break String::new(),
            }
        };

        let mut path = prefix;
        for (node, name) in stack.into_iter().rev() {
            path = format!("{}/{}", path, name);
            resolved.insert(node, path.clone());
        }
    }

    let mut maps = PathMaps::default();
    for (obj, path) in resolved {
        maps.by_path.insert(path.clone(), obj.clone());
        maps.by_obj.insert(obj, path);
    }
    (maps, steps)
}

impl<S: Session> QueryEngine<S> {
    /// Resolve path maps for the given container kinds under a root.
    ///
    /// Issues one batched (name, parent) fetch for every relevant node,
    /// then climbs parent links locally. Both directions are cached
    /// together under one entry.
    pub fn path_maps(&self, kinds: &[&str], root: Option<&ObjectRef>) -> Result<Arc<PathMaps>> {
        let key = shape_key("paths", kinds, root, "");
        if let Some(maps) = self.path_cache.get(&key) {
            debug!(key = %key, "path map cache hit");
            return Ok(maps);
        }

        let rows = self.fetch_names_and_parents(kinds, root)?;
        let info: HashMap<ObjectRef, NodeInfo> = rows
            .into_iter()
            .filter_map(|row| {
                let name = row.prop("name")?.as_str()?.to_string();
                let parent = row
                    .prop("parent")
                    .and_then(PropValue::as_ref_handle)
                    .cloned();
                Some((row.obj, NodeInfo { name, parent }))
            })
            .collect();

        let (maps, steps) = build_path_maps(&info, root);
        debug!(nodes = maps.len(), steps, "resolved container paths");
        let maps = Arc::new(maps);
        self.path_cache.set(key, Arc::clone(&maps));
        Ok(maps)
    }

    /// Resolve one object's path, building (or reusing) the maps
    pub fn path_of(
        &self,
        kinds: &[&str],
        obj: &ObjectRef,
        root: Option<&ObjectRef>,
    ) -> Result<Option<String>> {
        Ok(self
            .path_maps(kinds, root)?
            .path_of(obj)
            .map(str::to_string))
    }

    fn fetch_names_and_parents(
        &self,
        kinds: &[&str],
        root: Option<&ObjectRef>,
    ) -> Result<Vec<crate::types::ObjectContent>> {
        use crate::query::{Candidates, PropertySpec};
        let mut spec = PropertySpec::new();
        spec.add("name")?.add("parent")?;
        let rows = self.get_props(kinds, &spec, Candidates::Rooted {
            root,
            recursive: None,
        })?;
        // Back to the flat record shape build_path_maps consumes
        Ok(rows
            .into_iter()
            .map(|row| {
                let props = row
                    .props
                    .fullitems()
                    .into_iter()
                    .map(|(name, value)| crate::types::PropRecord { name, value })
                    .collect();
                crate::types::ObjectContent::new(row.obj, props)
            })
            .collect())
    }
}
