/*!
 * Property query engine
 *
 * Retrieves sets of property paths from sets of remote objects with as few
 * round trips as the request shape allows. Filtered queries run in two
 * phases: fetch only the filtered paths for the whole candidate set,
 * evaluate the filter locally, then fetch the remaining paths for just the
 * matching objects. A filter that matches nothing short-circuits before
 * the second, more expensive fetch.
 */

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::cache::{shape_key, TtlCache};
use crate::config::ClientConfig;
use crate::error::{PeriscopeError, Result};
use crate::pathmap::PathMaps;
use crate::session::{Session, ViewGuard, ViewHandle};
use crate::tree::PropertyTree;
use crate::types::{MatchMode, ObjectContent, ObjectRef, PropValue};

fn path_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("property path pattern compiles")
    })
}

/// A requested set of dotted property paths, optionally paired with an
/// allowed-value filter per path.
///
/// Built incrementally; paths are deduplicated while preserving insertion
/// order, so the first mention of a path fixes its position in the fetch.
#[derive(Debug, Clone, Default)]
pub struct PropertySpec {
    paths: Vec<String>,
    filters: BTreeMap<String, Vec<PropValue>>,
}

impl PropertySpec {
    pub fn new() -> Self {
        PropertySpec::default()
    }

    /// Request a property path with no value filter
    pub fn add(&mut self, path: &str) -> Result<&mut Self> {
        validate_path(path)?;
        if !self.paths.iter().any(|p| p == path) {
            self.paths.push(path.to_string());
        }
        Ok(self)
    }

    /// Request several paths at once
    pub fn add_all<'a, I: IntoIterator<Item = &'a str>>(&mut self, paths: I) -> Result<&mut Self> {
        for path in paths {
            self.add(path)?;
        }
        Ok(self)
    }

    /// Request a path and restrict results to objects whose value for it
    /// is a member of `allowed`
    pub fn restrict(
        &mut self,
        path: &str,
        allowed: impl IntoIterator<Item = PropValue>,
    ) -> Result<&mut Self> {
        self.add(path)?;
        let values = self.filters.entry(path.to_string()).or_default();
        for v in allowed {
            if !values.contains(&v) {
                values.push(v);
            }
        }
        Ok(self)
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Paths carrying a value filter, in request order
    pub fn filter_paths(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter(|p| self.filters.contains_key(*p))
            .cloned()
            .collect()
    }

    /// Requested paths with no value filter, in request order
    pub fn extra_paths(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter(|p| !self.filters.contains_key(*p))
            .cloned()
            .collect()
    }

    /// Evaluate the filter against one fetched row
    pub fn matches(&self, content: &ObjectContent, mode: MatchMode) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let check = |(path, allowed): (&String, &Vec<PropValue>)| {
            content
                .prop(path)
                .map(|v| allowed.contains(v))
                .unwrap_or(false)
        };
        match mode {
            MatchMode::All => self.filters.iter().all(check),
            MatchMode::Any => self.filters.iter().any(check),
        }
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path_pattern().is_match(path) {
        Ok(())
    } else {
        Err(PeriscopeError::InvalidPath {
            path: path.to_string(),
            reason: "malformed property path".to_string(),
        })
    }
}

/// One query result row: the object and its fetched properties, normalized
/// into a path-indexed tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProps {
    pub obj: ObjectRef,
    pub props: PropertyTree,
}

impl ObjectProps {
    /// The object's `name` property, when it was part of the request
    pub fn name(&self) -> Option<&str> {
        self.props.get_strict("name").ok()?.as_str()
    }
}

/// Reorder rows to match a caller-supplied name ordering. Rows whose name
/// is missing or not in the ordering sort last, keeping their relative
/// order.
pub fn sort_by_name_order(rows: &mut [ObjectProps], order: &[String]) {
    let rank: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    rows.sort_by_key(|row| {
        row.name()
            .and_then(|n| rank.get(n).copied())
            .unwrap_or(usize::MAX)
    });
}

/// Where query candidates come from.
#[derive(Debug, Clone)]
pub enum Candidates<'a> {
    /// A view the caller already holds; left untouched
    View(ViewHandle),
    /// An explicit list of objects
    Objects(&'a [ObjectRef]),
    /// A fresh container view rooted here (inventory root if `None`),
    /// created for this query and destroyed afterwards
    Rooted {
        root: Option<&'a ObjectRef>,
        recursive: Option<bool>,
    },
}

impl Candidates<'_> {
    /// Fresh recursive view from the inventory root
    pub fn rooted() -> Self {
        Candidates::Rooted {
            root: None,
            recursive: None,
        }
    }
}

/// Cached name→objects map for one (type set, root) pair. Names are not
/// guaranteed unique server-side, so each name maps to a list.
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    by_name: BTreeMap<String, Vec<ObjectRef>>,
}

impl NameMap {
    pub fn get(&self, name: &str) -> &[ObjectRef] {
        self.by_name.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// All known names, sorted
    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Query engine over one session. Owns the caches derived from its
/// session's object handles; dropping the engine drops them, since refs
/// are only meaningful within the session that produced them.
pub struct QueryEngine<S: Session> {
    session: Arc<S>,
    config: ClientConfig,
    name_maps: TtlCache<Arc<NameMap>>,
    pub(crate) path_cache: TtlCache<Arc<PathMaps>>,
}

impl<S: Session> QueryEngine<S> {
    pub fn new(session: S, config: ClientConfig) -> Self {
        let ttl = config.cache_ttl();
        QueryEngine {
            session: Arc::new(session),
            config,
            name_maps: TtlCache::new(ttl),
            path_cache: TtlCache::new(ttl),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Drop every derived map. The caches are never kept consistent with
    /// server-side mutations; this is the explicit invalidation point.
    pub fn clear_caches(&self) {
        self.name_maps.clear();
        self.path_cache.clear();
    }

    /// List candidate objects without fetching any properties
    pub fn list(&self, kinds: &[&str], from: Candidates<'_>) -> Result<Vec<ObjectRef>> {
        match from {
            Candidates::View(view) => self.session.list_view(view),
            Candidates::Objects(objects) => Ok(objects.to_vec()),
            Candidates::Rooted { root, recursive } => {
                let guard = self.create_view(kinds, root, recursive)?;
                self.session.list_view(guard.handle())
            }
        }
    }

    /// Retrieve properties for a candidate set, using the configured
    /// filter match mode.
    pub fn get_props(
        &self,
        kinds: &[&str],
        spec: &PropertySpec,
        from: Candidates<'_>,
    ) -> Result<Vec<ObjectProps>> {
        self.get_props_with_mode(kinds, spec, from, self.config.match_mode)
    }

    /// Retrieve properties for a candidate set with an explicit match mode
    pub fn get_props_with_mode(
        &self,
        kinds: &[&str],
        spec: &PropertySpec,
        from: Candidates<'_>,
        mode: MatchMode,
    ) -> Result<Vec<ObjectProps>> {
        let rows = match from {
            Candidates::View(view) => self.query_view(view, spec, mode)?,
            Candidates::Objects(objects) => self.query_objects(objects, spec, mode)?,
            Candidates::Rooted { root, recursive } => {
                let guard = self.create_view(kinds, root, recursive)?;
                self.query_view(guard.handle(), spec, mode)?
                // guard drops here, destroying the view we created
            }
        };
        rows.into_iter()
            .map(|content| {
                let props = PropertyTree::from_propset(&content.props)?;
                Ok(ObjectProps {
                    obj: content.obj,
                    props,
                })
            })
            .collect()
    }

    /// Build (or fetch from cache) the name→objects map for a type set
    /// under a root.
    pub fn name_map(&self, kinds: &[&str], root: Option<&ObjectRef>) -> Result<Arc<NameMap>> {
        let key = shape_key("names", kinds, root, "");
        if let Some(map) = self.name_maps.get(&key) {
            debug!(key = %key, "name map cache hit");
            return Ok(map);
        }

        let guard = self.create_view(kinds, root, None)?;
        let rows = self.fetch_view(guard.handle(), vec!["name".to_string()])?;
        drop(guard);

        let mut by_name: BTreeMap<String, Vec<ObjectRef>> = BTreeMap::new();
        for row in rows {
            if let Some(name) = row.prop("name").and_then(|v| v.as_str()) {
                by_name.entry(name.to_string()).or_default().push(row.obj);
            }
        }
        let map = Arc::new(NameMap { by_name });
        self.name_maps.set(key, Arc::clone(&map));
        Ok(map)
    }

    /// All objects carrying the given name
    pub fn find_by_name(
        &self,
        kinds: &[&str],
        name: &str,
        root: Option<&ObjectRef>,
    ) -> Result<Vec<ObjectRef>> {
        Ok(self.name_map(kinds, root)?.get(name).to_vec())
    }

    /// Exactly one object with the given name. Zero matches reports the
    /// available names; several matches is an ambiguity error.
    pub fn find_one(
        &self,
        kinds: &[&str],
        name: &str,
        root: Option<&ObjectRef>,
    ) -> Result<ObjectRef> {
        let map = self.name_map(kinds, root)?;
        match map.get(name) {
            [] => Err(PeriscopeError::NotFound {
                name: name.to_string(),
                available: map.names(),
            }),
            [only] => Ok(only.clone()),
            many => Err(PeriscopeError::NotUnique {
                name: name.to_string(),
                matches: many.iter().map(|r| r.to_string()).collect(),
            }),
        }
    }

    /// Singular lookup with the documented parent/child disambiguation:
    /// when exactly two objects carry the name and one is the parent of
    /// the other, the child wins. Default resource pools show up this way,
    /// where the pool and its nested default child share a name.
    pub fn find_one_preferring_child(
        &self,
        kinds: &[&str],
        name: &str,
        root: Option<&ObjectRef>,
    ) -> Result<ObjectRef> {
        let map = self.name_map(kinds, root)?;
        let matches = map.get(name);
        if matches.len() != 2 {
            return self.find_one(kinds, name, root);
        }

        let rows = self
            .session
            .fetch_object_properties(matches, &["parent".to_string()])?;
        let parent_of = |obj: &ObjectRef| -> Option<ObjectRef> {
            rows.iter()
                .find(|r| &r.obj == obj)
                .and_then(|r| r.prop("parent"))
                .and_then(|v| v.as_ref_handle())
                .cloned()
        };

        let (a, b) = (&matches[0], &matches[1]);
        if parent_of(a).as_ref() == Some(b) {
            Ok(a.clone())
        } else if parent_of(b).as_ref() == Some(a) {
            Ok(b.clone())
        } else {
            Err(PeriscopeError::NotUnique {
                name: name.to_string(),
                matches: matches.iter().map(|r| r.to_string()).collect(),
            })
        }
    }

    fn create_view(
        &self,
        kinds: &[&str],
        root: Option<&ObjectRef>,
        recursive: Option<bool>,
    ) -> Result<ViewGuard<'_, S>> {
        let root = root.cloned().unwrap_or_else(|| self.session.root());
        let recursive = recursive.unwrap_or(self.config.recursive);
        let handle = self.session.create_view(&root, kinds, recursive)?;
        Ok(ViewGuard::new(self.session.as_ref(), handle))
    }

    fn query_view(
        &self,
        view: ViewHandle,
        spec: &PropertySpec,
        mode: MatchMode,
    ) -> Result<Vec<ObjectContent>> {
        if !spec.has_filters() {
            return self.fetch_view(view, spec.paths().to_vec());
        }

        // Phase 1: filtered paths only, whole candidate set
        let phase1 = self.fetch_view(view, spec.filter_paths())?;
        self.finish_filtered(phase1, spec, mode)
    }

    fn query_objects(
        &self,
        objects: &[ObjectRef],
        spec: &PropertySpec,
        mode: MatchMode,
    ) -> Result<Vec<ObjectContent>> {
        if !spec.has_filters() {
            return self.fetch_objects(objects, spec.paths().to_vec());
        }
        let phase1 = self.fetch_objects(objects, spec.filter_paths())?;
        self.finish_filtered(phase1, spec, mode)
    }

    /// Phase 2 of a filtered query: evaluate locally, short-circuit on an
    /// empty match, otherwise fetch remaining paths for the matched subset
    /// and merge.
    fn finish_filtered(
        &self,
        phase1: Vec<ObjectContent>,
        spec: &PropertySpec,
        mode: MatchMode,
    ) -> Result<Vec<ObjectContent>> {
        let candidates = phase1.len();
        let mut matched: Vec<ObjectContent> = phase1
            .into_iter()
            .filter(|c| spec.matches(c, mode))
            .collect();
        debug!(candidates, matched = matched.len(), "filter phase complete");

        if matched.is_empty() {
            return Ok(Vec::new());
        }

        let extra = spec.extra_paths();
        if extra.is_empty() {
            return Ok(matched);
        }

        let objects: Vec<ObjectRef> = matched.iter().map(|c| c.obj.clone()).collect();
        let phase2 = self.fetch_objects(&objects, extra)?;
        let mut detail: HashMap<ObjectRef, ObjectContent> =
            phase2.into_iter().map(|c| (c.obj.clone(), c)).collect();
        for row in &mut matched {
            if let Some(more) = detail.remove(&row.obj) {
                row.props.extend(more.props);
            }
        }
        Ok(matched)
    }

    fn fetch_view(&self, view: ViewHandle, paths: Vec<String>) -> Result<Vec<ObjectContent>> {
        self.fetch_with_tolerance(paths, |paths| {
            self.session.fetch_view_properties(view, paths)
        })
    }

    fn fetch_objects(
        &self,
        objects: &[ObjectRef],
        paths: Vec<String>,
    ) -> Result<Vec<ObjectContent>> {
        self.fetch_with_tolerance(paths, |paths| {
            self.session.fetch_object_properties(objects, paths)
        })
    }

    /// Issue a fetch, optionally dropping server-rejected paths and
    /// retrying. Tolerance is opt-in via configuration since a silently
    /// dropped path can mask a real mistake in the request.
    fn fetch_with_tolerance<F>(&self, mut paths: Vec<String>, fetch: F) -> Result<Vec<ObjectContent>>
    where
        F: Fn(&[String]) -> Result<Vec<ObjectContent>>,
    {
        loop {
            match fetch(&paths) {
                Ok(rows) => return Ok(rows),
                Err(PeriscopeError::InvalidPath { path, reason })
                    if self.config.tolerate_invalid_paths =>
                {
                    let before = paths.len();
                    paths.retain(|p| *p != path);
                    if paths.len() == before {
                        // Server complained about a path we never sent
                        return Err(PeriscopeError::InvalidPath { path, reason });
                    }
                    warn!(path = %path, reason = %reason, "dropping rejected property path and retrying");
                    if paths.is_empty() {
                        return Ok(Vec::new());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
