/*!
 * Shared test fixture: a scripted in-memory session
 *
 * Records every server round trip so tests can assert on fetch counts and
 * shapes, and plays back pre-scripted update batches for the long-poll
 * loop.
 */

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use periscope::session::{FilterHandle, Session, ViewHandle};
use periscope::{
    ObjectContent, ObjectRef, PeriscopeError, PropRecord, PropValue, Result, UpdateBatch,
};

/// One recorded fetch round trip
#[derive(Debug, Clone)]
pub struct FetchCall {
    /// Objects explicitly listed, `None` for a view-wide fetch
    pub objects: Option<Vec<ObjectRef>>,
    pub paths: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<ObjectRef, BTreeMap<String, PropValue>>,
    views: HashMap<u64, Vec<ObjectRef>>,
    filters: HashSet<u64>,
    next_id: u64,
    batches: VecDeque<UpdateBatch>,
    invalid_paths: HashSet<String>,

    fetch_log: Vec<FetchCall>,
    view_creates: usize,
    view_destroys: usize,
    filter_destroys: usize,
    wait_calls: usize,
}

pub struct FakeSession {
    root: ObjectRef,
    state: Mutex<FakeState>,
}

#[allow(dead_code)] // not every suite uses every helper
impl FakeSession {
    pub fn new() -> Self {
        FakeSession {
            root: ObjectRef::new("Folder", "root"),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn add_object(&self, obj: ObjectRef, props: Vec<(&str, PropValue)>) {
        let mut state = self.state.lock().unwrap();
        let entry = state.objects.entry(obj).or_default();
        for (path, value) in props {
            entry.insert(path.to_string(), value);
        }
    }

    pub fn reject_path(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .invalid_paths
            .insert(path.to_string());
    }

    pub fn script_batch(&self, batch: UpdateBatch) {
        self.state.lock().unwrap().batches.push_back(batch);
    }

    pub fn fetch_log(&self) -> Vec<FetchCall> {
        self.state.lock().unwrap().fetch_log.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetch_log.len()
    }

    pub fn view_creates(&self) -> usize {
        self.state.lock().unwrap().view_creates
    }

    pub fn view_destroys(&self) -> usize {
        self.state.lock().unwrap().view_destroys
    }

    pub fn live_views(&self) -> usize {
        self.state.lock().unwrap().views.len()
    }

    pub fn filter_destroys(&self) -> usize {
        self.state.lock().unwrap().filter_destroys
    }

    pub fn live_filters(&self) -> usize {
        self.state.lock().unwrap().filters.len()
    }

    pub fn wait_calls(&self) -> usize {
        self.state.lock().unwrap().wait_calls
    }

    fn fetch(
        &self,
        members: Vec<ObjectRef>,
        paths: &[String],
        log_objects: Option<Vec<ObjectRef>>,
    ) -> Result<Vec<ObjectContent>> {
        let mut state = self.state.lock().unwrap();
        for path in paths {
            if state.invalid_paths.contains(path) {
                return Err(PeriscopeError::InvalidPath {
                    path: path.clone(),
                    reason: "rejected by test server".to_string(),
                });
            }
        }
        state.fetch_log.push(FetchCall {
            objects: log_objects,
            paths: paths.to_vec(),
        });
        let mut rows = Vec::new();
        for obj in members {
            let Some(props) = state.objects.get(&obj) else {
                continue;
            };
            let fetched: Vec<PropRecord> = paths
                .iter()
                .filter_map(|p| {
                    props
                        .get(p)
                        .map(|v| PropRecord::new(p.as_str(), v.clone()))
                })
                .collect();
            rows.push(ObjectContent::new(obj, fetched));
        }
        Ok(rows)
    }
}

impl Session for FakeSession {
    fn root(&self) -> ObjectRef {
        self.root.clone()
    }

    fn create_view(
        &self,
        _root: &ObjectRef,
        kinds: &[&str],
        _recursive: bool,
    ) -> Result<ViewHandle> {
        let mut state = self.state.lock().unwrap();
        let mut members: Vec<ObjectRef> = state
            .objects
            .keys()
            .filter(|o| kinds.contains(&o.kind.as_str()))
            .cloned()
            .collect();
        members.sort();
        state.next_id += 1;
        let id = state.next_id;
        state.views.insert(id, members);
        state.view_creates += 1;
        Ok(ViewHandle::new(id))
    }

    fn destroy_view(&self, view: ViewHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.views.remove(&view.id).is_none() {
            return Err(PeriscopeError::Other(format!(
                "destroy of unknown view {}",
                view.id
            )));
        }
        state.view_destroys += 1;
        Ok(())
    }

    fn list_view(&self, view: ViewHandle) -> Result<Vec<ObjectRef>> {
        let state = self.state.lock().unwrap();
        state
            .views
            .get(&view.id)
            .cloned()
            .ok_or_else(|| PeriscopeError::Other(format!("unknown view {}", view.id)))
    }

    fn fetch_view_properties(
        &self,
        view: ViewHandle,
        paths: &[String],
    ) -> Result<Vec<ObjectContent>> {
        let members = self.list_view(view)?;
        self.fetch(members, paths, None)
    }

    fn fetch_object_properties(
        &self,
        objects: &[ObjectRef],
        paths: &[String],
    ) -> Result<Vec<ObjectContent>> {
        self.fetch(objects.to_vec(), paths, Some(objects.to_vec()))
    }

    fn create_change_filter(
        &self,
        _objects: &[ObjectRef],
        _paths: &[String],
    ) -> Result<FilterHandle> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.filters.insert(id);
        Ok(FilterHandle::new(id))
    }

    fn destroy_filter(&self, filter: FilterHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.filters.remove(&filter.id) {
            return Err(PeriscopeError::Other(format!(
                "destroy of unknown filter {}",
                filter.id
            )));
        }
        state.filter_destroys += 1;
        Ok(())
    }

    fn wait_for_updates(&self, _cursor: Option<&str>) -> Result<UpdateBatch> {
        let mut state = self.state.lock().unwrap();
        state.wait_calls += 1;
        state.batches.pop_front().ok_or_else(|| {
            // A real server would block; an exhausted script is a test bug
            PeriscopeError::Connection("scripted update stream exhausted".to_string())
        })
    }
}
