/*!
 * Session boundary
 *
 * The connection/authentication collaborator lives outside this crate; it
 * hands us something implementing `Session`. Every server round trip the
 * core issues goes through this trait, so tests can script a fake session
 * and the core never reaches into vendor-specific connection state.
 */

use tracing::warn;

use crate::error::Result;
use crate::types::{ObjectContent, ObjectRef, UpdateBatch};

/// Server-side handle for a materialized container view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewHandle {
    pub id: u64,
}

impl ViewHandle {
    pub fn new(id: u64) -> Self {
        ViewHandle { id }
    }
}

/// Server-side handle for a registered change filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterHandle {
    pub id: u64,
}

impl FilterHandle {
    pub fn new(id: u64) -> Self {
        FilterHandle { id }
    }
}

/// Blocking capability interface over an established server session.
///
/// Implementations issue synchronous round trips on the calling thread and
/// must be `Send + Sync`: the core shares one session between request
/// threads. Connection-level failures are returned as
/// `PeriscopeError::Connection` and never retried here; re-establishing a
/// session is the caller's concern.
pub trait Session: Send + Sync {
    /// Root container of the inventory
    fn root(&self) -> ObjectRef;

    /// Materialize a container view of the given object kinds under
    /// `root`, recursively unless told otherwise
    fn create_view(&self, root: &ObjectRef, kinds: &[&str], recursive: bool) -> Result<ViewHandle>;

    /// Release a view created by `create_view`
    fn destroy_view(&self, view: ViewHandle) -> Result<()>;

    /// List the members of a view without fetching any properties
    fn list_view(&self, view: ViewHandle) -> Result<Vec<ObjectRef>>;

    /// Fetch the given property paths for every member of a view
    fn fetch_view_properties(
        &self,
        view: ViewHandle,
        paths: &[String],
    ) -> Result<Vec<ObjectContent>>;

    /// Fetch the given property paths for an explicit set of objects
    fn fetch_object_properties(
        &self,
        objects: &[ObjectRef],
        paths: &[String],
    ) -> Result<Vec<ObjectContent>>;

    /// Register interest in property changes on a set of objects
    fn create_change_filter(
        &self,
        objects: &[ObjectRef],
        paths: &[String],
    ) -> Result<FilterHandle>;

    /// Release a filter created by `create_change_filter`
    fn destroy_filter(&self, filter: FilterHandle) -> Result<()>;

    /// Block until the server has updates newer than `cursor` (long-poll).
    /// `None` asks for the initial state of every registered filter.
    fn wait_for_updates(&self, cursor: Option<&str>) -> Result<UpdateBatch>;
}

/// RAII release for a view the engine created itself.
///
/// Borrowed views are used bare: the engine destroys what it creates,
/// never what it borrows.
pub struct ViewGuard<'a, S: Session + ?Sized> {
    session: &'a S,
    handle: Option<ViewHandle>,
}

impl<'a, S: Session + ?Sized> ViewGuard<'a, S> {
    pub fn new(session: &'a S, handle: ViewHandle) -> Self {
        ViewGuard {
            session,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> ViewHandle {
        self.handle.expect("view guard still holds its handle")
    }
}

impl<S: Session + ?Sized> Drop for ViewGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.session.destroy_view(handle) {
                warn!(view = handle.id, error = %e, "failed to destroy container view");
            }
        }
    }
}

/// RAII release for a registered change filter. Runs on every exit path of
/// the notification loop, success or failure.
pub struct FilterGuard<'a, S: Session + ?Sized> {
    session: &'a S,
    handle: Option<FilterHandle>,
}

impl<'a, S: Session + ?Sized> FilterGuard<'a, S> {
    pub fn new(session: &'a S, handle: FilterHandle) -> Self {
        FilterGuard {
            session,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> FilterHandle {
        self.handle.expect("filter guard still holds its handle")
    }
}

impl<S: Session + ?Sized> Drop for FilterGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.session.destroy_filter(handle) {
                warn!(filter = handle.id, error = %e, "failed to destroy change filter");
            }
        }
    }
}
