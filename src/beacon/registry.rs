use std::rc::Rc;

use log::debug;

use crate::beacon::scene::Traceable;

pub type TraceableHandle = Rc<dyn Traceable>;

/// Attach/detach surface for whatever owns object lifetimes.
pub trait SceneManager {
    fn attach(&mut self, object: TraceableHandle);
    fn detach(&mut self, object: &TraceableHandle);
}

/// Live set of traceable objects plus the flag telling the geometry builder to run.
///
/// The flag is raised on every membership change and only cleared by [`SceneRegistry::take_dirty`].
#[derive(Default)]
pub struct SceneRegistry {
    objects: Vec<TraceableHandle>,
    dirty: bool,
}

fn same_object(a: &TraceableHandle, b: &TraceableHandle) -> bool {
    // Compare data pointers only, vtables may be duplicated across codegen units
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, object: TraceableHandle) {
        if !self.contains(&object) {
            self.objects.push(object);
        }
        self.dirty = true;
        debug!("registered traceable object, {} live", self.objects.len());
    }

    pub fn unregister(&mut self, object: &TraceableHandle) {
        self.objects.retain(|other| !same_object(other, object));
        self.dirty = true;
        debug!("unregistered traceable object, {} live", self.objects.len());
    }

    pub fn contains(&self, object: &TraceableHandle) -> bool {
        self.objects.iter().any(|other| same_object(other, object))
    }

    /// Reads and clears the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        if !self.objects.is_empty() {
            self.objects.clear();
            self.dirty = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceableHandle> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl SceneManager for SceneRegistry {
    fn attach(&mut self, object: TraceableHandle) {
        self.register(object);
    }

    fn detach(&mut self, object: &TraceableHandle) {
        self.unregister(object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::scene::{Mesh, TracedMesh};
    use nalgebra::Matrix4;

    fn cube() -> TraceableHandle {
        Rc::new(TracedMesh::new(Mesh::cube(1.0), Matrix4::identity()))
    }

    #[test]
    fn new_registry_is_clean() {
        let mut registry = SceneRegistry::new();
        assert!(!registry.take_dirty());
        assert!(registry.is_empty());
    }

    #[test]
    fn register_raises_dirty_once() {
        let mut registry = SceneRegistry::new();
        registry.register(cube());
        assert!(registry.take_dirty());
        assert!(!registry.take_dirty());
    }

    #[test]
    fn double_register_keeps_one_entry() {
        let mut registry = SceneRegistry::new();
        let object = cube();
        registry.register(object.clone());
        registry.register(object.clone());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_removes_and_raises_dirty() {
        let mut registry = SceneRegistry::new();
        let first = cube();
        let second = cube();
        registry.attach(first.clone());
        registry.attach(second.clone());
        registry.take_dirty();

        registry.detach(&first);
        assert!(registry.is_dirty());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&second));
        assert!(!registry.contains(&first));
    }

    #[test]
    fn unregister_unknown_object_still_raises_dirty() {
        let mut registry = SceneRegistry::new();
        registry.unregister(&cube());
        assert!(registry.take_dirty());
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut registry = SceneRegistry::new();
        let objects: Vec<_> = (0..3).map(|_| cube()).collect();
        for object in &objects {
            registry.register(object.clone());
        }
        registry.unregister(&objects[1]);

        let remaining: Vec<_> = registry.iter().cloned().collect();
        assert!(same_object(&remaining[0], &objects[0]));
        assert!(same_object(&remaining[1], &objects[2]));
    }
}
