//! Purpose: Model the type tags and shared instances produced by object mappings.
//! Exports: `Class`, `Instance`, `ObjectRef`.
//! Role: Runtime stand-in for "constructor + new instance" of declared object types.
//! Invariants: `Class` equality is reference identity, never name equality.
//! Invariants: Instances are shared (`Arc`) so cyclic references observe one object.
//! Invariants: Field writes go through interior mutability; readers never see torn maps.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;

use super::mapped::Mapped;

#[derive(Clone)]
pub struct Class {
    inner: Arc<ClassInner>,
}

struct ClassInner {
    name: String,
    parent: Option<Class>,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClassInner {
                name: name.into(),
                parent: None,
            }),
        }
    }

    pub fn extends(name: impl Into<String>, parent: &Class) -> Self {
        Self {
            inner: Arc::new(ClassInner {
                name: name.into(),
                parent: Some(parent.clone()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&Class> {
        self.inner.parent.as_ref()
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &Class> {
        std::iter::successors(self.parent(), |class| class.parent())
    }

    pub fn is_subclass_of(&self, other: &Class) -> bool {
        self == other || self.ancestors().any(|class| class == other)
    }

    pub fn instantiate(&self) -> ObjectRef {
        Arc::new(Instance {
            class: self.clone(),
            fields: RwLock::new(IndexMap::new()),
        })
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Class {}

impl Hash for Class {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class({})", self.inner.name)
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

pub type ObjectRef = Arc<Instance>;

pub struct Instance {
    class: Class,
    fields: RwLock<IndexMap<String, Mapped>>,
}

impl Instance {
    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn is_instance_of(&self, class: &Class) -> bool {
        self.class.is_subclass_of(class)
    }

    pub fn get(&self, field: &str) -> Option<Mapped> {
        self.read().get(field).cloned()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.read().contains_key(field)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn set(&self, field: impl Into<String>, value: Mapped) {
        self.write().insert(field.into(), value);
    }

    pub fn remove(&self, field: &str) -> Option<Mapped> {
        self.write().shift_remove(field)
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Mapped>> {
        self.fields
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Mapped>> {
        self.fields
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

// Field values may point back at this instance; print names only.
impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name())
            .field("fields", &self.field_names())
            .finish()
    }
}
