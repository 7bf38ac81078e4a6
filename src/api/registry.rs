//! Purpose: Build and memoize per-class object mappings from field declarations.
//! Exports: `Registry`, `FieldShape`.
//! Role: Explicit, caller-owned replacement for a process-wide class -> mapping table.
//! Invariants: A class mapping is built once; later declarations for it are rejected.
//! Invariants: Subclass mappings start from the nearest registered ancestor's properties.
//! Invariants: Field mappings stay lazy; shape checks run when a handle is first forced.
//! Notes: Lazy handles hold a weak reference, so built mappings never keep the registry alive.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use indexmap::IndexMap;
use tracing::trace;

use super::ApiResult;
use crate::core::class::Class;
use crate::core::error::{Error, ErrorKind};
use crate::core::mapping::{
    ChoiceMapping, ExtraProperties, Mapping, MappingRef, ObjectMapping, Predicate,
    PropertyMapping,
};

/// Declared shape of a target field, checked against the mapping it is given.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldShape {
    /// A boolean, number, string, or url leaf.
    Scalar,
    /// An embedded object, a link, or a choice.
    Object,
    Array,
    Option,
}

impl FieldShape {
    fn accepts(self, mapping: &Mapping) -> bool {
        matches!(
            (self, mapping),
            (FieldShape::Scalar, Mapping::Raw(_))
                | (
                    FieldShape::Object,
                    Mapping::Object(_) | Mapping::Link(_) | Mapping::Choice(_)
                )
                | (FieldShape::Array, Mapping::Array(_))
                | (FieldShape::Option, Mapping::Option(_))
        )
    }
}

impl fmt::Display for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldShape::Scalar => "scalar",
            FieldShape::Object => "object",
            FieldShape::Array => "array",
            FieldShape::Option => "option",
        };
        f.write_str(label)
    }
}

#[derive(Clone)]
enum Declared {
    Field { shape: FieldShape, mapping: MappingRef },
    Link { mapping: MappingRef },
}

#[derive(Clone)]
struct Declaration {
    source: String,
    declared: Declared,
}

#[derive(Default)]
struct ClassEntry {
    properties: IndexMap<String, Declaration>,
    extra_properties: Option<ExtraProperties>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<Class, ClassEntry>,
    built: HashMap<Class, ObjectMapping>,
}

#[derive(Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `target` on `class`, read from the JSON key `source`.
    pub fn add_property(
        &self,
        class: &Class,
        target: impl Into<String>,
        source: impl Into<String>,
        shape: FieldShape,
        mapping: impl Into<MappingRef>,
    ) -> ApiResult<()> {
        self.declare(
            class,
            target.into(),
            source.into(),
            Declared::Field {
                shape,
                mapping: mapping.into(),
            },
        )
    }

    pub fn add_field(
        &self,
        class: &Class,
        name: impl Into<String>,
        shape: FieldShape,
        mapping: impl Into<MappingRef>,
    ) -> ApiResult<()> {
        let name = name.into();
        self.add_property(class, name.clone(), name, shape, mapping)
    }

    /// Declares a linked field: an object or choice mapping becomes a link, and an option of
    /// one becomes an optional link. Anything else fails when the field is first forced.
    pub fn add_link(
        &self,
        class: &Class,
        target: impl Into<String>,
        source: impl Into<String>,
        mapping: impl Into<MappingRef>,
    ) -> ApiResult<()> {
        self.declare(
            class,
            target.into(),
            source.into(),
            Declared::Link {
                mapping: mapping.into(),
            },
        )
    }

    pub fn set_extra_properties(&self, class: &Class, strategy: ExtraProperties) -> ApiResult<()> {
        let mut state = self.lock();
        ensure_open(&state, class)?;
        state.entries.entry(class.clone()).or_default().extra_properties = Some(strategy);
        Ok(())
    }

    pub fn is_built(&self, class: &Class) -> bool {
        self.lock().built.contains_key(class)
    }

    /// Returns the memoized mapping for `class`, building it on first request.
    pub fn get_mapping(&self, class: &Class) -> ObjectMapping {
        let mut state = self.lock();
        build_locked(&mut state, class)
    }

    /// Builds the mapping for `class` and forces every lazy handle reachable from it.
    pub fn build(&self, class: &Class) -> ApiResult<ObjectMapping> {
        let mapping = self.get_mapping(class);
        Mapping::Object(mapping.clone()).validate()?;
        Ok(mapping)
    }

    /// Lazy handle to the mapping of `class`; safe to create before `class` is declared.
    pub fn mapping(&self, class: &Class) -> MappingRef {
        let registry = self.weak();
        let class = class.clone();
        MappingRef::lazy(move || {
            let state = registry.upgrade().ok_or_else(|| {
                Error::new(ErrorKind::Construction)
                    .with_message(format!("registry dropped before mapping {class} was used"))
            })?;
            let mut state = lock_state(&state);
            Ok(Mapping::Object(build_locked(&mut state, &class)))
        })
    }

    pub fn link(&self, class: &Class) -> Mapping {
        Mapping::link(self.mapping(class))
    }

    pub fn array_of(&self, class: &Class) -> Mapping {
        Mapping::array(self.mapping(class))
    }

    pub fn option_of(&self, class: &Class) -> Mapping {
        Mapping::option(self.mapping(class))
    }

    pub fn array_of_links(&self, class: &Class) -> Mapping {
        Mapping::array(self.link(class))
    }

    pub fn optional_link(&self, class: &Class) -> Mapping {
        Mapping::optional_link(self.mapping(class))
    }

    /// Picks the class whose predicate matches first, in the given order.
    pub fn choose<I>(&self, description: impl Into<String>, alternatives: I) -> ChoiceMapping
    where
        I: IntoIterator<Item = (Predicate, Class)>,
    {
        alternatives
            .into_iter()
            .fold(ChoiceMapping::new(description), |choice, (predicate, class)| {
                choice.when(move |json| predicate(json), self.mapping(&class))
            })
    }

    fn declare(
        &self,
        class: &Class,
        target: String,
        source: String,
        declared: Declared,
    ) -> ApiResult<()> {
        let mut state = self.lock();
        ensure_open(&state, class)?;
        trace!(class = %class, target = %target, source = %source, "field declared");
        state
            .entries
            .entry(class.clone())
            .or_default()
            .properties
            .insert(target, Declaration { source, declared });
        Ok(())
    }

    fn weak(&self) -> Weak<Mutex<RegistryState>> {
        Arc::downgrade(&self.state)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        lock_state(&self.state)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Registry")
            .field("declared", &state.entries.len())
            .field("built", &state.built.len())
            .finish()
    }
}

fn lock_state(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn ensure_open(state: &RegistryState, class: &Class) -> ApiResult<()> {
    if state.built.contains_key(class) {
        return Err(Error::new(ErrorKind::Construction).with_message(format!(
            "cannot add more properties to {class}, mapping already built"
        )));
    }
    Ok(())
}

fn build_locked(state: &mut RegistryState, class: &Class) -> ObjectMapping {
    if let Some(built) = state.built.get(class) {
        return built.clone();
    }

    let inherited = class
        .ancestors()
        .find(|ancestor| {
            state.entries.contains_key(*ancestor) || state.built.contains_key(*ancestor)
        })
        .cloned()
        .map(|ancestor| build_locked(state, &ancestor));

    let mapping = match (state.entries.get(class), inherited) {
        (None, None) => ObjectMapping::pass_through(class),
        (entry, inherited) => {
            let mut builder = ObjectMapping::builder(class);
            let mut extra_properties = None;
            if let Some(parent) = &inherited {
                extra_properties = parent.extra_properties();
                for (target, property) in parent.properties() {
                    builder = builder.property(target.clone(), property.clone());
                }
            }
            if let Some(entry) = entry {
                extra_properties = entry.extra_properties.or(extra_properties);
                for (target, declaration) in &entry.properties {
                    builder = builder.property(
                        target.clone(),
                        property_mapping(class, target, declaration),
                    );
                }
            }
            builder.maybe_extra_properties(extra_properties).build()
        }
    };

    trace!(
        class = %class,
        properties = mapping.properties().len(),
        "object mapping built"
    );
    state.built.insert(class.clone(), mapping.clone());
    mapping
}

fn property_mapping(class: &Class, target: &str, declaration: &Declaration) -> PropertyMapping {
    let owner = class.clone();
    let target = target.to_string();
    let handle = match declaration.declared.clone() {
        Declared::Field { shape, mapping } => MappingRef::lazy(move || {
            let resolved = mapping.resolve()?;
            if shape.accepts(resolved) {
                return Ok(resolved.clone());
            }
            Err(Error::new(ErrorKind::Construction).with_message(format!(
                "field '{target}' of {owner} is declared {shape} but mapped as {}",
                resolved.describe()
            )))
        }),
        Declared::Link { mapping } => MappingRef::lazy(move || {
            link_mapping(&mapping)
                .map_err(|err| err.with_context(format!("field '{target}' of {owner}")))
        }),
    };
    PropertyMapping::new(declaration.source.clone(), handle)
}

fn link_mapping(mapping: &MappingRef) -> Result<Mapping, Error> {
    match mapping.resolve()? {
        target @ (Mapping::Object(_) | Mapping::Choice(_)) => Ok(Mapping::link(target.clone())),
        Mapping::Option(item) => Ok(Mapping::optional_link(item.clone())),
        other => Err(Error::new(ErrorKind::Construction)
            .with_message(format!("invalid link mapping {}", other.describe()))),
    }
}
