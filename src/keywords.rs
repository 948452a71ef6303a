//! Custom validation keywords backed by subject tags.
//!
//! `typeSize` and `phandle` check facts that only exist in a subject's YAML
//! tags. Validators see plain JSON, so tags are looked up by value address
//! in a per-thread table installed by [`TagScope`] while a tree is validated.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;

use jsonschema::paths::{LazyLocation, Location};
use jsonschema::{Keyword, ValidationError};
use serde_json::{Map, Value};

use crate::subject::{CellTag, SubjectTree};

/// Cell width assumed for untagged integer rows.
pub const DEFAULT_CELL_WIDTH: u8 = 32;

thread_local! {
    static TAGS: RefCell<HashMap<usize, CellTag>> = RefCell::new(HashMap::new());
}

fn address(value: &Value) -> usize {
    value as *const Value as usize
}

fn tag_of(value: &Value) -> Option<CellTag> {
    TAGS.with(|tags| tags.borrow().get(&address(value)).copied())
}

/// Makes a tree's tags visible to the custom keywords on this thread.
///
/// The tree stays borrowed for the guard's lifetime, so the recorded
/// addresses remain valid. The previous table is restored on drop.
pub struct TagScope<'t> {
    previous: HashMap<usize, CellTag>,
    _tree: PhantomData<&'t SubjectTree>,
    _not_send: PhantomData<*const ()>,
}

impl<'t> TagScope<'t> {
    pub fn enter(tree: &'t SubjectTree) -> Self {
        let table: HashMap<usize, CellTag> = tree
            .tags()
            .iter()
            .filter_map(|(pointer, tag)| tree.root().pointer(pointer).map(|v| (address(v), tag)))
            .collect();
        let previous = TAGS.with(|tags| std::mem::replace(&mut *tags.borrow_mut(), table));
        TagScope {
            previous,
            _tree: PhantomData,
            _not_send: PhantomData,
        }
    }
}

impl Drop for TagScope<'_> {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        TAGS.with(|tags| *tags.borrow_mut() = previous);
    }
}

/// Width of the cells in the first row of an integer matrix.
///
/// Anything without a tagged first row or cell counts as untagged, and
/// so as 32-bit.
fn cell_width(instance: &Value) -> u8 {
    let Some(row) = instance.as_array().and_then(|rows| rows.first()) else {
        return DEFAULT_CELL_WIDTH;
    };
    let tag = tag_of(row).or_else(|| row.as_array()?.first().and_then(tag_of));
    match tag {
        Some(CellTag::Width(width)) => width,
        _ => DEFAULT_CELL_WIDTH,
    }
}

/// `typeSize: N` requires integer rows to carry N-bit cells.
struct TypeSize {
    expected: u64,
    location: Location,
}

impl Keyword for TypeSize {
    fn validate<'i>(
        &self,
        instance: &'i Value,
        location: &LazyLocation,
    ) -> Result<(), ValidationError<'i>> {
        let width = cell_width(instance);
        if u64::from(width) == self.expected {
            return Ok(());
        }
        Err(ValidationError::custom(
            self.location.clone(),
            location.into(),
            instance,
            format!("size is {width}, expected {}", self.expected),
        ))
    }

    fn is_valid(&self, instance: &Value) -> bool {
        u64::from(cell_width(instance)) == self.expected
    }
}

pub(crate) fn type_size_factory<'a>(
    _parent: &'a Map<String, Value>,
    value: &'a Value,
    location: Location,
) -> Result<Box<dyn Keyword>, ValidationError<'a>> {
    match value.as_u64() {
        Some(expected @ (8 | 16 | 32 | 64)) => Ok(Box::new(TypeSize { expected, location })),
        _ => Err(ValidationError::custom(
            Location::new(),
            location,
            value,
            "typeSize must be one of 8, 16, 32 or 64",
        )),
    }
}

/// `phandle: true` requires a phandle-tagged cell.
struct Phandle {
    location: Location,
}

impl Keyword for Phandle {
    fn validate<'i>(
        &self,
        instance: &'i Value,
        location: &LazyLocation,
    ) -> Result<(), ValidationError<'i>> {
        if self.is_valid(instance) {
            return Ok(());
        }
        Err(ValidationError::custom(
            self.location.clone(),
            location.into(),
            instance,
            format!("missing phandle tag in {instance}"),
        ))
    }

    fn is_valid(&self, instance: &Value) -> bool {
        tag_of(instance) == Some(CellTag::Phandle)
    }
}

/// `phandle: false` accepts anything.
struct Unconstrained;

impl Keyword for Unconstrained {
    fn validate<'i>(&self, _: &'i Value, _: &LazyLocation) -> Result<(), ValidationError<'i>> {
        Ok(())
    }

    fn is_valid(&self, _: &Value) -> bool {
        true
    }
}

pub(crate) fn phandle_factory<'a>(
    _parent: &'a Map<String, Value>,
    value: &'a Value,
    location: Location,
) -> Result<Box<dyn Keyword>, ValidationError<'a>> {
    match value {
        Value::Bool(true) => Ok(Box::new(Phandle { location })),
        Value::Bool(false) => Ok(Box::new(Unconstrained)),
        _ => Err(ValidationError::custom(
            Location::new(),
            location,
            value,
            "phandle must be a boolean",
        )),
    }
}

/// Register the devicetree keywords on a validator builder.
pub fn register(options: &mut jsonschema::ValidationOptions) -> &mut jsonschema::ValidationOptions {
    options
        .with_keyword("typeSize", type_size_factory)
        .with_keyword("phandle", phandle_factory)
}
