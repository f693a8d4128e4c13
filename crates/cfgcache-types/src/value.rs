use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::error::TypeError;

#[derive(Clone)]
struct Node {
    data: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

/// Nullable handle to one node of a cached object graph.
///
/// A `Value` is cheap to clone: clones share the same allocation and
/// therefore the same identity. Two values are the *same object* iff they
/// point at the same allocation ([`Value::ptr_eq`]); structurally equal
/// values built separately are distinct objects and are serialized twice.
///
/// The concrete Rust type of a non-null value is recorded at construction
/// time and drives codec dispatch.
#[derive(Clone, Default)]
pub struct Value(Option<Node>);

impl Value {
    /// The null value.
    pub const fn null() -> Self {
        Self(None)
    }

    /// Allocate a new object holding `value`.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an existing allocation, preserving its identity.
    pub fn from_arc<T: Any + Send + Sync>(data: Arc<T>) -> Self {
        Self(Some(Node {
            data,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }))
    }

    /// Returns `true` for the null value.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Runtime type of the referenced object, `None` for null.
    pub fn type_id(&self) -> Option<TypeId> {
        self.0.as_ref().map(|node| node.type_id)
    }

    /// Rust type name of the referenced object, `"null"` for null.
    pub fn type_name(&self) -> &'static str {
        self.0.as_ref().map_or("null", |node| node.type_name)
    }

    /// Returns `true` if the referenced object is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id() == Some(TypeId::of::<T>())
    }

    /// Borrow the referenced object as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_ref()?.data.downcast_ref::<T>()
    }

    /// Borrow as a `T`, explaining why the cast failed.
    pub fn cast<T: Any>(&self) -> Result<&T, TypeError> {
        let node = self.0.as_ref().ok_or(TypeError::UnexpectedNull)?;
        node.data
            .downcast_ref::<T>()
            .ok_or(TypeError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found: node.type_name,
            })
    }

    /// Recover the typed allocation, sharing identity with this value.
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let node = self.0.as_ref()?;
        Arc::clone(&node.data).downcast::<T>().ok()
    }

    /// Address of the referenced allocation; `None` for null.
    ///
    /// Only meaningful while some clone of the value is alive.
    pub fn identity(&self) -> Option<usize> {
        self.0
            .as_ref()
            .map(|node| Arc::as_ptr(&node.data) as *const () as usize)
    }

    /// Returns `true` if both values reference the same object.
    /// Two nulls are considered the same.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => write!(f, "Value(null)"),
            Some(node) => write!(
                f,
                "Value({}@{:#x})",
                node.type_name,
                Arc::as_ptr(&node.data) as *const () as usize
            ),
        }
    }
}
