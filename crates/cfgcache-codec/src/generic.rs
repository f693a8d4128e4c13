//! Catch-all codec for structured objects.
//!
//! Types opt in by implementing [`Describable`] and registering with a
//! [`ShapeTable`]. A record is written as:
//!
//! ```text
//! <string shape name> <varint field count> (<string field name> <value>)*
//! ```
//!
//! Every field is decoded before the shape's reconstruct function runs, so a
//! record whose shape is unknown or has changed is still consumed in full and
//! becomes a problem plus a null placeholder.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cfgcache_types::Value;
use tracing::debug;

use crate::codec::DynCodec;
use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult, FormatError, ShapeError};
use crate::registry::BindingRegistry;

/// Name used for the generic codec in the registry fingerprint.
pub const GENERIC_CODEC_NAME: &str = "generic";

/// One named field of a structured object.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

impl Field {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Decoded fields handed to [`Describable::reconstruct`].
#[derive(Debug)]
pub struct Fields {
    shape: String,
    entries: Vec<Field>,
}

impl Fields {
    pub fn new(shape: impl Into<String>, entries: Vec<Field>) -> Self {
        Self {
            shape: shape.into(),
            entries,
        }
    }

    pub fn shape(&self) -> &str {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove a field if present.
    pub fn optional(&mut self, name: &str) -> Option<Value> {
        let index = self.entries.iter().position(|f| f.name == name)?;
        Some(self.entries.remove(index).value)
    }

    /// Remove a required field.
    pub fn take(&mut self, name: &str) -> Result<Value, ShapeError> {
        self.optional(name).ok_or_else(|| ShapeError::MissingField {
            shape: self.shape.clone(),
            field: name.to_string(),
        })
    }

    /// Remove a required, non-null field of type `T` and clone it out.
    pub fn take_as<T: Any + Clone>(&mut self, name: &str) -> Result<T, ShapeError> {
        let value = self.take(name)?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| self.wrong_type::<T>(name))
    }

    /// Like [`take_as`](Self::take_as), but a null field yields `None`.
    pub fn take_opt_as<T: Any + Clone>(&mut self, name: &str) -> Result<Option<T>, ShapeError> {
        let value = self.take(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .downcast_ref::<T>()
            .cloned()
            .map(Some)
            .ok_or_else(|| self.wrong_type::<T>(name))
    }

    /// Remove a required field, keeping the shared allocation.
    pub fn take_arc<T: Any + Send + Sync>(&mut self, name: &str) -> Result<Arc<T>, ShapeError> {
        let value = self.take(name)?;
        value
            .downcast_arc::<T>()
            .ok_or_else(|| self.wrong_type::<T>(name))
    }

    /// Fail if the stream carried fields the shape no longer declares.
    pub fn ensure_consumed(self) -> Result<(), ShapeError> {
        match self.entries.into_iter().next() {
            Some(extra) => Err(ShapeError::UnknownField {
                shape: self.shape,
                field: extra.name,
            }),
            None => Ok(()),
        }
    }

    fn wrong_type<T>(&self, name: &str) -> ShapeError {
        ShapeError::WrongType {
            shape: self.shape.clone(),
            field: name.to_string(),
            expected: std::any::type_name::<T>(),
        }
    }
}

/// A type the generic codec can take apart and put back together.
pub trait Describable: Any + Send + Sync + Sized {
    /// Stable name written to the stream.
    const SHAPE: &'static str;

    fn describe(&self) -> Result<Vec<Field>, ShapeError>;

    fn reconstruct(fields: Fields) -> Result<Self, ShapeError>;
}

type DescribeFn = Box<dyn Fn(&Value) -> Result<Vec<Field>, ShapeError> + Send + Sync>;
type ReconstructFn = Box<dyn Fn(Fields) -> Result<Value, ShapeError> + Send + Sync>;

struct Shape {
    name: &'static str,
    describe: DescribeFn,
    reconstruct: ReconstructFn,
}

/// Shapes known to the generic codec, by type for encode and by name for
/// decode.
#[derive(Default)]
pub struct ShapeTable {
    shapes: Vec<Shape>,
    by_type: HashMap<TypeId, usize>,
    by_name: HashMap<&'static str, usize>,
}

impl ShapeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`. A later registration with the same shape name replaces
    /// the earlier one for decoding.
    pub fn register<T: Describable>(&mut self) -> &mut Self {
        let index = self.shapes.len();
        self.shapes.push(Shape {
            name: T::SHAPE,
            describe: Box::new(|value: &Value| match value.downcast_ref::<T>() {
                Some(typed) => typed.describe(),
                None => Err(ShapeError::Unsupported(format!(
                    "`{}` is not a `{}`",
                    value.type_name(),
                    T::SHAPE
                ))),
            }),
            reconstruct: Box::new(|fields: Fields| T::reconstruct(fields).map(Value::new)),
        });
        self.by_type.insert(TypeId::of::<T>(), index);
        self.by_name.insert(T::SHAPE, index);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T: Describable>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Names of shapes whose type `registry` binds to a specific codec.
    /// Such shapes are never used for encoding.
    pub fn shadowed_by<'a>(
        &'a self,
        registry: &'a BindingRegistry,
    ) -> impl Iterator<Item = &'static str> + 'a {
        self.by_type
            .iter()
            .filter(|(type_id, _)| registry.has_specific(**type_id))
            .map(|(_, &index)| self.shapes[index].name)
    }

    /// Registered shape names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.shapes.iter().map(|s| s.name)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    fn for_type(&self, type_id: TypeId) -> Option<&Shape> {
        self.by_type.get(&type_id).map(|&i| &self.shapes[i])
    }

    fn for_name(&self, name: &str) -> Option<&Shape> {
        self.by_name.get(name).map(|&i| &self.shapes[i])
    }
}

impl fmt::Debug for ShapeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Fallback codec over a [`ShapeTable`].
pub struct GenericCodec {
    shapes: Arc<ShapeTable>,
}

impl GenericCodec {
    pub fn new(shapes: Arc<ShapeTable>) -> Self {
        Self { shapes }
    }

    pub fn shapes(&self) -> &Arc<ShapeTable> {
        &self.shapes
    }
}

#[async_trait]
impl DynCodec for GenericCodec {
    fn name(&self) -> &str {
        GENERIC_CODEC_NAME
    }

    fn target(&self) -> Option<TypeId> {
        None
    }

    async fn encode_value(&self, ctx: &mut WriteContext, value: &Value) -> EncodeResult<()> {
        let type_id = value
            .type_id()
            .ok_or_else(|| EncodeError::Rejected("cannot describe null".into()))?;
        let shape = self.shapes.for_type(type_id).ok_or_else(|| {
            EncodeError::Rejected(format!(
                "no codec or shape registered for `{}`",
                value.type_name()
            ))
        })?;
        let fields = (shape.describe)(value).map_err(|err| {
            EncodeError::Rejected(format!("cannot describe `{}`: {err}", shape.name))
        })?;

        let writer = ctx.writer();
        writer.write_str(shape.name);
        writer.write_varint(fields.len() as u64);
        for field in &fields {
            ctx.writer().write_str(&field.name);
            ctx.encode_field(&field.name, &field.value).await?;
        }
        Ok(())
    }

    async fn decode_value(&self, ctx: &mut ReadContext) -> DecodeResult<Value> {
        let shape_name = ctx.reader().read_string().await?;
        let count = ctx.reader().read_varint().await?;
        let count = usize::try_from(count)
            .map_err(|_| FormatError::OutOfRange(format!("field count {count}")))?;

        let mut entries = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let name = ctx.reader().read_string().await?;
            let value = ctx.decode_field(&name).await?;
            entries.push(Field { name, value });
        }

        let Some(shape) = self.shapes.for_name(&shape_name) else {
            debug!(shape = %shape_name, fields = count, "unknown shape in stream");
            return Err(DecodeError::Rejected(format!(
                "unknown shape `{shape_name}`"
            )));
        };
        (shape.reconstruct)(Fields::new(shape_name.as_str(), entries)).map_err(|err| {
            DecodeError::Rejected(format!("cannot reconstruct `{shape_name}`: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgcache_types::Problem;

    use crate::codecs::scalars::{I64Codec, StringCodec};
    use crate::context::SessionOptions;
    use crate::memory::SharedBuffer;
    use crate::registry::BindingsBuilder;

    #[derive(Clone, Debug, PartialEq)]
    struct Endpoint {
        host: String,
        port: i64,
    }

    impl Describable for Endpoint {
        const SHAPE: &'static str = "Endpoint";

        fn describe(&self) -> Result<Vec<Field>, ShapeError> {
            Ok(vec![
                Field::new("host", Value::new(self.host.clone())),
                Field::new("port", Value::new(self.port)),
            ])
        }

        fn reconstruct(mut fields: Fields) -> Result<Self, ShapeError> {
            let endpoint = Endpoint {
                host: fields.take_as("host")?,
                port: fields.take_as("port")?,
            };
            fields.ensure_consumed()?;
            Ok(endpoint)
        }
    }

    // Same wire name, but requires a field the writer never produced.
    struct EndpointV2;

    impl Describable for EndpointV2 {
        const SHAPE: &'static str = "Endpoint";

        fn describe(&self) -> Result<Vec<Field>, ShapeError> {
            Ok(Vec::new())
        }

        fn reconstruct(mut fields: Fields) -> Result<Self, ShapeError> {
            fields.take("scheme")?;
            Ok(EndpointV2)
        }
    }

    fn registry(shapes: ShapeTable) -> Arc<BindingRegistry> {
        Arc::new(
            BindingsBuilder::new()
                .bind(StringCodec)
                .bind(I64Codec)
                .build(Arc::new(GenericCodec::new(Arc::new(shapes)))),
        )
    }

    async fn store(registry: &Arc<BindingRegistry>, root: &Value) -> (Vec<u8>, usize) {
        let buffer = SharedBuffer::new();
        let mut ctx = WriteContext::new(buffer.clone(), registry.clone(), SessionOptions::default());
        ctx.encode_root(root).await.unwrap();
        let summary = ctx.finish().await.unwrap();
        (buffer.contents(), summary.problems.len())
    }

    async fn load(registry: &Arc<BindingRegistry>, bytes: Vec<u8>) -> (Value, Vec<Problem>) {
        let mut ctx = ReadContext::new(
            std::io::Cursor::new(bytes),
            registry.clone(),
            SessionOptions::default(),
        );
        let root = ctx.decode_root().await.unwrap();
        let summary = ctx.finish();
        (root, summary.problems)
    }

    #[tokio::test]
    async fn describable_roundtrip() {
        let registry = registry(ShapeTable::new().with::<Endpoint>());
        let endpoint = Endpoint {
            host: "cache.local".into(),
            port: 8443,
        };
        let (bytes, problems) = store(&registry, &Value::new(endpoint.clone())).await;
        assert_eq!(problems, 0);

        let (root, problems) = load(&registry, bytes).await;
        assert!(problems.is_empty());
        assert_eq!(root.downcast_ref::<Endpoint>(), Some(&endpoint));
    }

    #[tokio::test]
    async fn undescribable_value_becomes_problem() {
        let registry = registry(ShapeTable::new());
        let buffer = SharedBuffer::new();
        let mut ctx = WriteContext::new(buffer.clone(), registry.clone(), SessionOptions::default());
        ctx.encode_root(&Value::new(std::net::Ipv4Addr::LOCALHOST))
            .await
            .unwrap();
        let summary = ctx.finish().await.unwrap();
        assert_eq!(summary.problems.len(), 1);
        assert!(summary.problems[0].message.contains("Ipv4Addr"));
        assert!(summary.problems[0]
            .cause
            .as_deref()
            .is_some_and(|c| c.contains("no codec or shape")));
        assert_eq!(summary.objects_written, 0);

        let (root, problems) = load(&registry, buffer.contents()).await;
        assert!(root.is_null());
        assert!(problems.is_empty());
    }

    #[tokio::test]
    async fn changed_shape_decodes_to_null() {
        let writer = registry(ShapeTable::new().with::<Endpoint>());
        let endpoint = Value::new(Endpoint {
            host: "a".into(),
            port: 1,
        });
        let (bytes, _) = store(&writer, &endpoint).await;

        let reader = registry(ShapeTable::new().with::<EndpointV2>());
        let (root, problems) = load(&reader, bytes).await;
        assert!(root.is_null());
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].message, "`generic` value was not restored");
        assert!(problems[0].cause.as_deref().is_some_and(|c| c.contains("scheme")));
    }

    #[tokio::test]
    async fn unknown_shape_decodes_to_null() {
        let writer = registry(ShapeTable::new().with::<Endpoint>());
        let (bytes, _) = store(
            &writer,
            &Value::new(Endpoint {
                host: "b".into(),
                port: 2,
            }),
        )
        .await;

        let reader = registry(ShapeTable::new());
        let (root, problems) = load(&reader, bytes).await;
        assert!(root.is_null());
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].cause.as_deref(), Some("unknown shape `Endpoint`"));
    }

    impl Describable for String {
        const SHAPE: &'static str = "Text";

        fn describe(&self) -> Result<Vec<Field>, ShapeError> {
            Ok(vec![Field::new("text", Value::new(self.clone()))])
        }

        fn reconstruct(mut fields: Fields) -> Result<Self, ShapeError> {
            fields.take_as("text")
        }
    }

    #[test]
    fn shapes_shadowed_by_specific_codecs() {
        let shapes = ShapeTable::new().with::<Endpoint>().with::<String>();
        let registry = registry(ShapeTable::new());
        let shadowed: Vec<_> = shapes.shadowed_by(&registry).collect();
        assert_eq!(shadowed, ["Text"]);
    }

    #[test]
    fn fields_accessors() {
        let mut fields = Fields::new(
            "Thing",
            vec![
                Field::new("a", Value::new(1i64)),
                Field::new("b", Value::null()),
                Field::new("c", Value::new("x".to_string())),
            ],
        );
        assert_eq!(fields.len(), 3);
        assert_eq!(fields.take_as::<i64>("a").unwrap(), 1);
        assert_eq!(fields.take_opt_as::<String>("b").unwrap(), None);
        assert_eq!(
            fields.take_as::<i64>("c").unwrap_err(),
            ShapeError::WrongType {
                shape: "Thing".into(),
                field: "c".into(),
                expected: "i64",
            }
        );
        assert!(matches!(
            fields.take("a").unwrap_err(),
            ShapeError::MissingField { .. }
        ));
        fields.ensure_consumed().unwrap();

        let mut extra = Fields::new("Thing", vec![Field::new("z", Value::null())]);
        assert!(extra.optional("y").is_none());
        assert_eq!(
            extra.ensure_consumed().unwrap_err(),
            ShapeError::UnknownField {
                shape: "Thing".into(),
                field: "z".into(),
            }
        );
    }
}
