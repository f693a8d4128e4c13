use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::codec::{Codec, DynCodec, TypedCodec};
use crate::error::{FormatError, FormatResult};
use crate::header::{SchemaFingerprint, ENGINE_VERSION};

/// A codec paired with its positional wire tag.
#[derive(Clone)]
pub struct Binding {
    tag: u32,
    codec: Arc<dyn DynCodec>,
}

impl Binding {
    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn codec(&self) -> &Arc<dyn DynCodec> {
        &self.codec
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding({} => {})", self.tag, self.codec.name())
    }
}

/// Collects codecs in registration order.
///
/// Tags are positions in this order, so the writing and reading side of a
/// stream must build their registries from the same sequence. The
/// fingerprint written to every header enforces this.
pub struct BindingsBuilder {
    version: u32,
    codecs: Vec<Arc<dyn DynCodec>>,
}

impl BindingsBuilder {
    pub fn new() -> Self {
        Self {
            version: ENGINE_VERSION,
            codecs: Vec::new(),
        }
    }

    /// Override the schema version written to stream headers.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Register a typed codec under the next tag.
    pub fn bind<C: Codec>(self, codec: C) -> Self {
        self.bind_dyn(Arc::new(TypedCodec::new(codec)))
    }

    /// Register an erased codec under the next tag.
    pub fn bind_dyn(mut self, codec: Arc<dyn DynCodec>) -> Self {
        self.codecs.push(codec);
        self
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Freeze the registry, appending `fallback` as the last binding. The
    /// fallback is chosen for every type no earlier codec claims.
    pub fn build(mut self, fallback: Arc<dyn DynCodec>) -> BindingRegistry {
        self.codecs.push(fallback);

        let bindings: Vec<Binding> = self
            .codecs
            .into_iter()
            .enumerate()
            .map(|(tag, codec)| Binding {
                tag: tag as u32,
                codec,
            })
            .collect();

        let mut by_type = HashMap::new();
        for binding in &bindings[..bindings.len() - 1] {
            if let Some(type_id) = binding.codec.target() {
                // First registered wins.
                by_type.entry(type_id).or_insert(binding.tag as usize);
            }
        }

        let fingerprint = SchemaFingerprint::compute(bindings.iter().map(|b| b.codec.name()));
        debug!(
            bindings = bindings.len(),
            version = self.version,
            fingerprint = %fingerprint,
            "binding registry built"
        );

        BindingRegistry {
            fallback: bindings.len() - 1,
            bindings,
            by_type,
            version: self.version,
            fingerprint,
        }
    }
}

impl Default for BindingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable, shareable codec registry.
pub struct BindingRegistry {
    bindings: Vec<Binding>,
    by_type: HashMap<TypeId, usize>,
    fallback: usize,
    version: u32,
    fingerprint: SchemaFingerprint,
}

impl BindingRegistry {
    /// Binding for a runtime type: the first exact match, else the fallback.
    pub fn lookup_for_encode(&self, type_id: TypeId) -> &Binding {
        let index = self.by_type.get(&type_id).copied().unwrap_or(self.fallback);
        &self.bindings[index]
    }

    /// Binding for a wire tag.
    pub fn lookup_for_decode(&self, tag: u32) -> FormatResult<&Binding> {
        self.bindings
            .get(tag as usize)
            .ok_or(FormatError::UnknownTag {
                tag,
                bindings: self.bindings.len(),
            })
    }

    /// Returns `true` if some codec other than the fallback claims `type_id`.
    pub fn has_specific(&self, type_id: TypeId) -> bool {
        self.by_type.contains_key(&type_id)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fingerprint(&self) -> SchemaFingerprint {
        self.fingerprint
    }
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("bindings", &self.bindings)
            .field("version", &self.version)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::scalars::{I64Codec, StringCodec};
    use crate::generic::{GenericCodec, ShapeTable};

    fn fallback() -> Arc<dyn DynCodec> {
        Arc::new(GenericCodec::new(Arc::new(ShapeTable::new())))
    }

    #[test]
    fn tags_are_sequential() {
        let registry = BindingsBuilder::new()
            .bind(StringCodec)
            .bind(I64Codec)
            .build(fallback());
        let tags: Vec<u32> = registry.bindings().iter().map(Binding::tag).collect();
        assert_eq!(tags, [0, 1, 2]);
        assert_eq!(registry.lookup_for_encode(TypeId::of::<String>()).tag(), 0);
        assert_eq!(registry.lookup_for_encode(TypeId::of::<i64>()).tag(), 1);
    }

    #[test]
    fn unknown_types_go_to_fallback() {
        let registry = BindingsBuilder::new().bind(StringCodec).build(fallback());
        let binding = registry.lookup_for_encode(TypeId::of::<std::net::Ipv4Addr>());
        assert_eq!(binding.tag(), 1);
        assert_eq!(binding.codec().name(), "generic");
        assert!(!registry.has_specific(TypeId::of::<std::net::Ipv4Addr>()));
    }

    #[test]
    fn first_registration_wins() {
        struct OtherStringCodec;

        #[async_trait::async_trait]
        impl Codec for OtherStringCodec {
            type Target = String;
            fn name(&self) -> &'static str {
                "other-string"
            }
            async fn encode(
                &self,
                _ctx: &mut crate::WriteContext,
                _value: &String,
            ) -> crate::EncodeResult<()> {
                Ok(())
            }
            async fn decode(&self, _ctx: &mut crate::ReadContext) -> crate::DecodeResult<String> {
                Ok(String::new())
            }
        }

        let registry = BindingsBuilder::new()
            .bind(StringCodec)
            .bind(OtherStringCodec)
            .build(fallback());
        assert_eq!(registry.lookup_for_encode(TypeId::of::<String>()).tag(), 0);
        assert_eq!(registry.lookup_for_decode(1).unwrap().codec().name(), "other-string");
    }

    #[test]
    fn decode_tag_out_of_range() {
        let registry = BindingsBuilder::new().bind(StringCodec).build(fallback());
        let err = registry.lookup_for_decode(9).unwrap_err();
        assert_eq!(err, FormatError::UnknownTag { tag: 9, bindings: 2 });
    }

    #[test]
    fn registration_order_changes_fingerprint() {
        let a = BindingsBuilder::new()
            .bind(StringCodec)
            .bind(I64Codec)
            .build(fallback());
        let b = BindingsBuilder::new()
            .bind(I64Codec)
            .bind(StringCodec)
            .build(fallback());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.version(), ENGINE_VERSION);
    }

    #[test]
    fn explicit_version() {
        let registry = BindingsBuilder::new().version(42).build(fallback());
        assert_eq!(registry.version(), 42);
        assert_eq!(registry.len(), 1);
    }
}
