use std::sync::Arc;

use cfgcache_codec::{bind_builtin_types, BindingRegistry, BindingsBuilder, GenericCodec, ShapeTable};
use tracing::warn;

/// The canonical registry: every built-in codec in its fixed order, with
/// the generic codec over `shapes` as the fallback.
///
/// This is the single place the codec order is defined. Any change to it
/// changes the fingerprint in new stream headers, so caches written before
/// the change are rejected on load.
pub fn default_registry(shapes: ShapeTable) -> Arc<BindingRegistry> {
    let shapes = Arc::new(shapes);
    let registry = bind_builtin_types(BindingsBuilder::new())
        .build(Arc::new(GenericCodec::new(Arc::clone(&shapes))));
    for shape in shapes.shadowed_by(&registry) {
        warn!(shape, "shape is shadowed by a built-in codec and will not be used");
    }
    Arc::new(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgcache_codec::ENGINE_VERSION;

    #[test]
    fn fallback_is_last() {
        let registry = default_registry(ShapeTable::new());
        let last = registry.bindings().last().unwrap();
        assert_eq!(last.codec().name(), "generic");
        assert_eq!(last.tag() as usize, registry.len() - 1);
        assert_eq!(registry.version(), ENGINE_VERSION);
    }

    #[test]
    fn fingerprint_is_stable_across_builds() {
        let a = default_registry(ShapeTable::new());
        let b = default_registry(ShapeTable::new());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn codec_names_are_unique() {
        let registry = default_registry(ShapeTable::new());
        let mut names: Vec<&str> = registry.bindings().iter().map(|b| b.codec().name()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
