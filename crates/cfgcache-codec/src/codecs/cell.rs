//! Codec for [`SharedCell`], the node through which reference cycles close.

use std::any::TypeId;

use async_trait::async_trait;
use cfgcache_types::{SharedCell, Value};

use crate::codec::DynCodec;
use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeResult, EncodeError, EncodeResult, FormatError};

/// Presence byte, then the contents if the cell is filled.
///
/// On decode the empty cell is published before its contents are read, so
/// back-references from inside the contents resolve to the same cell.
#[derive(Clone, Copy, Debug, Default)]
pub struct SharedCellCodec;

#[async_trait]
impl DynCodec for SharedCellCodec {
    fn name(&self) -> &str {
        "shared-cell"
    }

    fn target(&self) -> Option<TypeId> {
        Some(TypeId::of::<SharedCell>())
    }

    fn publishes_early(&self) -> bool {
        true
    }

    async fn encode_value(&self, ctx: &mut WriteContext, value: &Value) -> EncodeResult<()> {
        let cell = value
            .downcast_ref::<SharedCell>()
            .ok_or_else(|| EncodeError::Rejected(format!("`{}` is not a SharedCell", value.type_name())))?;
        match cell.get() {
            Some(contents) => {
                ctx.writer().write_bool(true);
                ctx.encode_cell(contents).await
            }
            None => {
                ctx.writer().write_bool(false);
                Ok(())
            }
        }
    }

    async fn decode_value(&self, ctx: &mut ReadContext) -> DecodeResult<Value> {
        let value = Value::new(SharedCell::new());
        ctx.publish(&value);
        if ctx.reader().read_bool().await? {
            let contents = ctx.decode_cell().await?;
            let cell = value
                .downcast_ref::<SharedCell>()
                .ok_or_else(|| FormatError::Corrupt("shared cell lost its type".into()))?;
            cell.set(contents)
                .map_err(|err| FormatError::Corrupt(err.to_string()))?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{load, registry, store};

    #[tokio::test]
    async fn cycle_through_cell_roundtrips() {
        // cell -> [list] -> cell
        let cell = Value::new(SharedCell::new());
        let list = Value::new(vec![cell.clone(), Value::new("tail".to_string())]);
        cell.cast::<SharedCell>().unwrap().set(list).unwrap();

        let registry = registry();
        let (bytes, summary) = store(&registry, &cell).await;
        assert!(summary.problems.is_empty());
        assert_eq!(summary.references_written, 1);

        let (decoded, read) = load(&registry, bytes).await;
        assert!(read.problems.is_empty());
        let inner = decoded.cast::<SharedCell>().unwrap().get().unwrap();
        let items = inner.cast::<Vec<Value>>().unwrap();
        assert!(items[0].ptr_eq(&decoded));
        assert_eq!(items[1].downcast_ref::<String>().unwrap(), "tail");
    }

    #[tokio::test]
    async fn cycle_closing_on_plain_node_is_a_problem() {
        // list -> cell -> list: the back edge targets the list, which cannot
        // be published before its elements are decoded.
        let cell = Value::new(SharedCell::new());
        let list = Value::new(vec![cell.clone()]);
        cell.cast::<SharedCell>().unwrap().set(list.clone()).unwrap();

        let registry = registry();
        let (bytes, summary) = store(&registry, &list).await;
        assert_eq!(summary.problems.len(), 1);
        assert_eq!(summary.problems[0].location, "<root>[0].*");
        assert_eq!(summary.references_written, 0);

        let (decoded, read) = load(&registry, bytes).await;
        assert!(read.problems.is_empty());
        let items = decoded.cast::<Vec<Value>>().unwrap();
        let contents = items[0].cast::<SharedCell>().unwrap().get().unwrap();
        assert!(contents.is_null());
    }

    #[tokio::test]
    async fn empty_cell() {
        let registry = registry();
        let (bytes, _) = store(&registry, &Value::new(SharedCell::new())).await;
        let (decoded, _) = load(&registry, bytes).await;
        assert!(!decoded.cast::<SharedCell>().unwrap().is_set());
    }

    #[tokio::test]
    async fn cell_shared_between_two_owners() {
        let cell = Value::new(SharedCell::with(Value::new(7u32)));
        let root = Value::new(vec![cell.clone(), cell]);

        let registry = registry();
        let (bytes, _) = store(&registry, &root).await;
        let (decoded, _) = load(&registry, bytes).await;
        let items = decoded.cast::<Vec<Value>>().unwrap();
        assert!(items[0].ptr_eq(&items[1]));
        let contents = items[0].cast::<SharedCell>().unwrap().get().unwrap();
        assert_eq!(contents.downcast_ref::<u32>(), Some(&7));
    }
}
