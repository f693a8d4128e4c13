//! Codecs for durations and calendar values.
//!
//! Every value is split into whole seconds and a sub-second nanosecond part.
//! Seconds are floored, so the nanosecond part is never negative.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

use crate::codec::Codec;
use crate::context::{ReadContext, WriteContext};
use crate::error::{DecodeResult, EncodeResult, FormatError};
use crate::primitive::PrimitiveReader;
use crate::registry::BindingsBuilder;

const NANOS_PER_SECOND: u32 = 1_000_000_000;

async fn read_nanos(reader: &mut PrimitiveReader) -> DecodeResult<u32> {
    let nanos = reader.read_small_int().await?;
    if nanos >= NANOS_PER_SECOND {
        return Err(FormatError::OutOfRange(format!("{nanos} nanoseconds")).into());
    }
    Ok(nanos)
}

/// Split a signed duration into floored seconds and nanos in `[0, 1e9)`.
fn split_time_delta(value: &TimeDelta) -> (i64, u32) {
    let secs = value.num_seconds();
    let nanos = value.subsec_nanos();
    if nanos < 0 {
        (secs - 1, (nanos + NANOS_PER_SECOND as i32) as u32)
    } else {
        (secs, nanos as u32)
    }
}

/// Unsigned duration: varint seconds, small-int nanos.
#[derive(Clone, Copy, Debug, Default)]
pub struct DurationCodec;

#[async_trait]
impl Codec for DurationCodec {
    type Target = Duration;

    fn name(&self) -> &'static str {
        "duration"
    }

    async fn encode(&self, ctx: &mut WriteContext, value: &Duration) -> EncodeResult<()> {
        let writer = ctx.writer();
        writer.write_varint(value.as_secs());
        writer.write_small_int(value.subsec_nanos());
        Ok(())
    }

    async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<Duration> {
        let reader = ctx.reader();
        let secs = reader.read_varint().await?;
        let nanos = read_nanos(reader).await?;
        Ok(Duration::new(secs, nanos))
    }
}

/// Signed duration: zig-zag floored seconds, small-int nanos.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeDeltaCodec;

#[async_trait]
impl Codec for TimeDeltaCodec {
    type Target = TimeDelta;

    fn name(&self) -> &'static str {
        "time-delta"
    }

    async fn encode(&self, ctx: &mut WriteContext, value: &TimeDelta) -> EncodeResult<()> {
        let (secs, nanos) = split_time_delta(value);
        let writer = ctx.writer();
        writer.write_zigzag(secs);
        writer.write_small_int(nanos);
        Ok(())
    }

    async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<TimeDelta> {
        let reader = ctx.reader();
        let secs = reader.read_zigzag().await?;
        let nanos = read_nanos(reader).await?;
        Ok(TimeDelta::new(secs, nanos)
            .ok_or_else(|| FormatError::OutOfRange(format!("time delta of {secs}s")))?)
    }
}

/// UTC instant: zig-zag seconds since the epoch, small-int nanos.
#[derive(Clone, Copy, Debug, Default)]
pub struct DateTimeCodec;

#[async_trait]
impl Codec for DateTimeCodec {
    type Target = DateTime<Utc>;

    fn name(&self) -> &'static str {
        "datetime-utc"
    }

    async fn encode(&self, ctx: &mut WriteContext, value: &DateTime<Utc>) -> EncodeResult<()> {
        let writer = ctx.writer();
        writer.write_zigzag(value.timestamp());
        writer.write_small_int(value.timestamp_subsec_nanos());
        Ok(())
    }

    async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<DateTime<Utc>> {
        let reader = ctx.reader();
        let secs = reader.read_zigzag().await?;
        // Leap seconds carry nanos in [1e9, 2e9).
        let nanos = reader.read_small_int().await?;
        Ok(DateTime::from_timestamp(secs, nanos)
            .ok_or_else(|| FormatError::OutOfRange(format!("timestamp {secs}.{nanos:09}")))?)
    }
}

/// Calendar date: zig-zag days since 0001-01-01.
#[derive(Clone, Copy, Debug, Default)]
pub struct NaiveDateCodec;

#[async_trait]
impl Codec for NaiveDateCodec {
    type Target = NaiveDate;

    fn name(&self) -> &'static str {
        "naive-date"
    }

    async fn encode(&self, ctx: &mut WriteContext, value: &NaiveDate) -> EncodeResult<()> {
        use chrono::Datelike;
        ctx.writer().write_zigzag(i64::from(value.num_days_from_ce()));
        Ok(())
    }

    async fn decode(&self, ctx: &mut ReadContext) -> DecodeResult<NaiveDate> {
        let raw = ctx.reader().read_zigzag().await?;
        i32::try_from(raw)
            .ok()
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .ok_or_else(|| FormatError::OutOfRange(format!("{raw} days from CE")).into())
    }
}

/// Register the time codecs, in their canonical order.
pub fn bind_time_types(builder: BindingsBuilder) -> BindingsBuilder {
    builder
        .bind(DurationCodec)
        .bind(TimeDeltaCodec)
        .bind(DateTimeCodec)
        .bind(NaiveDateCodec)
}

#[cfg(test)]
mod tests {
    use std::any::TypeId;
    use std::io::Cursor;

    use super::*;
    use crate::header::HEADER_LEN;
    use crate::testing::{block_on, registry, roundtrip, store};
    use cfgcache_types::Value;
    use proptest::prelude::*;

    fn ninety_days() -> Duration {
        Duration::from_secs(90 * 86_400 + 5 * 3_600 + 30 * 60) + Duration::from_nanos(500_000_000)
    }

    #[tokio::test]
    async fn duration_splits_into_seconds_and_nanos() {
        let registry = registry();
        let (bytes, _) = store(&registry, &Value::new(ninety_days())).await;

        let mut reader = PrimitiveReader::new(Box::new(Cursor::new(bytes)), 64);
        let mut header = [0u8; HEADER_LEN];
        reader.read_into(&mut header).await.unwrap();
        assert_eq!(reader.read_u8().await.unwrap(), 0x02);
        let tag = reader.read_small_int().await.unwrap();
        assert_eq!(tag, registry.lookup_for_encode(TypeId::of::<Duration>()).tag());
        assert_eq!(reader.read_varint().await.unwrap(), 7_795_800);
        assert_eq!(reader.read_small_int().await.unwrap(), 500_000_000);
        assert!(reader.is_at_end().await.unwrap());

        assert_eq!(roundtrip(ninety_days()).await, ninety_days());
    }

    #[test]
    fn negative_time_delta_floors_seconds() {
        let delta = TimeDelta::milliseconds(-1_500);
        assert_eq!(split_time_delta(&delta), (-2, 500_000_000));
        assert_eq!(split_time_delta(&TimeDelta::seconds(3)), (3, 0));
        assert_eq!(split_time_delta(&TimeDelta::zero()), (0, 0));
    }

    #[tokio::test]
    async fn time_delta_boundaries() {
        assert_eq!(roundtrip(TimeDelta::MAX).await, TimeDelta::MAX);
        assert_eq!(roundtrip(TimeDelta::MIN).await, TimeDelta::MIN);
        let negative = TimeDelta::nanoseconds(-1);
        assert_eq!(roundtrip(negative).await, negative);
    }

    #[tokio::test]
    async fn calendar_values_roundtrip() {
        let instant = DateTime::from_timestamp(-86_400 * 365, 123_456_789).unwrap();
        assert_eq!(roundtrip(instant).await, instant);
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(roundtrip(date).await, date);
        assert_eq!(roundtrip(NaiveDate::MIN).await, NaiveDate::MIN);
    }

    proptest! {
        #[test]
        fn duration_roundtrip(secs in any::<u64>(), nanos in 0u32..NANOS_PER_SECOND) {
            let value = Duration::new(secs, nanos);
            prop_assert_eq!(block_on(roundtrip(value)), value);
        }

        #[test]
        fn time_delta_nanos_in_range(ms in -1_000_000_000_000i64..1_000_000_000_000i64) {
            let value = TimeDelta::milliseconds(ms);
            let (_, nanos) = split_time_delta(&value);
            prop_assert!(nanos < NANOS_PER_SECOND);
            prop_assert_eq!(block_on(roundtrip(value)), value);
        }
    }
}
