//! Decimal columns.
//!
//! `Decimal(p, s)` is backed by Int32/Int64/Int128/Int256 depending on the
//! precision (caps 9/18/38/76); cell values are the scaled integers
//! `round(decimal * 10^s)`. With types-check enabled, the integral digits
//! of each value are validated against the declared precision before
//! packing.

use async_trait::async_trait;

use crate::column::{out_of_range, wrong_kind, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::{Int256, Value};

/// The four backing widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    W32,
    W64,
    W128,
    W256,
}

impl Width {
    fn for_precision(precision: u8) -> Width {
        match precision {
            0..=9 => Width::W32,
            10..=18 => Width::W64,
            19..=38 => Width::W128,
            _ => Width::W256,
        }
    }

    fn bytes(self) -> usize {
        match self {
            Width::W32 => 4,
            Width::W64 => 8,
            Width::W128 => 16,
            Width::W256 => 32,
        }
    }
}

/// Codec for every `Decimal` spelling.
pub struct DecimalCodec {
    precision: u8,
    scale: u8,
    width: Width,
    types_check: bool,
}

impl DecimalCodec {
    /// Construct from the declared precision and scale.
    pub fn new(precision: u8, scale: u8, types_check: bool) -> Self {
        DecimalCodec { precision, scale, width: Width::for_precision(precision), types_check }
    }

    fn spec_name(&self) -> String {
        format!("Decimal({}, {})", self.precision, self.scale)
    }

    /// The scaled mantissa of a value, widened to Int256.
    fn mantissa_of(&self, value: &Value) -> Result<Int256> {
        let scaled_int = |v: i128| -> Result<Int256> {
            let scale = 10i128
                .checked_pow(u32::from(self.scale))
                .ok_or_else(|| out_of_range(value, "Decimal"))?;
            v.checked_mul(scale)
                .map(Int256::from)
                .ok_or_else(|| out_of_range(value, &self.spec_name()))
        };
        match value {
            Value::Decimal32 { value: v, scale } if *scale == self.scale => {
                Ok(Int256::from(i128::from(*v)))
            }
            Value::Decimal64 { value: v, scale } if *scale == self.scale => {
                Ok(Int256::from(i128::from(*v)))
            }
            Value::Decimal128 { value: v, scale } if *scale == self.scale => {
                Ok(Int256::from(*v))
            }
            Value::Decimal256 { value: v, scale } if *scale == self.scale => Ok(*v),
            Value::Float32(_) | Value::Float64(_) => {
                let v = match value {
                    Value::Float32(f) => f64::from(*f),
                    Value::Float64(f) => *f,
                    _ => unreachable!(),
                };
                let scaled = v * 10f64.powi(i32::from(self.scale));
                if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
                    return Err(out_of_range(value, &self.spec_name()));
                }
                Ok(Int256::from(i128::from(scaled.round() as i64)))
            }
            other => match other.to_i128() {
                Some(v) => scaled_int(v),
                None => Err(wrong_kind(&self.spec_name(), value)),
            },
        }
    }

    /// Integral-digit count check against the declared precision.
    fn check_precision(&self, value: &Value, mantissa: Int256) -> Result<()> {
        let digits = mantissa.to_string();
        let digits = digits.strip_prefix('-').unwrap_or(&digits);
        if digits.len() > usize::from(self.precision) {
            return Err(Error::ColumnTypeMismatch(format!(
                "value {value} exceeds precision {} of {}",
                self.precision,
                self.spec_name()
            )));
        }
        Ok(())
    }

    fn narrow_mantissa(&self, value: &Value, mantissa: Int256) -> Result<i128> {
        // All widths below 256 bits fit an i128; the sign-extended upper
        // half must agree with the low 16 bytes.
        let bytes = mantissa.to_le_bytes();
        let low = i128::from_le_bytes(bytes[..16].try_into().expect("16 bytes"));
        let expected_upper = if low < 0 { [0xffu8; 16] } else { [0u8; 16] };
        if bytes[16..] != expected_upper {
            return Err(out_of_range(value, &self.spec_name()));
        }
        Ok(low)
    }
}

#[async_trait]
impl ColumnCodec for DecimalCodec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * self.width.bytes()).await?;
        let scale = self.scale;
        Ok(bytes
            .chunks_exact(self.width.bytes())
            .map(|chunk| match self.width {
                Width::W32 => Value::Decimal32 {
                    value: i32::from_le_bytes(chunk.try_into().expect("4 bytes")),
                    scale,
                },
                Width::W64 => Value::Decimal64 {
                    value: i64::from_le_bytes(chunk.try_into().expect("8 bytes")),
                    scale,
                },
                Width::W128 => Value::Decimal128 {
                    value: i128::from_le_bytes(chunk.try_into().expect("16 bytes")),
                    scale,
                },
                Width::W256 => Value::Decimal256 {
                    value: Int256::from_le_bytes(chunk.try_into().expect("32 bytes")),
                    scale,
                },
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * self.width.bytes());
        for value in values {
            let mantissa = self.mantissa_of(value)?;
            if self.types_check {
                self.check_precision(value, mantissa)?;
            }
            match self.width {
                Width::W32 => {
                    let v = i32::try_from(self.narrow_mantissa(value, mantissa)?)
                        .map_err(|_| out_of_range(value, &self.spec_name()))?;
                    out.extend_from_slice(&v.to_le_bytes());
                }
                Width::W64 => {
                    let v = i64::try_from(self.narrow_mantissa(value, mantissa)?)
                        .map_err(|_| out_of_range(value, &self.spec_name()))?;
                    out.extend_from_slice(&v.to_le_bytes());
                }
                Width::W128 => {
                    let v = self.narrow_mantissa(value, mantissa)?;
                    out.extend_from_slice(&v.to_le_bytes());
                }
                Width::W256 => out.extend_from_slice(&mantissa.to_le_bytes()),
            }
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        match self.width {
            Width::W32 => Value::Decimal32 { value: 0, scale: self.scale },
            Width::W64 => Value::Decimal64 { value: 0, scale: self.scale },
            Width::W128 => Value::Decimal128 { value: 0, scale: self.scale },
            Width::W256 => Value::Decimal256 { value: Int256::ZERO, scale: self.scale },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::column::testutil::{assert_roundtrip, roundtrip, roundtrip_opts};
    use crate::column::{codec_for_spec, CodecOptions};
    use crate::error::Error;
    use crate::io::write::VecWriter;
    use crate::value::{Int256, Value};

    #[tokio::test]
    async fn each_width_roundtrips() {
        assert_roundtrip("Decimal(9, 2)", &[Value::Decimal32 { value: -12345, scale: 2 }]).await;
        assert_roundtrip("Decimal(18, 4)", &[Value::Decimal64 {
            value: 123_456_789_012,
            scale: 4,
        }])
        .await;
        assert_roundtrip("Decimal(38, 10)", &[Value::Decimal128 { value: i128::MIN, scale: 10 }])
            .await;
        assert_roundtrip("Decimal(76, 0)", &[Value::Decimal256 {
            value: Int256::MAX,
            scale: 0,
        }])
        .await;
    }

    #[tokio::test]
    async fn integers_scale_up_on_write() {
        let read = roundtrip("Decimal(9, 2)", &[Value::Int32(7)]).await;
        assert_eq!(read, vec![Value::Decimal32 { value: 700, scale: 2 }]);
    }

    #[tokio::test]
    async fn floats_round_to_mantissa() {
        let read = roundtrip("Decimal(9, 2)", &[Value::Float64(1.25)]).await;
        assert_eq!(read, vec![Value::Decimal32 { value: 125, scale: 2 }]);
    }

    #[tokio::test]
    async fn precision_boundary_under_types_check() {
        let opts = CodecOptions { types_check: true, ..Default::default() };
        // Nine digits exactly: fine.
        let read =
            roundtrip_opts("Decimal(9, 0)", &[Value::Decimal32 { value: 999_999_999, scale: 0 }], &opts)
                .await;
        assert_eq!(read, vec![Value::Decimal32 { value: 999_999_999, scale: 0 }]);

        // One more digit: rejected before packing.
        let codec = codec_for_spec("Decimal(9, 0)", &opts).unwrap();
        let mut out = VecWriter::new();
        let err = codec
            .write_data(&mut out, &[Value::Int64(1_000_000_000)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ColumnTypeMismatch(_)), "got {err}");
    }

    #[tokio::test]
    async fn scale_mismatch_is_a_column_mismatch() {
        let codec = codec_for_spec("Decimal(9, 2)", &CodecOptions::default()).unwrap();
        let mut out = VecWriter::new();
        let err = codec
            .write_data(&mut out, &[Value::Decimal32 { value: 1, scale: 3 }])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ColumnTypeMismatch(_)), "got {err}");
    }
}
