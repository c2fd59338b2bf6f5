//! Conversions between opaque blobs and burn values.
//!
//! The substrate itself never looks inside tensors or weights. Learners and
//! policies built on burn use these helpers at the edges:
//!
//! - batch tensors → `Tensor<B, D>` for the training step
//! - module → weight blob (`BinBytesRecorder`) for [`WeightChannel`] publication
//! - weight blob → module on the actor side
//!
//! [`WeightChannel`]: crate::core::weights::WeightChannel

use super::tensor::{DType, TensorBlob, TensorError};
use burn::module::Module;
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::TensorData;

fn check_rank<const D: usize>(blob: &TensorBlob) -> Result<(), TensorError> {
    if blob.shape().len() != D {
        return Err(TensorError::Rank {
            expected: D,
            actual: blob.shape().len(),
        });
    }
    Ok(())
}

/// Element values widened to f32, whatever the stored dtype.
pub fn to_f32_values(blob: &TensorBlob) -> Result<Vec<f32>, TensorError> {
    Ok(match blob.dtype() {
        DType::F32 => blob.to_vec::<f32>()?,
        DType::F64 => blob.to_vec::<f64>()?.into_iter().map(|v| v as f32).collect(),
        DType::I32 => blob.to_vec::<i32>()?.into_iter().map(|v| v as f32).collect(),
        DType::I64 => blob.to_vec::<i64>()?.into_iter().map(|v| v as f32).collect(),
        DType::U8 => blob.to_vec::<u8>()?.into_iter().map(f32::from).collect(),
        DType::Bool => blob
            .to_bools()?
            .into_iter()
            .map(|b| if b { 1.0 } else { 0.0 })
            .collect(),
    })
}

/// Float tensor with the blob's shape. Integer, byte and bool blobs are cast.
pub fn to_float_tensor<B: Backend, const D: usize>(
    blob: &TensorBlob,
    device: &B::Device,
) -> Result<Tensor<B, D>, TensorError> {
    check_rank::<D>(blob)?;
    let data = TensorData::new(to_f32_values(blob)?, blob.shape().to_vec());
    Ok(Tensor::from_data(data, device))
}

/// Int tensor from an `I64` or `I32` blob.
pub fn to_int_tensor<B: Backend, const D: usize>(
    blob: &TensorBlob,
    device: &B::Device,
) -> Result<Tensor<B, D, Int>, TensorError> {
    check_rank::<D>(blob)?;
    let values: Vec<i64> = match blob.dtype() {
        DType::I64 => blob.to_vec::<i64>()?,
        DType::I32 => blob.to_vec::<i32>()?.into_iter().map(i64::from).collect(),
        other => {
            return Err(TensorError::DTypeMismatch {
                expected: DType::I64,
                actual: other,
            })
        }
    };
    let data = TensorData::new(values, blob.shape().to_vec());
    Ok(Tensor::from_data(data, device))
}

/// Read a float tensor back into an `F32` blob.
pub fn from_float_tensor<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<TensorBlob, TensorError> {
    let shape = tensor.dims().to_vec();
    let values = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| TensorError::Conversion(format!("{:?}", e)))?;
    TensorBlob::from_slice(&values, shape)
}

/// Serialize a module's parameters into a weight blob.
pub fn encode_module<B: Backend, M: Module<B>>(module: &M) -> Result<Vec<u8>, TensorError> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(module.clone().into_record(), ())
        .map_err(|e| TensorError::Conversion(e.to_string()))
}

/// Load a weight blob into `module`, returning the updated module.
///
/// On failure the caller keeps its original module untouched.
pub fn decode_into<B: Backend, M: Module<B>>(
    module: M,
    blob: &[u8],
    device: &B::Device,
) -> Result<M, TensorError> {
    let record = BinBytesRecorder::<FullPrecisionSettings>::default()
        .load(blob.to_vec(), device)
        .map_err(|e| TensorError::Conversion(e.to_string()))?;
    Ok(module.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{Linear, LinearConfig};

    type B = NdArray;

    #[test]
    fn test_float_tensor_keeps_shape_and_values() {
        let device = Default::default();
        let blob = TensorBlob::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let tensor = to_float_tensor::<B, 2>(&blob, &device).unwrap();
        assert_eq!(tensor.dims(), [2, 3]);

        let back = from_float_tensor(tensor).unwrap();
        assert_eq!(back, blob);
    }

    #[test]
    fn test_bytes_are_cast_to_float() {
        let device = Default::default();
        let blob = TensorBlob::from_slice(&[0u8, 128, 255], vec![3]).unwrap();
        let tensor = to_float_tensor::<B, 1>(&blob, &device).unwrap();
        let values = tensor.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 128.0, 255.0]);
    }

    #[test]
    fn test_rank_is_checked() {
        let device = Default::default();
        let blob = TensorBlob::zeros(vec![2, 3], DType::F32);
        assert_eq!(
            to_float_tensor::<B, 3>(&blob, &device).unwrap_err(),
            TensorError::Rank { expected: 3, actual: 2 }
        );
    }

    #[test]
    fn test_int_tensor_rejects_float() {
        let device = Default::default();
        let blob = TensorBlob::zeros(vec![4], DType::F32);
        assert!(matches!(
            to_int_tensor::<B, 1>(&blob, &device),
            Err(TensorError::DTypeMismatch { .. })
        ));

        let actions = TensorBlob::from_slice(&[3i64, 1], vec![2]).unwrap();
        let tensor = to_int_tensor::<B, 1>(&actions, &device).unwrap();
        assert_eq!(tensor.dims(), [2]);
    }

    #[test]
    fn test_module_round_trip_through_blob() {
        let device = Default::default();
        let source: Linear<B> = LinearConfig::new(4, 2).init(&device);
        let target: Linear<B> = LinearConfig::new(4, 2).init(&device);

        let blob = encode_module(&source).unwrap();
        let loaded = decode_into(target, &blob, &device).unwrap();

        let input = Tensor::<B, 2>::ones([1, 4], &device);
        let expected = source.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = loaded.forward(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let device = Default::default();
        let target: Linear<B> = LinearConfig::new(4, 2).init(&device);
        assert!(matches!(
            decode_into(target, &[1, 2, 3], &device),
            Err(TensorError::Conversion(_))
        ));
    }
}
