use std::{path::Path, sync::Arc};

use ndarray::prelude::*;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::{builder::SessionBuilder, Session};
use ort::value::TensorRef;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    config::{Device, InputSize},
    errors::{MedSegError, Result},
    segmenter::{HeuristicParams, ThresholdSegmenter},
    traits::Segmenter,
};

/// 2D U-Net exported to ONNX.
///
/// Expects a single-channel `(1, 1, H, W)` float input and produces
/// `(1, C, H, W)` class logits. The class per pixel is the arg-max over `C`.
pub struct OnnxSegmenter {
    pub input_size: InputSize,
    device: Device,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxSegmenter {
    pub fn new(model_path: &Path, device: Device, input_size: InputSize) -> Result<Self> {
        let mut session = SessionBuilder::new()
            .map_err(|e| MedSegError::model("session builder init", e))?
            .with_execution_providers(execution_providers(device))
            .map_err(|e| MedSegError::model("execution provider setup", e))?
            .with_memory_pattern(true)
            .map_err(|e| MedSegError::model("memory pattern setup", e))?
            .commit_from_file(model_path)
            .map_err(|e| {
                MedSegError::model(format!("load model file {}", model_path.display()), e)
            })?;

        let input = session.inputs.first().ok_or_else(|| {
            MedSegError::model("read model inputs", "model declares no inputs")
        })?;
        let input_name = input.name.clone();
        // Static spatial dims in the graph win over the configured size.
        let input_size = input
            .input_type
            .tensor_shape()
            .filter(|shape| shape.len() == 4 && shape[2] > 0 && shape[3] > 0)
            .map(|shape| InputSize::new(shape[2] as u32, shape[3] as u32))
            .unwrap_or(input_size);
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| MedSegError::model("read model outputs", "model declares no outputs"))?;

        // warm up
        let data = Array4::<f32>::zeros((
            1,
            1,
            input_size.height as usize,
            input_size.width as usize,
        ));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)
                .map_err(|e| MedSegError::model("warm-up tensor", e))?])
            .map_err(|e| MedSegError::model("warm-up run", e))?;

        info!(
            "Loaded segmentation model {} on {} (input {})",
            model_path.display(),
            device,
            input_size
        );
        Ok(Self {
            input_size,
            device,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }

    /// Raw logits for a `(N, 1, H, W)` batch.
    pub fn logits(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

impl Segmenter for OnnxSegmenter {
    fn predict(&self, image: ArrayView2<f32>) -> Result<Array2<u32>> {
        let tensor = image.insert_axis(Axis(0)).insert_axis(Axis(0));
        let logits = self.logits(tensor)?;
        Ok(argmax_classes(logits.index_axis(Axis(0), 0)))
    }

    fn name(&self) -> &str {
        "onnx-unet"
    }

    fn device(&self) -> String {
        self.device.to_string()
    }

    fn input_size(&self) -> Option<InputSize> {
        Some(self.input_size)
    }
}

fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Cpu => vec![CPUExecutionProvider::default().build()],
        Device::Cuda(device_id) => vec![
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        ],
    }
}

/// Index of the largest logit along the class axis of a `(C, H, W)` array.
pub fn argmax_classes(logits: ArrayView3<f32>) -> Array2<u32> {
    logits.map_axis(Axis(0), |scores| {
        scores
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| {
                if v > best.1 {
                    (i, v)
                } else {
                    best
                }
            })
            .0 as u32
    })
}

/// Builds the segmenter for the configured weights.
///
/// A missing or unloadable weights file is not fatal: the failure is logged and
/// the threshold heuristic is returned instead.
pub fn load_segmenter(
    weights_path: Option<&Path>,
    device: Device,
    input_size: InputSize,
    heuristic: HeuristicParams,
) -> Arc<dyn Segmenter> {
    let fallback = || -> Arc<dyn Segmenter> { Arc::new(ThresholdSegmenter::new(heuristic)) };

    let Some(path) = weights_path else {
        info!("No segmentation weights configured; using threshold heuristic");
        return fallback();
    };
    if !path.exists() {
        warn!(
            "Segmentation weights {} not found; using threshold heuristic",
            path.display()
        );
        return fallback();
    }

    match OnnxSegmenter::new(path, device, input_size) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            warn!(
                "Could not load weights from {}: {:#}; using threshold heuristic",
                path.display(),
                anyhow::Error::from(e)
            );
            fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_argmax_classes() {
        let logits = Array3::from_shape_vec(
            (3, 1, 3),
            vec![
                0.9, 0.1, 0.0, // class 0
                0.0, 0.8, 0.1, // class 1
                0.1, 0.1, 0.7, // class 2
            ],
        )
        .unwrap();
        assert_eq!(argmax_classes(logits.view()), array![[0, 1, 2]]);
    }

    #[test]
    fn test_argmax_ties_prefer_lowest_class() {
        let logits = Array3::<f32>::zeros((3, 2, 2));
        assert!(argmax_classes(logits.view()).iter().all(|&c| c == 0));
    }

    #[test]
    fn test_load_without_weights_uses_heuristic() {
        let segmenter = load_segmenter(
            None,
            Device::Cpu,
            InputSize::square(64),
            HeuristicParams::default(),
        );
        assert_eq!(segmenter.name(), "threshold-heuristic");
    }

    #[test]
    fn test_load_missing_weights_degrades() {
        let segmenter = load_segmenter(
            Some(Path::new("/nonexistent/unet.onnx")),
            Device::Cpu,
            InputSize::square(64),
            HeuristicParams::default(),
        );
        assert_eq!(segmenter.name(), "threshold-heuristic");
    }

    #[test]
    fn test_load_corrupt_weights_degrades() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not an onnx graph").unwrap();

        let segmenter = load_segmenter(
            Some(file.path()),
            Device::Cpu,
            InputSize::square(64),
            HeuristicParams::default(),
        );
        assert_eq!(segmenter.name(), "threshold-heuristic");
    }
}
