use crate::config::InputSize;
use crate::errors::{MedSegError, Result};
use crate::traits::Segmenter;
use ndarray::prelude::*;

/// Stub segmenter for tests and dry runs.
#[derive(Debug, Clone)]
pub struct StubSegmenter {
    class: u32,
    fail: bool,
    input_size: Option<InputSize>,
}

impl StubSegmenter {
    /// Labels every pixel with `class`.
    pub const fn constant(class: u32) -> Self {
        Self {
            class,
            fail: false,
            input_size: None,
        }
    }

    /// Fails every prediction with a model error.
    pub const fn failing() -> Self {
        Self {
            class: 0,
            fail: true,
            input_size: None,
        }
    }

    /// Requires inputs of exactly `size`, like a model with a static graph.
    pub fn with_input_size(mut self, size: InputSize) -> Self {
        self.input_size = Some(size);
        self
    }
}

impl Segmenter for StubSegmenter {
    fn predict(&self, image: ArrayView2<f32>) -> Result<Array2<u32>> {
        if self.fail {
            return Err(MedSegError::model("stub inference", "stub segmenter failure"));
        }
        if let Some(size) = self.input_size {
            let expected = (size.height as usize, size.width as usize);
            if image.dim() != expected {
                return Err(MedSegError::model(
                    "stub inference",
                    format!("expected {} input, got {:?}", size, image.dim()),
                ));
            }
        }
        Ok(Array2::from_elem(image.raw_dim(), self.class))
    }

    fn name(&self) -> &str {
        "stub"
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }

    fn input_size(&self) -> Option<InputSize> {
        self.input_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_stub_predict() -> Result<()> {
        let stub = StubSegmenter::constant(2);
        let mask = stub.predict(Array2::<f32>::zeros((4, 6)).view())?;
        assert_eq!(mask.dim(), (4, 6));
        assert!(mask.iter().all(|&c| c == 2));
        Ok(())
    }

    #[test]
    fn test_fixed_size_stub_rejects_other_sizes() {
        let stub = StubSegmenter::constant(0).with_input_size(InputSize::new(4, 6));
        assert!(stub.predict(Array2::<f32>::zeros((4, 6)).view()).is_ok());
        assert!(stub.predict(Array2::<f32>::zeros((6, 4)).view()).is_err());
    }

    #[test]
    fn test_failing_stub() {
        let stub = StubSegmenter::failing();
        let err = stub.predict(Array2::<f32>::zeros((2, 2)).view()).unwrap_err();
        assert!(!err.is_validation());
    }
}
