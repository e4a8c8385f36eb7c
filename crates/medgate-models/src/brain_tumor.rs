//! Brain tumor classifier over MRI images
//!
//! Weights live in a safetensors file and are loaded through a Candle
//! `VarBuilder`. Tensor names follow the layer prefixes of the configured
//! architecture (`hidden.*`, `classifier.*`).

use crate::config::{ImageArchitecture, ImageInputSpec, ImageModelConfig, Normalization};
use crate::model::{argmax, DetectableModel, ModelInput, NormalizedInput};
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Limits};
use medgate_core::{LoadError, ModelVariant, PredictionError, PredictionResult};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resampling filter used for every resize
const RESIZE_FILTER: FilterType = FilterType::Triangle;

enum Network {
    Linear {
        classifier: Linear,
    },
    Mlp {
        hidden: Linear,
        classifier: Linear,
    },
}

impl Network {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Linear { classifier } => classifier.forward(x),
            Self::Mlp { hidden, classifier } => {
                let h = hidden.forward(x)?.relu()?;
                classifier.forward(&h)
            }
        }
    }
}

struct LoadedNetwork {
    device: Device,
    network: Network,
}

/// Multi-class MRI classifier.
///
/// The predicted class is the label; when it is one of the configured subtype
/// classes it is also reported as the subtype.
pub struct BrainTumorModel {
    name: String,
    artifact_path: PathBuf,
    input: ImageInputSpec,
    classes: Vec<String>,
    subtype_classes: Vec<String>,
    architecture: ImageArchitecture,
    normalization: Option<Normalization>,
    device_name: String,
    max_dimension: u32,
    loaded: Option<LoadedNetwork>,
}

impl BrainTumorModel {
    pub fn new(config: &ImageModelConfig, max_dimension: u32) -> Self {
        Self {
            name: config.name.clone(),
            artifact_path: config.artifact.clone(),
            input: config.input,
            classes: config.classes.clone(),
            subtype_classes: config.subtype_classes.clone(),
            architecture: config.architecture,
            normalization: config.normalization.clone(),
            device_name: config.device.clone(),
            max_dimension,
            loaded: None,
        }
    }

    pub fn input_spec(&self) -> ImageInputSpec {
        self.input
    }

    fn loaded(&self) -> Result<&LoadedNetwork, PredictionError> {
        self.loaded
            .as_ref()
            .ok_or_else(|| PredictionError::NotLoaded(self.name.clone()))
    }

    fn build_network(&self, vb: VarBuilder) -> candle_core::Result<Network> {
        let in_dim = self.input.len();
        let num_classes = self.classes.len();

        match self.architecture {
            ImageArchitecture::Linear => Ok(Network::Linear {
                classifier: candle_nn::linear(in_dim, num_classes, vb.pp("classifier"))?,
            }),
            ImageArchitecture::Mlp { hidden } => Ok(Network::Mlp {
                hidden: candle_nn::linear(in_dim, hidden, vb.pp("hidden"))?,
                classifier: candle_nn::linear(hidden, num_classes, vb.pp("classifier"))?,
            }),
        }
    }

    /// Geometry that `to_chw` can lay out
    fn check_input(&self) -> Result<(), String> {
        let channels = self.input.channels as usize;
        if channels != 1 && channels != 3 {
            return Err(format!("input needs 1 or 3 channels, got {}", channels));
        }
        if self.input.is_empty() {
            return Err("input dimensions must be positive".to_string());
        }
        if let Some(norm) = &self.normalization {
            if norm.mean.len() != channels || norm.std.len() != channels {
                return Err(format!(
                    "normalization has {} mean and {} std values for {} channels",
                    norm.mean.len(),
                    norm.std.len(),
                    channels
                ));
            }
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, PredictionError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| PredictionError::Decode(e.to_string()))?;

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        reader.limits(limits);

        reader
            .decode()
            .map_err(|e| PredictionError::Decode(e.to_string()))
    }

    /// Resize to the artifact resolution and lay pixels out as CHW in [0, 1],
    /// then apply the configured normalization.
    fn to_chw(&self, image: &DynamicImage) -> Vec<f32> {
        let (w, h) = (self.input.width, self.input.height);
        let plane = w as usize * h as usize;
        let channels = self.input.channels as usize;
        let mut data = vec![0f32; plane * channels];

        if channels == 1 {
            let resized = image::imageops::resize(&image.to_luma8(), w, h, RESIZE_FILTER);
            for (i, px) in resized.pixels().enumerate() {
                data[i] = px.0[0] as f32 / 255.0;
            }
        } else {
            let resized = image::imageops::resize(&image.to_rgb8(), w, h, RESIZE_FILTER);
            for (i, px) in resized.pixels().enumerate() {
                for c in 0..3 {
                    data[c * plane + i] = px.0[c] as f32 / 255.0;
                }
            }
        }

        if let Some(norm) = &self.normalization {
            for c in 0..channels {
                let (mean, std) = (norm.mean[c], norm.std[c]);
                for v in &mut data[c * plane..(c + 1) * plane] {
                    *v = (*v - mean) / std;
                }
            }
        }

        data
    }
}

fn get_device(device_str: &str) -> Result<Device, LoadError> {
    match device_str.to_lowercase().as_str() {
        "cuda" | "cuda:0" => Device::new_cuda(0)
            .map_err(|e| LoadError::Failed(format!("Failed to initialize CUDA: {}", e))),
        "mps" | "metal" => Device::new_metal(0)
            .map_err(|e| LoadError::Failed(format!("Failed to initialize Metal: {}", e))),
        _ => Ok(Device::Cpu),
    }
}

impl DetectableModel for BrainTumorModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn variant(&self) -> ModelVariant {
        ModelVariant::Image
    }

    fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn load(&mut self) -> Result<(), LoadError> {
        if self.loaded.is_some() {
            return Ok(());
        }

        let path = &self.artifact_path;
        if !path.exists() {
            return Err(LoadError::Missing { path: path.clone() });
        }
        if self.classes.is_empty() {
            return Err(LoadError::Failed("image model has no output classes".to_string()));
        }
        self.check_input()
            .map_err(|reason| LoadError::incompatible(path, reason))?;

        let device = get_device(&self.device_name)?;

        let tensors = candle_core::safetensors::load(path, &device)
            .map_err(|e| LoadError::corrupt(path, e))?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);

        let network = self
            .build_network(vb)
            .map_err(|e| LoadError::incompatible(path, e))?;

        info!(
            model = %self.name,
            classes = self.classes.len(),
            "Loaded image classifier ({}x{}x{}) from {}",
            self.input.channels,
            self.input.height,
            self.input.width,
            path.display()
        );

        self.loaded = Some(LoadedNetwork { device, network });
        Ok(())
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn preprocess(&self, input: ModelInput<'_>) -> Result<NormalizedInput, PredictionError> {
        let loaded = self.loaded()?;
        let ModelInput::Image(bytes) = input else {
            return Err(PredictionError::InputMismatch {
                model: self.name.clone(),
                expected: "image",
            });
        };

        let image = self.decode(bytes)?;
        debug!(
            model = %self.name,
            width = image.width(),
            height = image.height(),
            "decoded image"
        );

        let data = self.to_chw(&image);
        let shape = (
            self.input.channels as usize,
            self.input.height as usize,
            self.input.width as usize,
        );
        let tensor =
            Tensor::from_vec(data, shape, &loaded.device).map_err(PredictionError::numeric)?;

        Ok(NormalizedInput::Pixels(tensor))
    }

    fn predict(&self, input: NormalizedInput) -> Result<PredictionResult, PredictionError> {
        let loaded = self.loaded()?;
        let NormalizedInput::Pixels(pixels) = input else {
            return Err(PredictionError::InputMismatch {
                model: self.name.clone(),
                expected: "a pixel tensor",
            });
        };

        let expected = [
            self.input.channels as usize,
            self.input.height as usize,
            self.input.width as usize,
        ];
        if pixels.dims() != expected {
            return Err(PredictionError::ShapeMismatch {
                expected: format!("{:?}", expected),
                actual: format!("{:?}", pixels.dims()),
            });
        }

        let batch = pixels
            .flatten_all()
            .and_then(|t| t.unsqueeze(0))
            .and_then(|t| t.to_dtype(DType::F32))
            .map_err(PredictionError::numeric)?;

        let logits = loaded
            .network
            .forward(&batch)
            .map_err(PredictionError::numeric)?;

        let probs: Vec<f32> = candle_nn::ops::softmax(&logits, D::Minus1)
            .and_then(|p| p.squeeze(0))
            .and_then(|p| p.to_vec1())
            .map_err(PredictionError::numeric)?;

        if probs.len() != self.classes.len() {
            return Err(PredictionError::ShapeMismatch {
                expected: format!("{} class scores", self.classes.len()),
                actual: format!("{} class scores", probs.len()),
            });
        }
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(PredictionError::numeric("softmax produced non-finite scores"));
        }

        let (idx, confidence) = argmax(&probs)
            .ok_or_else(|| PredictionError::numeric("empty score vector"))?;
        let label = self.classes[idx].clone();

        debug!(model = %self.name, label = %label, confidence, "image inference");

        let mut result = PredictionResult::new(label.clone(), confidence).with_raw_scores(probs);
        if self.subtype_classes.contains(&label) {
            result = result.with_subtype(label);
        }
        Ok(result)
    }
}
