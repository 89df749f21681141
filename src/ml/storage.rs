//! Model Checkpoints
//!
//! A checkpoint is one bincode file holding the model dimensions, the fitted
//! scaler and three named parameter blobs (`encoder`, `decoder1`,
//! `decoder2`). Saving writes a temporary sibling and renames it over the
//! target. Loading decodes and validates everything before the in-memory
//! model is touched.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::usad::{Decoder, Encoder, ModelDims, UsadModel};
use crate::data::MinMaxScaler;
use crate::error::{Result, UsadError};

/// Leading tag of every checkpoint file
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"USAD";

/// Version of the checkpoint layout
pub const CHECKPOINT_VERSION: u32 = 1;

type BlobRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Serialised model plus everything needed to score new data with it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub magic: [u8; 4],
    pub version: u32,
    pub dims: ModelDims,
    /// Epochs the model was trained for; fixes the scoring blend weights
    pub epochs: usize,
    pub saved_at: DateTime<Utc>,
    pub scaler: MinMaxScaler,
    encoder: Vec<u8>,
    decoder1: Vec<u8>,
    decoder2: Vec<u8>,
}

fn encode_module<B: Backend, M: Module<B>>(module: &M) -> Result<Vec<u8>> {
    let recorder = BlobRecorder::default();
    <BlobRecorder as Recorder<B>>::record(&recorder, module.clone().into_record(), ())
        .map_err(|e| UsadError::Checkpoint(format!("encoding parameters: {:?}", e)))
}

fn decode_record<B: Backend, M: Module<B>>(
    name: &str,
    bytes: &[u8],
    device: &B::Device,
) -> Result<M::Record> {
    let recorder = BlobRecorder::default();
    <BlobRecorder as Recorder<B>>::load(&recorder, bytes.to_vec(), device)
        .map_err(|e| UsadError::Checkpoint(format!("decoding {} parameters: {:?}", name, e)))
}

impl Checkpoint {
    /// Capture the parameters of `model`.
    pub fn capture<B: Backend>(
        model: &UsadModel<B>,
        dims: ModelDims,
        epochs: usize,
        scaler: MinMaxScaler,
    ) -> Result<Self> {
        if model.input_dim() != dims.w_size {
            return Err(UsadError::dimension_mismatch(
                format!("w_size={}", dims.w_size),
                format!("w_size={}", model.input_dim()),
            ));
        }
        Ok(Self {
            magic: CHECKPOINT_MAGIC,
            version: CHECKPOINT_VERSION,
            dims,
            epochs,
            saved_at: Utc::now(),
            scaler,
            encoder: encode_module::<B, _>(&model.encoder)?,
            decoder1: encode_module::<B, _>(&model.decoder1)?,
            decoder2: encode_module::<B, _>(&model.decoder2)?,
        })
    }

    /// Write atomically: a temporary sibling is written, flushed and renamed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| UsadError::file(parent, e))?;
        }

        let tmp = temp_path(path);
        let result = (|| {
            let file = File::create(&tmp).map_err(|e| UsadError::file(&tmp, e))?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, self)
                .map_err(|e| UsadError::Checkpoint(format!("serializing checkpoint: {}", e)))?;
            writer.flush().map_err(|e| UsadError::file(&tmp, e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| UsadError::file(&tmp, e))?;
            fs::rename(&tmp, path).map_err(|e| UsadError::file(path, e))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        info!("Saved checkpoint ({}) to {}", self.dims, path.display());
        Ok(())
    }

    /// Read and validate the envelope. Parameter blobs are decoded later.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| UsadError::file(path, e))?;
        let reader = BufReader::new(file);
        let checkpoint: Self = bincode::deserialize_from(reader)
            .map_err(|e| UsadError::Checkpoint(format!("reading {}: {}", path.display(), e)))?;

        if checkpoint.magic != CHECKPOINT_MAGIC {
            return Err(UsadError::Checkpoint(format!(
                "{} is not a USAD checkpoint",
                path.display()
            )));
        }
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(UsadError::Checkpoint(format!(
                "unsupported checkpoint version {} (expected {})",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }

        debug!(
            "Read checkpoint saved at {} ({})",
            checkpoint.saved_at.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.dims
        );
        Ok(checkpoint)
    }

    /// Build a new model from the stored parameters.
    pub fn restore<B: Backend>(&self, device: &B::Device) -> Result<UsadModel<B>> {
        let mut model = UsadModel::new(&self.dims, device);
        self.load_into(&mut model, &self.dims, device)?;
        Ok(model)
    }

    /// Replace the parameters of `model`, whose dimensions are `dims`.
    ///
    /// All three blobs are decoded before any assignment, so on error `model`
    /// is left exactly as it was.
    pub fn load_into<B: Backend>(
        &self,
        model: &mut UsadModel<B>,
        dims: &ModelDims,
        device: &B::Device,
    ) -> Result<()> {
        self.dims.ensure_matches(dims)?;
        if model.input_dim() != dims.w_size {
            return Err(UsadError::dimension_mismatch(
                format!("w_size={}", dims.w_size),
                format!("w_size={}", model.input_dim()),
            ));
        }

        let encoder = decode_record::<B, Encoder<B>>("encoder", &self.encoder, device)?;
        let decoder1 = decode_record::<B, Decoder<B>>("decoder1", &self.decoder1, device)?;
        let decoder2 = decode_record::<B, Decoder<B>>("decoder2", &self.decoder2, device)?;

        let staged = UsadModel {
            encoder: model.encoder.clone().load_record(encoder),
            decoder1: model.decoder1.clone().load_record(decoder1),
            decoder2: model.decoder2.clone().load_record(decoder2),
        };
        *model = staged;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "checkpoint".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{SensorGenerator, SyntheticConfig};
    use crate::data::WindowSet;
    use crate::ml::usad::{score_windows, BlendWeights, InferenceBackend};
    use tempfile::TempDir;

    type B = InferenceBackend;

    fn fixture() -> (ModelDims, MinMaxScaler, WindowSet) {
        let config = SyntheticConfig {
            features: 3,
            normal_length: 40,
            ..Default::default()
        };
        let series = SensorGenerator::new(config).normal().unwrap();
        let scaler = MinMaxScaler::fitted(&series).unwrap();
        let windows = WindowSet::from_series(&scaler.transform(&series).unwrap(), 4).unwrap();
        (ModelDims::new(4, 3, 2).unwrap(), scaler, windows)
    }

    #[test]
    fn test_round_trip_reproduces_scores() {
        let (dims, scaler, windows) = fixture();
        let device = Default::default();
        let model = UsadModel::<B>::new(&dims, &device);
        let weights = BlendWeights::final_for(5);
        let expected = score_windows(&model, &windows, 8, weights, &device).unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.usad");
        Checkpoint::capture(&model, dims, 5, scaler.clone())
            .unwrap()
            .save(&path)
            .unwrap();
        assert!(!temp_path(&path).exists());

        let checkpoint = Checkpoint::read(&path).unwrap();
        assert_eq!(checkpoint.dims, dims);
        assert_eq!(checkpoint.epochs, 5);
        assert_eq!(checkpoint.scaler, scaler);

        let restored = checkpoint.restore::<B>(&device).unwrap();
        let actual = score_windows(&restored, &windows, 8, weights, &device).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_load_into_mismatched_dims_keeps_model() {
        let (dims, scaler, windows) = fixture();
        let device = Default::default();
        let saved = UsadModel::<B>::new(&dims, &device);
        let checkpoint = Checkpoint::capture(&saved, dims, 1, scaler).unwrap();

        let other_dims = ModelDims::new(4, 3, 3).unwrap();
        let mut other = UsadModel::<B>::new(&other_dims, &device);
        let other_windows = windows.clone();
        let weights = BlendWeights::final_for(1);
        let before = score_windows(&other, &other_windows, 8, weights, &device).unwrap();

        let err = checkpoint
            .load_into(&mut other, &other_dims, &device)
            .unwrap_err();
        assert!(matches!(err, UsadError::DimensionMismatch { .. }));

        let after = score_windows(&other, &other_windows, 8, weights, &device).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_load_into_corrupt_decoder2_keeps_model() {
        let (dims, scaler, windows) = fixture();
        let device = Default::default();
        let saved = UsadModel::<B>::new(&dims, &device);
        let mut checkpoint = Checkpoint::capture(&saved, dims, 1, scaler).unwrap();
        let keep = checkpoint.decoder2.len() / 2;
        checkpoint.decoder2.truncate(keep);

        let mut model = UsadModel::<B>::new(&dims, &device);
        let weights = BlendWeights::final_for(1);
        let before = score_windows(&model, &windows, 8, weights, &device).unwrap();

        let err = checkpoint.load_into(&mut model, &dims, &device).unwrap_err();
        match err {
            UsadError::Checkpoint(reason) => assert!(reason.contains("decoder2"), "{}", reason),
            other => panic!("unexpected error: {}", other),
        }

        let after = score_windows(&model, &windows, 8, weights, &device).unwrap();
        assert_eq!(before, after);
        assert!(checkpoint.restore::<B>(&device).is_err());
    }

    #[test]
    fn test_load_into_replaces_parameters() {
        let (dims, scaler, windows) = fixture();
        let device = Default::default();
        let saved = UsadModel::<B>::new(&dims, &device);
        let checkpoint = Checkpoint::capture(&saved, dims, 2, scaler).unwrap();
        let weights = BlendWeights::final_for(2);
        let expected = score_windows(&saved, &windows, 8, weights, &device).unwrap();

        let mut fresh = UsadModel::<B>::new(&dims, &device);
        checkpoint.load_into(&mut fresh, &dims, &device).unwrap();
        let actual = score_windows(&fresh, &windows, 8, weights, &device).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.usad");
        fs::write(&path, b"not a checkpoint at all").unwrap();
        assert!(matches!(
            Checkpoint::read(&path).unwrap_err(),
            UsadError::Checkpoint(_)
        ));
    }

    #[test]
    fn test_read_missing_file() {
        let err = Checkpoint::read(Path::new("/nonexistent/model.usad")).unwrap_err();
        assert!(matches!(err, UsadError::File { .. }));
    }
}
