//! Persistence of trained weights.
//!
//! Weights are stored as safetensors, one file per cell variant, named after the variant. The
//! file holds the parameters only. Loading requires a model of the same shape, i.e. created with
//! the same hidden dimension and the vocabulary of the same corpus.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    cell::CellVariant,
    error::{Error, Result},
    model::Model,
};

/// Directory holding `<variant>.safetensors` files
#[derive(Debug, Clone)]
pub struct WeightStore {
    dir: PathBuf,
}

impl WeightStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, variant: CellVariant) -> PathBuf {
        self.dir.join(format!("{variant}.safetensors"))
    }

    /// Overwrites the parameters of `model` with the weights stored for its cell variant. Missing,
    /// corrupt or mismatching files are an error. The model keeps whatever parameters it had in
    /// that case, and must not be used as if it had been loaded.
    pub fn load(&self, model: &mut Model) -> Result<()> {
        let path = self.path(model.variant());
        model
            .var_map_mut()
            .load(&path)
            .map_err(|source| persistence(&path, source))?;
        info!(path = %path.display(), "Loaded weights");
        Ok(())
    }

    pub fn save(&self, model: &Model) -> Result<()> {
        let path = self.path(model.variant());
        model
            .var_map()
            .save(&path)
            .map_err(|source| persistence(&path, source))?;
        info!(path = %path.display(), "Saved weights");
        Ok(())
    }
}

fn persistence(path: &Path, source: candle_core::Error) -> Error {
    Error::Persistence {
        path: path.to_owned(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use candle_nn::ModuleT;

    use crate::{
        cell::CellVariant,
        config::ModelConfig,
        device::choose_device,
        error::Error,
        model::Model,
        tokenizer::one_hot,
    };

    use super::WeightStore;

    fn model(cell: CellVariant, hidden_dim: usize) -> Model {
        let config = ModelConfig {
            hidden_dim,
            cell,
            dropout: None,
        };
        Model::new(choose_device(true), 5, &config).unwrap()
    }

    #[test]
    fn file_is_named_after_cell_variant() {
        let store = WeightStore::new("weights");

        assert_eq!(
            std::path::Path::new("weights/lstm.safetensors"),
            store.path(CellVariant::Lstm)
        );
    }

    #[test]
    fn loaded_model_predicts_like_saved_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let saved = model(CellVariant::Gru, 6);
        let mut loaded = model(CellVariant::Gru, 6);
        let xs = one_hot(&[0, 4, 2, 1], 5, &choose_device(true))
            .unwrap()
            .unsqueeze(0)
            .unwrap();

        store.save(&saved).unwrap();
        store.load(&mut loaded).unwrap();

        let expected = saved.forward_t(&xs, false).unwrap().to_vec3::<f32>().unwrap();
        let actual = loaded.forward_t(&xs, false).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        let mut model = model(CellVariant::Rnn, 4);

        let result = store.load(&mut model);

        assert!(matches!(result, Err(Error::Persistence { .. })));
    }

    #[test]
    fn mismatching_shape_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = WeightStore::new(dir.path());
        store.save(&model(CellVariant::Lstm, 4)).unwrap();
        let mut wider = model(CellVariant::Lstm, 8);

        let result = store.load(&mut wider);

        assert!(matches!(result, Err(Error::Persistence { .. })));
    }
}
