//! # Artefatos do Modelo
//!
//! Um diretório de modelo contém:
//!
//! | arquivo             | conteúdo                                              |
//! |---------------------|-------------------------------------------------------|
//! | `config.json`       | `embedding_dim`, `hidden_dim`, `num_labels`           |
//! | `id2label.json`     | `{"0": "O", "1": "B-PER", ...}`                       |
//! | `vocab.json`        | palavras de treinamento como chaves (valores ignorados) |
//! | `model.safetensors` | pesos f32 com os nomes do `state_dict`                |
//!
//! Todos os erros aqui são erros de carga: acontecem uma vez, na subida do serviço.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::error::{NerError, NerResult};
use crate::model::ModelConfig;
use crate::tagger::LabelMap;
use crate::vocab::CharVocab;

pub const CONFIG_FILE: &str = "config.json";
pub const ID2LABEL_FILE: &str = "id2label.json";
pub const VOCAB_FILE: &str = "vocab.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Caminhos dos artefatos dentro de um diretório de modelo.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub config: PathBuf,
    pub id2label: PathBuf,
    pub vocab: PathBuf,
    pub weights: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            config: dir.join(CONFIG_FILE),
            id2label: dir.join(ID2LABEL_FILE),
            vocab: dir.join(VOCAB_FILE),
            weights: dir.join(WEIGHTS_FILE),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> NerResult<T> {
    let content = fs::read_to_string(path).map_err(|source| NerError::ArtifactIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| NerError::ArtifactFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Lê `config.json`. Chaves extras (ex: hiperparâmetros de treino) são ignoradas.
pub fn load_config(path: &Path) -> NerResult<ModelConfig> {
    let config: ModelConfig = read_json(path)?;
    config.validate()?;
    Ok(config)
}

pub fn load_labels(path: &Path) -> NerResult<LabelMap> {
    let raw: HashMap<String, String> = read_json(path)?;
    LabelMap::from_id2label(raw)
}

/// Lê `vocab.json` e deriva o vocabulário de caracteres das chaves.
pub fn load_vocab(path: &Path) -> NerResult<CharVocab> {
    let words: serde_json::Map<String, serde_json::Value> = read_json(path)?;
    Ok(CharVocab::build(words.keys()))
}

/// Garante que o arquivo de pesos existe antes de mapeá-lo em memória.
pub fn check_weights(path: &Path) -> NerResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(NerError::ArtifactIo {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "arquivo de pesos não encontrado",
            ),
        })
    }
}
