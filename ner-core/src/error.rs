//! # Erros do NER
//!
//! Quase todas as falhas são de **carga de artefatos**: configuração, mapa de
//! labels, vocabulário ou pesos ausentes/malformados. Acontecem uma única vez,
//! na inicialização. Depois disso só o backend numérico pode falhar.
//!
//! Texto vazio não é erro aqui: o pipeline devolve zero entidades. A rejeição
//! com 400 é responsabilidade da camada HTTP.
//!
//! Tokens degenerados (comprimento zero) e labels sem prefixo `B-`/`I-` são
//! recuperados internamente e nunca viram erro.

use std::path::PathBuf;

use thiserror::Error;

/// Erros produzidos pelo núcleo de NER.
#[derive(Debug, Error)]
pub enum NerError {
    /// Arquivo de artefato ausente ou ilegível.
    #[error("artefato ilegível em {path}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Arquivo JSON de artefato com formato inválido.
    #[error("artefato malformado em {path}: {source}")]
    ArtifactFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Configuração inconsistente (dimensões zeradas, labels faltando...).
    #[error("configuração do modelo inválida: {0}")]
    InvalidConfig(String),

    /// Falha do backend numérico (pesos com shape incompatível, tensor ausente).
    #[error("erro de tensor: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Atalho para resultados do núcleo.
pub type NerResult<T> = Result<T, NerError>;
