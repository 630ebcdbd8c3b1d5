//! # khmer-ner-core — Reconhecimento de Entidades Nomeadas em Khmer
//!
//! Este crate implementa a inferência de um modelo NER neural pré-treinado para
//! textos em khmer. O modelo lê cada palavra caractere a caractere, então não
//! depende de um vocabulário de palavras nem de segmentação sofisticada.
//!
//! ## Arquitetura do Sistema
//!
//! O sistema segue uma arquitetura de pipeline linear:
//!
//! 1.  **Normalização** ([`tokenizer::normalize_text`]): NFC + remoção de ZWSP/BOM.
//! 2.  **Tokenização** ([`tokenizer`]): tokens separados por espaço, com offsets de caractere.
//! 3.  **Codificação de Caracteres** ([`vocab`]): cada token vira ids de largura fixa + comprimento real.
//! 4.  **Rede Neural** ([`model`]):
//!     *   **CharEncoder**: embedding + GRU por palavra ([`gru`]).
//!     *   **ContextEncoder**: GRU bidirecional sobre a sentença.
//!     *   **BioHead**: linear + softmax sobre as labels BIO.
//! 5.  **Decodificação** ([`tagger`]): máquina de estados BIO → lista de [`EntitySpan`].
//!
//! ## Exemplo de Uso
//!
//! ```rust,no_run
//! use khmer_ner_core::NerPipeline;
//!
//! // 1. Carrega config.json, id2label.json, vocab.json e model.safetensors
//! let pipeline = NerPipeline::load("artifacts")?;
//!
//! // 2. Executa a análise
//! let analysis = pipeline.analyze("ចន ធី រស់ នៅ ភ្នំពេញ")?;
//!
//! // 3. Exibe as entidades encontradas
//! for entity in analysis.entities {
//!     println!("Entidade: {} ({}) - Score: {:.2}", entity.text, entity.label, entity.score);
//! }
//! # Ok::<(), khmer_ner_core::NerError>(())
//! ```
//!
//! ## Módulos Principais
//!
//! - [`pipeline`]: Orquestrador principal que conecta todos os estágios.
//! - [`artifacts`]: Leitura dos arquivos do modelo.
//! - [`error`]: Taxonomia de erros.

pub mod artifacts;
pub mod error;
pub mod gru;
pub mod model;
pub mod pipeline;
pub mod tagger;
pub mod tokenizer;
pub mod vocab;

pub use error::{NerError, NerResult};
pub use model::{ModelConfig, NerModel};
pub use pipeline::{Analysis, NerPipeline, PipelineEvent};
pub use tagger::{EntitySpan, LabelMap, Tag, TaggedToken};
pub use tokenizer::Token;
pub use vocab::{CharVocab, EncodedWord, MAX_WORD_LEN};
