//! # Pipeline NER — Orquestrador com Eventos Observáveis
//!
//! O pipeline coordena normalização, tokenização, codificação de caracteres,
//! a rede neural e a decodificação BIO. Cada etapa pode emitir um evento via
//! canal (`mpsc`), permitindo que o servidor WebSocket transmita o progresso
//! para o cliente.
//!
//! ```text
//! texto ─► normalize_text ─► tokenize ─► encode_word (por token)
//!       ─► NerModel (CharEncoder ─► ContextEncoder ─► BioHead)
//!       ─► Tag ─► decode_entities ─► Vec<EntitySpan>
//! ```
//!
//! O [`NerPipeline`] é imutável depois de construído: vocabulário, labels e
//! pesos são lidos uma vez e compartilhados (via `Arc`) por todas as requisições.

use std::path::Path;
use std::sync::mpsc;
use std::time::Instant;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::artifacts::{check_weights, load_config, load_labels, load_vocab, ArtifactPaths};
use crate::error::NerResult;
use crate::model::NerModel;
use crate::tagger::{decode_entities, EntitySpan, LabelMap, TaggedToken};
use crate::tokenizer::{normalize_text, tokenize, Token};
use crate::vocab::{CharVocab, EncodedWord, MAX_WORD_LEN};

/// Eventos emitidos pelo pipeline durante o processamento.
///
/// Permitem que a UI acompanhe cada etapa. A sequência é sempre
/// `Normalized`, `TokenizationDone`, `WordsEncoded`, `TagAssigned`×N e `Done`
/// (ou `Error`). Sem tokens, `WordsEncoded` e `TagAssigned` não aparecem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// **Passo 1a**: Texto normalizado (referencial dos offsets).
    Normalized { text: String },
    /// **Passo 1b**: Tokens extraídos do texto normalizado.
    TokenizationDone { tokens: Vec<Token>, total: usize },
    /// **Passo 2**: Comprimento real de cada palavra codificada.
    WordsEncoded { lengths: Vec<usize> },
    /// **Passo 3**: Tag atribuída a um token pela rede.
    TagAssigned {
        token_index: usize,
        token_text: String,
        tag: String,
        confidence: f64,
    },
    /// **Conclusão**: Entidades finais.
    Done {
        text: String,
        entities: Vec<EntitySpan>,
        tagged_tokens: Vec<TaggedToken>,
        total_tokens: usize,
        processing_ms: u64,
    },
    /// **Falha**: Erro do backend numérico.
    Error { message: String },
}

/// Resultado completo de uma análise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    /// Texto normalizado (referencial dos offsets).
    pub text: String,
    pub entities: Vec<EntitySpan>,
    pub tagged_tokens: Vec<TaggedToken>,
    pub processing_ms: u64,
}

/// O pipeline NER principal (contexto de inferência).
pub struct NerPipeline {
    vocab: CharVocab,
    labels: LabelMap,
    model: NerModel,
}

impl NerPipeline {
    /// Monta o pipeline a partir de componentes já carregados.
    pub fn new(vocab: CharVocab, labels: LabelMap, model: NerModel) -> Self {
        Self {
            vocab,
            labels,
            model,
        }
    }

    /// Carrega todos os artefatos de um diretório, no melhor dispositivo disponível.
    pub fn load(dir: impl AsRef<Path>) -> NerResult<Self> {
        let device = Device::cuda_if_available(0)?;
        Self::load_on(dir, &device)
    }

    /// Carrega todos os artefatos de um diretório no dispositivo indicado.
    pub fn load_on(dir: impl AsRef<Path>, device: &Device) -> NerResult<Self> {
        let paths = ArtifactPaths::in_dir(dir);
        let config = load_config(&paths.config)?;
        let labels = load_labels(&paths.id2label)?;
        let vocab = load_vocab(&paths.vocab)?;
        check_weights(&paths.weights)?;

        if labels.len() != config.num_labels {
            tracing::warn!(
                "id2label tem {} labels, config.json declara {}; ids sem label viram O",
                labels.len(),
                config.num_labels
            );
        }

        // SAFETY: o arquivo de pesos não é modificado enquanto o processo o mantém mapeado.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&paths.weights], DType::F32, device)?
        };
        let model = NerModel::load(config, vocab.len(), vb)?;

        tracing::info!(
            "Modelo NER carregado: vocab={} chars, embedding={}, hidden={}, labels={}, device={:?}",
            vocab.len(),
            config.embedding_dim,
            config.hidden_dim,
            config.num_labels,
            device
        );

        Ok(Self::new(vocab, labels, model))
    }

    pub fn model(&self) -> &NerModel {
        &self.model
    }

    /// Processa o texto de forma síncrona e retorna o resultado final.
    ///
    /// Texto vazio ou só com espaços retorna zero entidades sem executar a rede.
    pub fn analyze(&self, text: &str) -> NerResult<Analysis> {
        self.run(text, &mut |_| {})
    }

    /// Executa o pipeline enviando eventos de progresso pelo canal `tx`.
    ///
    /// Em caso de erro o último evento é `Error`.
    pub fn analyze_streaming(&self, text: &str, tx: mpsc::Sender<PipelineEvent>) {
        let mut emit = |event: PipelineEvent| {
            let _ = tx.send(event);
        };
        if let Err(e) = self.run(text, &mut emit) {
            emit(PipelineEvent::Error {
                message: e.to_string(),
            });
        }
    }

    fn run(&self, text: &str, emit: &mut dyn FnMut(PipelineEvent)) -> NerResult<Analysis> {
        let start = Instant::now();

        // === Passo 1: Normalização e tokenização ===
        let text = normalize_text(text);
        emit(PipelineEvent::Normalized { text: text.clone() });
        let tokens = tokenize(&text);
        emit(PipelineEvent::TokenizationDone {
            tokens: tokens.clone(),
            total: tokens.len(),
        });

        let tagged_tokens: Vec<TaggedToken> = if tokens.is_empty() {
            Vec::new()
        } else {
            // === Passo 2: Codificação de caracteres ===
            let words: Vec<EncodedWord> = tokens
                .iter()
                .map(|t| self.vocab.encode_word(&t.text, MAX_WORD_LEN))
                .collect();
            emit(PipelineEvent::WordsEncoded {
                lengths: words.iter().map(|w| w.length).collect(),
            });

            // === Passo 3: Rede neural + conversão para Tag ===
            let predictions = self.model.predict(&words)?;
            tokens
                .into_iter()
                .zip(predictions)
                .map(|(token, pred)| {
                    let tag = self.labels.tag(pred.label_id);
                    let confidence = f64::from(pred.score);
                    emit(PipelineEvent::TagAssigned {
                        token_index: token.index,
                        token_text: token.text.clone(),
                        tag: tag.label(),
                        confidence,
                    });
                    TaggedToken {
                        token,
                        tag,
                        confidence,
                    }
                })
                .collect()
        };

        // === Passo 4: Agrupamento de entidades ===
        let entities = decode_entities(&tagged_tokens);
        let processing_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            "NER: {} tokens, {} entidades em {} ms",
            tagged_tokens.len(),
            entities.len(),
            processing_ms
        );

        emit(PipelineEvent::Done {
            text: text.clone(),
            entities: entities.clone(),
            tagged_tokens: tagged_tokens.clone(),
            total_tokens: tagged_tokens.len(),
            processing_ms,
        });

        Ok(Analysis {
            text,
            entities,
            tagged_tokens,
            processing_ms,
        })
    }
}
