//! # Esquema de Tags BIO e Decodificação de Entidades
//!
//! O modelo prevê, para cada token, uma label do esquema **BIO**:
//!
//! - `B-TIPO`: Begin — primeiro token de uma entidade
//! - `I-TIPO`: Inside — continuação da entidade do mesmo tipo
//! - `O`: Outside — não faz parte de nenhuma entidade
//!
//! Os tipos são abertos (vêm do `id2label.json` do checkpoint: `PER`, `LOC`,
//! `ORG`...). A string é convertida uma única vez em [`Tag`] logo após a
//! classificação; o decodificador trabalha só com a variante.
//!
//! ## Recuperação
//!
//! - Label sem prefixo reconhecido (ex: `PER`, `X-PER`) é tratada como `B-`.
//! - `I-TIPO` sem uma entidade aberta do mesmo tipo ("I- pendurado") abre uma
//!   entidade nova, como se fosse `B-TIPO`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{NerError, NerResult};
use crate::tokenizer::Token;

/// Tag BIO aplicada a um token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// **Begin**: início de uma entidade. Ex: **ភ្នំ** (B-LOC).
    Begin(String),
    /// **Inside**: continuação de uma entidade do mesmo tipo.
    Inside(String),
    /// **Outside**: fora de qualquer entidade.
    Outside,
}

impl Tag {
    /// Parseia a label do checkpoint. Nunca falha: formatos desconhecidos viram `Begin`.
    pub fn from_label(s: &str) -> Self {
        if s == "O" {
            return Tag::Outside;
        }
        match s.split_once('-') {
            Some(("B", entity_type)) => Tag::Begin(entity_type.to_string()),
            Some(("I", entity_type)) => Tag::Inside(entity_type.to_string()),
            Some((_, entity_type)) => Tag::Begin(entity_type.to_string()),
            None => Tag::Begin(s.to_string()),
        }
    }

    /// Representação textual (ex: "B-PER", "I-LOC", "O").
    pub fn label(&self) -> String {
        match self {
            Tag::Begin(t) => format!("B-{t}"),
            Tag::Inside(t) => format!("I-{t}"),
            Tag::Outside => "O".to_string(),
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Mapeamento id previsto → tag, construído a partir de `id2label.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    tags: HashMap<usize, Tag>,
}

impl LabelMap {
    /// Constrói a partir do JSON `{"0": "O", "1": "B-PER", ...}`.
    pub fn from_id2label(raw: HashMap<String, String>) -> NerResult<Self> {
        let mut tags = HashMap::with_capacity(raw.len());
        for (id, label) in raw {
            let id: usize = id.trim().parse().map_err(|_| {
                NerError::InvalidConfig(format!("id de label não numérico: {id:?}"))
            })?;
            tags.insert(id, Tag::from_label(&label));
        }
        Ok(Self { tags })
    }

    /// Tag do id previsto. Ids ausentes do mapa valem `O`.
    pub fn tag(&self, id: usize) -> Tag {
        self.tags.get(&id).cloned().unwrap_or(Tag::Outside)
    }

    /// Quantidade de ids mapeados.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.tags.len()
    }
}

/// Um token com sua tag BIO e probabilidade de confiança
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedToken {
    pub token: Token,
    pub tag: Tag,
    /// Probabilidade da tag escolhida (0.0 a 1.0)
    pub confidence: f64,
}

/// Uma entidade identificada no texto (span de tokens consecutivos).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    /// Tokens da entidade unidos por um espaço (ex: "ចន ធី")
    pub text: String,
    /// Tipo da entidade, sem prefixo (ex: "PER")
    pub label: String,
    /// Média das confianças dos tokens
    pub score: f64,
    /// Offset de caractere inicial (início do primeiro token)
    pub start: usize,
    /// Offset de caractere final (fim do último token)
    pub end: usize,
}

/// Entidade em construção.
#[derive(Debug)]
struct OpenSpan {
    entity_type: String,
    text: String,
    scores: Vec<f64>,
    start: usize,
    end: usize,
}

impl OpenSpan {
    fn begin(entity_type: &str, tt: &TaggedToken) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            text: tt.token.text.clone(),
            scores: vec![tt.confidence],
            start: tt.token.start,
            end: tt.token.end,
        }
    }

    fn extend(&mut self, tt: &TaggedToken) {
        self.text.push(' ');
        self.text.push_str(&tt.token.text);
        self.scores.push(tt.confidence);
        self.end = tt.token.end;
    }

    fn close(self) -> EntitySpan {
        let score = self.scores.iter().sum::<f64>() / self.scores.len().max(1) as f64;
        EntitySpan {
            text: self.text,
            label: self.entity_type,
            score,
            start: self.start,
            end: self.end,
        }
    }
}

/// Estados da máquina de decodificação.
#[derive(Debug)]
enum DecoderState {
    Outside,
    Accumulating(OpenSpan),
}

impl DecoderState {
    /// Emite a entidade aberta (se houver). O estado seguinte é sempre `Outside`.
    fn flush(self, entities: &mut Vec<EntitySpan>) {
        if let DecoderState::Accumulating(open) = self {
            entities.push(open.close());
        }
    }
}

/// Converte a sequência de tokens classificados em entidades.
///
/// Máquina de estados `Outside` / `Accumulating`, da esquerda para a direita:
/// - `O`: fecha a entidade aberta.
/// - `B-X`: fecha a entidade aberta e abre uma nova do tipo X.
/// - `I-X`: estende a entidade aberta se ela for do tipo X; caso contrário
///   age como `B-X`.
/// - Fim da sequência: fecha a entidade aberta.
///
/// # Exemplo
/// `[B-PER, I-PER, O, B-LOC]` -> `[EntitySpan(PER), EntitySpan(LOC)]`
pub fn decode_entities(tagged: &[TaggedToken]) -> Vec<EntitySpan> {
    let mut entities = Vec::new();
    let mut state = DecoderState::Outside;

    for tt in tagged {
        state = match (&tt.tag, state) {
            (Tag::Outside, current) => {
                current.flush(&mut entities);
                DecoderState::Outside
            }
            (Tag::Inside(t), DecoderState::Accumulating(mut open)) if open.entity_type == *t => {
                open.extend(tt);
                DecoderState::Accumulating(open)
            }
            (Tag::Begin(t) | Tag::Inside(t), current) => {
                current.flush(&mut entities);
                DecoderState::Accumulating(OpenSpan::begin(t, tt))
            }
        };
    }
    state.flush(&mut entities);

    entities
}
