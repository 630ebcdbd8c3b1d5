//! # Vocabulário de Caracteres e Codificação de Palavras
//!
//! O modelo não tem vocabulário de palavras: cada token é lido caractere a
//! caractere. O vocabulário de caracteres é **derivado** da lista de palavras
//! de treinamento (`vocab.json`) toda vez que o serviço sobe:
//!
//! | id    | caractere                                   |
//! |-------|---------------------------------------------|
//! | 0     | `<PAD>` (preenchimento)                     |
//! | 1     | `<UNK>` (caractere desconhecido)            |
//! | 2..N  | caracteres distintos, em ordem de code point |
//!
//! A ordenação torna a construção determinística: os ids precisam bater
//! exatamente com as linhas da tabela de embedding do checkpoint.
//!
//! Cada palavra vira um [`EncodedWord`] de largura fixa [`MAX_WORD_LEN`],
//! truncada ou preenchida com `<PAD>`, junto com o comprimento real.

use std::collections::{BTreeSet, HashMap};

use crate::tokenizer::{is_separator, normalize_text};

/// Largura fixa da codificação de uma palavra (contrato com o checkpoint).
pub const MAX_WORD_LEN: usize = 24;

/// Id reservado para preenchimento.
pub const PAD_ID: u32 = 0;
/// Id reservado para caracteres fora do vocabulário.
pub const UNK_ID: u32 = 1;

/// Mapeamento imutável caractere → id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharVocab {
    char2id: HashMap<char, u32>,
}

/// Uma palavra codificada em largura fixa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedWord {
    /// Ids dos caracteres, sempre com `max_len` posições.
    pub ids: Vec<u32>,
    /// Número de caracteres reais antes do preenchimento (entre 1 e `max_len`).
    pub length: usize,
}

impl CharVocab {
    /// Constrói o vocabulário a partir das palavras de referência.
    ///
    /// Cada palavra é normalizada; caracteres de espaço em branco são ignorados.
    /// Rodar duas vezes sobre a mesma coleção produz exatamente os mesmos ids.
    pub fn build<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chars = BTreeSet::new();
        for word in words {
            chars.extend(
                normalize_text(word.as_ref())
                    .chars()
                    .filter(|c| !is_separator(*c)),
            );
        }

        let char2id = chars
            .into_iter()
            .zip(2u32..)
            .collect::<HashMap<char, u32>>();

        Self { char2id }
    }

    /// Tamanho total, incluindo `<PAD>` e `<UNK>` (linhas da tabela de embedding).
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.char2id.len() + 2
    }

    /// Id de um caractere, ou `UNK_ID` se ele nunca apareceu no treinamento.
    pub fn id_of(&self, c: char) -> u32 {
        self.char2id.get(&c).copied().unwrap_or(UNK_ID)
    }

    /// Codifica uma palavra em exatamente `max_len` ids.
    ///
    /// - Normaliza a palavra.
    /// - Mapeia os primeiros `max_len` caracteres (desconhecidos → `<UNK>`).
    /// - Completa com `<PAD>` à direita.
    ///
    /// Uma palavra que fica vazia depois da normalização recebe comprimento 1,
    /// para que o codificador recorrente sempre dê ao menos um passo.
    pub fn encode_word(&self, word: &str, max_len: usize) -> EncodedWord {
        let normalized = normalize_text(word);
        let mut ids: Vec<u32> = normalized
            .chars()
            .take(max_len)
            .map(|c| self.id_of(c))
            .collect();
        let real = ids.len();
        ids.resize(max_len, PAD_ID);

        EncodedWord {
            ids,
            length: real.clamp(1, max_len.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_words() -> Vec<&'static str> {
        vec!["ភ្នំពេញ", "ចន", "សៀមរាប", "abc", "b a", "c\u{1f}a"]
    }

    #[test]
    fn test_reserved_ids() {
        let vocab = CharVocab::build(reference_words());
        assert_eq!(vocab.id_of('a'), 2);
        assert_eq!(vocab.id_of('b'), 3);
        assert_eq!(vocab.id_of('c'), 4);
        assert_eq!(vocab.id_of('Z'), UNK_ID);
        // separadores nunca entram no vocabulário
        assert_eq!(vocab.id_of(' '), UNK_ID);
        assert_eq!(vocab.id_of('\u{1f}'), UNK_ID);
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = CharVocab::build(reference_words());
        let mut shuffled = reference_words();
        shuffled.reverse();
        let b = CharVocab::build(shuffled);
        assert_eq!(a, b);
        assert_eq!(a, CharVocab::build(reference_words()));
    }

    #[test]
    fn test_len_counts_reserved() {
        let vocab = CharVocab::build(["ab", "ba"]);
        assert_eq!(vocab.len(), 4);
        assert_eq!(CharVocab::build(Vec::<String>::new()).len(), 2);
    }

    #[test]
    fn test_encode_pads_and_substitutes_unknown() {
        let vocab = CharVocab::build(["ab"]);
        let enc = vocab.encode_word("aXb", 5);
        assert_eq!(enc.ids, vec![2, UNK_ID, 3, PAD_ID, PAD_ID]);
        assert_eq!(enc.length, 3);
    }

    #[test]
    fn test_encode_truncates_long_words() {
        let vocab = CharVocab::build(["ab"]);
        let long = "ab".repeat(20);
        let enc = vocab.encode_word(&long, MAX_WORD_LEN);
        assert_eq!(enc.ids.len(), MAX_WORD_LEN);
        assert_eq!(enc.length, MAX_WORD_LEN);
        assert!(enc.ids.iter().all(|&id| id != PAD_ID));
    }

    #[test]
    fn test_degenerate_word_gets_length_one() {
        let vocab = CharVocab::build(["ab"]);
        let enc = vocab.encode_word("\u{200b}", 4);
        assert_eq!(enc.ids, vec![PAD_ID; 4]);
        assert_eq!(enc.length, 1);
    }

    proptest! {
        #[test]
        fn prop_fixed_width_encoding(word in "[abកខ\u{17d2}]{0,40}", max_len in 1usize..32) {
            let vocab = CharVocab::build(["ab", "កខ"]);
            let enc = vocab.encode_word(&word, max_len);
            prop_assert_eq!(enc.ids.len(), max_len);
            prop_assert!(enc.length >= 1 && enc.length <= max_len);
            let real = word.chars().count().min(max_len);
            for (i, &id) in enc.ids.iter().enumerate() {
                if i < real {
                    prop_assert_ne!(id, PAD_ID);
                } else {
                    prop_assert_eq!(id, PAD_ID);
                }
            }
        }
    }
}
