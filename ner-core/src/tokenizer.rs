//! # Normalização e Tokenização para Khmer
//!
//! O khmer não separa palavras com espaço de forma consistente, mas o modelo foi
//! treinado sobre tokens delimitados por espaço em branco. Por isso a tokenização
//! aqui é propositalmente simples: cada sequência máxima de caracteres que não são
//! espaço vira um token.
//!
//! Antes de tokenizar, o texto passa por [`normalize_text`]:
//!
//! 1. Forma canônica composta Unicode (**NFC**) — sinais diacríticos e subscritos
//!    (coeng) ficam com uma única representação.
//! 2. Remoção de **ZWSP** (`U+200B`) e **BOM** (`U+FEFF`), muito comuns em texto
//!    khmer copiado da web e invisíveis para o usuário.
//!
//! ## Separadores
//!
//! Além do espaço em branco Unicode, os separadores de informação
//! `U+001C`..`U+001F` também delimitam tokens (ver [`is_separator`]); o modelo
//! foi treinado com essa convenção.
//!
//! ## Offsets
//!
//! Os offsets de cada [`Token`] são índices de **caractere** (code point) no texto
//! normalizado, não de byte. É o mesmo referencial usado nas entidades devolvidas
//! pela API.
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use khmer_ner_core::tokenizer::{normalize_text, tokenize};
//!
//! let text = normalize_text("ចន\u{200b} ធី  រស់នៅ");
//! let tokens = tokenize(&text);
//! assert_eq!(tokens.len(), 3);
//! assert_eq!((tokens[1].start, tokens[1].end), (3, 5));
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Caracteres invisíveis removidos na normalização.
const INVISIBLE_MARKS: &[char] = &['\u{200b}', '\u{feff}'];

/// Um token extraído do texto normalizado.
///
/// O `Token` é a unidade que o modelo enxerga como "palavra". Ele guarda a posição
/// exata no texto normalizado para que as entidades possam ser destacadas sem
/// reprocessar o texto.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    /// O texto do token (ex: "ភ្នំពេញ").
    pub text: String,
    /// Índice de caractere inicial no texto normalizado (inclusive).
    pub start: usize,
    /// Índice de caractere final no texto normalizado (exclusivo).
    pub end: usize,
    /// Índice sequencial do token na lista (0, 1, 2...).
    pub index: usize,
}

/// Normaliza o texto: NFC + remoção de ZWSP e BOM.
///
/// Nunca falha; texto vazio continua vazio.
pub fn normalize_text(text: &str) -> String {
    text.nfc().filter(|c| !INVISIBLE_MARKS.contains(c)).collect()
}

/// Verdadeiro para caracteres que separam tokens.
pub fn is_separator(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

fn non_whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\s\x{1C}-\x{1F}]+").expect("regex literal válida"))
}

/// Divide o texto (já normalizado) em sequências máximas sem espaço em branco.
///
/// Texto vazio ou só com espaços produz uma lista vazia.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    // O regex devolve offsets de byte; convertemos para caracteres incrementalmente
    let mut byte_cursor = 0;
    let mut char_cursor = 0;

    for m in non_whitespace().find_iter(text) {
        char_cursor += text[byte_cursor..m.start()].chars().count();
        let start = char_cursor;
        let len = m.as_str().chars().count();
        char_cursor += len;
        byte_cursor = m.end();

        tokens.push(Token {
            text: m.as_str().to_string(),
            start,
            end: start + len,
            index: tokens.len(),
        });
    }

    tokens
}

/// Recorta o texto pelos offsets de caractere de um token.
pub fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}
