//! # Modelo NER Neural (pré-treinado)
//!
//! Arquitetura em dois níveis, apenas inferência:
//!
//! ```text
//! palavra ──► [CharEncoder]  embedding de caracteres + GRU  ──► vetor da palavra (H)
//!                   │ (um vetor por token)
//!                   ▼
//! sentença ─► [ContextEncoder] GRU bidirecional ──► vetor contextual (2·H)
//!                   ▼
//!             [BioHead] linear + softmax ──► distribuição sobre labels BIO
//! ```
//!
//! ## Nomes dos tensores
//!
//! Os pesos são lidos com os nomes do `state_dict` original:
//!
//! - `char_encoder.emb.weight` `(V, E)`
//! - `char_encoder.rnn.{weight,bias}_{ih,hh}_l0`
//! - `ctx_rnn.{weight,bias}_{ih,hh}_l0` e `..._l0_reverse`
//! - `bio_head.weight` `(L, 2·H)`, `bio_head.bias` `(L)`
//!
//! ## Comprimentos variáveis
//!
//! Todas as palavras de uma sentença são processadas juntas pelo
//! [`CharEncoder`], com largura fixa. Em cada passo `t` uma máscara `(N, 1)`
//! mantém o estado anterior das palavras com `length <= t`, de modo que o
//! preenchimento nunca altera o vetor final.

use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{embedding, linear, ops::softmax_last_dim, Embedding, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{NerError, NerResult};
use crate::gru::{Direction, GruCell};
use crate::vocab::EncodedWord;

/// Hiperparâmetros lidos de `config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Dimensão do embedding de caracteres (E).
    pub embedding_dim: usize,
    /// Dimensão do estado oculto das GRUs (H).
    pub hidden_dim: usize,
    /// Número de labels BIO (L).
    pub num_labels: usize,
}

impl ModelConfig {
    /// Rejeita dimensões zeradas antes de tentar carregar qualquer tensor.
    pub fn validate(&self) -> NerResult<()> {
        for (name, value) in [
            ("embedding_dim", self.embedding_dim),
            ("hidden_dim", self.hidden_dim),
            ("num_labels", self.num_labels),
        ] {
            if value == 0 {
                return Err(NerError::InvalidConfig(format!("{name} deve ser maior que zero")));
            }
        }
        Ok(())
    }
}

/// Codificador de caracteres: uma palavra → um vetor de tamanho H.
#[derive(Debug, Clone)]
pub struct CharEncoder {
    emb: Embedding,
    rnn: GruCell,
}

impl CharEncoder {
    pub fn load(vocab_size: usize, config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let emb = embedding(vocab_size, config.embedding_dim, vb.pp("emb"))?;
        let rnn = GruCell::load(
            config.embedding_dim,
            config.hidden_dim,
            Direction::Forward,
            &vb.pp("rnn"),
        )?;
        Ok(Self { emb, rnn })
    }

    /// Codifica todas as palavras de uma sentença, retornando `(N, H)`.
    ///
    /// O estado de cada palavra é o último estado oculto após exatamente
    /// `length` caracteres.
    pub fn forward(&self, words: &[EncodedWord], device: &Device) -> Result<Tensor> {
        let n = words.len();
        if n == 0 {
            return self.rnn.zero_state(0, device);
        }
        let width = words.iter().map(|w| w.ids.len()).max().unwrap_or(0);
        let mut flat = Vec::with_capacity(n * width);
        for w in words {
            flat.extend_from_slice(&w.ids);
            flat.resize(flat.len() + (width - w.ids.len()), crate::vocab::PAD_ID);
        }
        let ids = Tensor::from_vec(flat, (n, width), device)?;
        let embedded = self.emb.forward(&ids)?; // (N, W, E)

        let steps = words
            .iter()
            .map(|w| w.length.min(width))
            .max()
            .unwrap_or(0);
        let mut h = self.rnn.zero_state(n, device)?;
        for t in 0..steps {
            let x_t = embedded.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            let candidate = self.rnn.step(&x_t, &h)?;

            let mask: Vec<f32> = words
                .iter()
                .map(|w| if t < w.length { 1.0 } else { 0.0 })
                .collect();
            let mask = Tensor::from_vec(mask, (n, 1), device)?;
            let keep = mask.affine(-1.0, 1.0)?;
            h = (candidate.broadcast_mul(&mask)? + h.broadcast_mul(&keep)?)?;
        }
        Ok(h)
    }
}

/// GRU bidirecional sobre a sequência de vetores de palavra.
#[derive(Debug, Clone)]
pub struct ContextEncoder {
    forward: GruCell,
    backward: GruCell,
}

impl ContextEncoder {
    pub fn load(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let h = config.hidden_dim;
        Ok(Self {
            forward: GruCell::load(h, h, Direction::Forward, &vb)?,
            backward: GruCell::load(h, h, Direction::Backward, &vb)?,
        })
    }

    /// `(T, H)` → `(T, 2·H)`: concatenação dos estados direto e reverso de cada posição.
    pub fn forward(&self, words: &Tensor) -> Result<Tensor> {
        let (len, _) = words.dims2()?;
        let device = words.device();

        let mut h = self.forward.zero_state(1, device)?;
        let mut fwd = Vec::with_capacity(len);
        for t in 0..len {
            h = self.forward.step(&words.narrow(0, t, 1)?, &h)?;
            fwd.push(h.clone());
        }

        let mut h = self.backward.zero_state(1, device)?;
        let mut bwd = Vec::with_capacity(len);
        for t in (0..len).rev() {
            h = self.backward.step(&words.narrow(0, t, 1)?, &h)?;
            bwd.push(h.clone());
        }
        bwd.reverse();

        let fwd = Tensor::cat(&fwd, 0)?;
        let bwd = Tensor::cat(&bwd, 0)?;
        Tensor::cat(&[&fwd, &bwd], 1)
    }
}

/// Projeção linear + softmax sobre os labels.
#[derive(Debug, Clone)]
pub struct BioHead {
    proj: Linear,
}

impl BioHead {
    pub fn load(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            proj: linear(2 * config.hidden_dim, config.num_labels, vb)?,
        })
    }

    /// `(T, 2·H)` → probabilidades `(T, L)`.
    pub fn forward(&self, context: &Tensor) -> Result<Tensor> {
        softmax_last_dim(&self.proj.forward(context)?)
    }
}

/// Label prevista para um token: índice e probabilidade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label_id: usize,
    pub score: f32,
}

/// Rede completa. Imutável depois de carregada; pode ser compartilhada entre threads.
#[derive(Debug, Clone)]
pub struct NerModel {
    config: ModelConfig,
    char_encoder: CharEncoder,
    ctx_rnn: ContextEncoder,
    bio_head: BioHead,
    device: Device,
}

impl NerModel {
    /// Carrega a rede a partir de um `VarBuilder` na raiz do checkpoint.
    pub fn load(config: ModelConfig, vocab_size: usize, vb: VarBuilder) -> NerResult<Self> {
        config.validate()?;
        let device = vb.device().clone();
        Ok(Self {
            char_encoder: CharEncoder::load(vocab_size, &config, vb.pp("char_encoder"))?,
            ctx_rnn: ContextEncoder::load(&config, vb.pp("ctx_rnn"))?,
            bio_head: BioHead::load(&config, vb.pp("bio_head"))?,
            config,
            device,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Distribuição de probabilidade por token, `T × L`.
    pub fn predict_proba(&self, words: &[EncodedWord]) -> NerResult<Vec<Vec<f32>>> {
        if words.is_empty() {
            return Ok(vec![]);
        }
        let word_vectors = self.char_encoder.forward(words, &self.device)?;
        let context = self.ctx_rnn.forward(&word_vectors)?;
        let probs = self.bio_head.forward(&context)?;
        Ok(probs.to_vec2::<f32>()?)
    }

    /// Label mais provável de cada token.
    pub fn predict(&self, words: &[EncodedWord]) -> NerResult<Vec<Prediction>> {
        Ok(self
            .predict_proba(words)?
            .iter()
            .map(|probs| {
                let (label_id, score) = argmax(probs).unwrap_or((0, 0.0));
                Prediction { label_id, score }
            })
            .collect())
    }
}

/// Índice e valor do maior elemento. Em empate exato vence o menor índice.
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let (first, rest) = values.split_first()?;
    let mut best = (0, *first);
    for (i, &v) in rest.iter().enumerate() {
        if v > best.1 {
            best = (i + 1, v);
        }
    }
    Some(best)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gru::tests::insert_cell;
    use crate::vocab::{CharVocab, MAX_WORD_LEN, PAD_ID};
    use candle_core::DType;
    use std::collections::HashMap;

    pub(crate) const CONFIG: ModelConfig = ModelConfig {
        embedding_dim: 4,
        hidden_dim: 3,
        num_labels: 3,
    };

    /// Pesos sintéticos, todos derivados de fórmulas fixas (sem aleatoriedade).
    ///
    /// `head_bias` permite forçar a label vencedora.
    pub(crate) fn synthetic_weights(vocab_size: usize, head_bias: [f32; 3]) -> HashMap<String, Tensor> {
        let dev = Device::Cpu;
        let ModelConfig { embedding_dim: e, hidden_dim: h, num_labels: l } = CONFIG;
        let mut map = HashMap::new();

        let emb: Vec<f32> = (0..vocab_size * e)
            .map(|i| ((i * 7 % 11) as f32 - 5.0) / 10.0)
            .collect();
        map.insert(
            "char_encoder.emb.weight".to_string(),
            Tensor::from_vec(emb, (vocab_size, e), &dev).unwrap(),
        );
        insert_cell(&mut map, "char_encoder.rnn", e, h, Direction::Forward, 0.1);
        insert_cell(&mut map, "ctx_rnn", h, h, Direction::Forward, 0.2);
        insert_cell(&mut map, "ctx_rnn", h, h, Direction::Backward, -0.1);

        let head: Vec<f32> = (0..l * 2 * h).map(|i| (i % 5) as f32 / 20.0).collect();
        map.insert(
            "bio_head.weight".to_string(),
            Tensor::from_vec(head, (l, 2 * h), &dev).unwrap(),
        );
        map.insert(
            "bio_head.bias".to_string(),
            Tensor::from_vec(head_bias.to_vec(), l, &dev).unwrap(),
        );
        map
    }

    pub(crate) fn synthetic_model(vocab: &CharVocab, head_bias: [f32; 3]) -> NerModel {
        let map = synthetic_weights(vocab.len(), head_bias);
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        NerModel::load(CONFIG, vocab.len(), vb).unwrap()
    }

    fn vocab() -> CharVocab {
        CharVocab::build(["ភ្នំពេញ", "ចន", "ធី", "abc"])
    }

    fn assert_close(a: &[Vec<f32>], b: &[Vec<f32>]) {
        assert_eq!(a.len(), b.len());
        for (ra, rb) in a.iter().zip(b) {
            for (x, y) in ra.iter().zip(rb) {
                assert!((x - y).abs() < 1e-6, "{x} != {y}");
            }
        }
    }

    #[test]
    fn test_argmax_ties_pick_lowest_index() {
        assert_eq!(argmax(&[0.25, 0.5, 0.5, 0.25]), Some((1, 0.5)));
        assert_eq!(argmax(&[1.0 / 3.0; 3]), Some((0, 1.0 / 3.0)));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_probabilities_are_normalized() {
        let vocab = vocab();
        let model = synthetic_model(&vocab, [0.0, 0.0, 0.0]);
        let words: Vec<EncodedWord> = ["ចន", "ធី", "ភ្នំពេញ"]
            .iter()
            .map(|w| vocab.encode_word(w, MAX_WORD_LEN))
            .collect();
        let probs = model.predict_proba(&words).unwrap();
        assert_eq!(probs.len(), 3);
        for row in &probs {
            assert_eq!(row.len(), CONFIG.num_labels);
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_char_encoder_ignores_padding() {
        let vocab = vocab();
        let map = synthetic_weights(vocab.len(), [0.0; 3]);
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        let encoder = CharEncoder::load(vocab.len(), &CONFIG, vb.pp("char_encoder")).unwrap();
        let dev = Device::Cpu;

        let short = vocab.encode_word("ចន", 4);
        let wide = vocab.encode_word("ចន", MAX_WORD_LEN);
        // lixo depois do comprimento real não pode influenciar o resultado
        let mut garbage = wide.clone();
        for id in garbage.ids.iter_mut().skip(garbage.length) {
            *id = 2;
        }
        assert_ne!(garbage.ids[MAX_WORD_LEN - 1], PAD_ID);

        let a = encoder.forward(&[short], &dev).unwrap().to_vec2::<f32>().unwrap();
        let b = encoder.forward(&[wide], &dev).unwrap().to_vec2::<f32>().unwrap();
        let c = encoder.forward(&[garbage], &dev).unwrap().to_vec2::<f32>().unwrap();
        assert_close(&a, &b);
        assert_close(&a, &c);
    }

    #[test]
    fn test_char_encoder_words_are_independent() {
        let vocab = vocab();
        let map = synthetic_weights(vocab.len(), [0.0; 3]);
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        let encoder = CharEncoder::load(vocab.len(), &CONFIG, vb.pp("char_encoder")).unwrap();
        let dev = Device::Cpu;

        let a = vocab.encode_word("ចន", MAX_WORD_LEN);
        let b = vocab.encode_word("ភ្នំពេញ", MAX_WORD_LEN);
        let alone = encoder.forward(&[a.clone()], &dev).unwrap().to_vec2::<f32>().unwrap();
        let together = encoder.forward(&[a, b], &dev).unwrap().to_vec2::<f32>().unwrap();
        assert_close(&alone, &together[..1]);
    }

    #[test]
    fn test_context_encoder_output_width() {
        let vocab = vocab();
        let map = synthetic_weights(vocab.len(), [0.0; 3]);
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        let ctx = ContextEncoder::load(&CONFIG, vb.pp("ctx_rnn")).unwrap();
        let words = Tensor::ones((5, CONFIG.hidden_dim), DType::F32, &Device::Cpu).unwrap();
        let out = ctx.forward(&words).unwrap();
        assert_eq!(out.dims(), &[5, 2 * CONFIG.hidden_dim]);
    }

    fn patterned(len: usize, seed: usize) -> Vec<f32> {
        (0..len)
            .map(|i| ((i * seed + 3) % 13) as f32 / 13.0 - 0.5)
            .collect()
    }

    /// GRU escalar de referência (entrada com a mesma dimensão do estado).
    struct ScalarGru {
        w_ih: Vec<f32>,
        w_hh: Vec<f32>,
        b_ih: Vec<f32>,
        b_hh: Vec<f32>,
        hidden: usize,
    }

    impl ScalarGru {
        fn new(hidden: usize, seed: usize) -> Self {
            Self {
                w_ih: patterned(3 * hidden * hidden, seed),
                w_hh: patterned(3 * hidden * hidden, seed + 2),
                b_ih: patterned(3 * hidden, seed + 4),
                b_hh: patterned(3 * hidden, seed + 6),
                hidden,
            }
        }

        fn insert(&self, map: &mut HashMap<String, Tensor>, prefix: &str, direction: Direction) {
            let dev = Device::Cpu;
            let (g, h) = (3 * self.hidden, self.hidden);
            let sfx = if direction == Direction::Backward { "_reverse" } else { "" };
            let tensor = |v: &[f32], shape: &[usize]| Tensor::from_vec(v.to_vec(), shape, &dev).unwrap();
            map.insert(format!("{prefix}.weight_ih_l0{sfx}"), tensor(&self.w_ih, &[g, h]));
            map.insert(format!("{prefix}.weight_hh_l0{sfx}"), tensor(&self.w_hh, &[g, h]));
            map.insert(format!("{prefix}.bias_ih_l0{sfx}"), tensor(&self.b_ih, &[g]));
            map.insert(format!("{prefix}.bias_hh_l0{sfx}"), tensor(&self.b_hh, &[g]));
        }

        fn step(&self, x: &[f32], h: &[f32]) -> Vec<f32> {
            let affine = |w: &[f32], b: &[f32], v: &[f32], row: usize| {
                b[row] + v.iter().enumerate().map(|(j, vj)| w[row * v.len() + j] * vj).sum::<f32>()
            };
            let sig = |v: f32| 1.0 / (1.0 + (-v).exp());
            let hd = self.hidden;
            (0..hd)
                .map(|k| {
                    let r = sig(affine(&self.w_ih, &self.b_ih, x, k) + affine(&self.w_hh, &self.b_hh, h, k));
                    let z = sig(
                        affine(&self.w_ih, &self.b_ih, x, hd + k)
                            + affine(&self.w_hh, &self.b_hh, h, hd + k),
                    );
                    let n = (affine(&self.w_ih, &self.b_ih, x, 2 * hd + k)
                        + r * affine(&self.w_hh, &self.b_hh, h, 2 * hd + k))
                    .tanh();
                    n + z * (h[k] - n)
                })
                .collect()
        }

        fn run<'a>(&self, inputs: impl Iterator<Item = &'a Vec<f32>>) -> Vec<Vec<f32>> {
            let mut state = vec![0.0; self.hidden];
            inputs
                .map(|x| {
                    state = self.step(x, &state);
                    state.clone()
                })
                .collect()
        }
    }

    fn scalar_context() -> (ContextEncoder, ScalarGru, ScalarGru) {
        let fwd = ScalarGru::new(CONFIG.hidden_dim, 5);
        let bwd = ScalarGru::new(CONFIG.hidden_dim, 7);
        let mut map = HashMap::new();
        fwd.insert(&mut map, "ctx_rnn", Direction::Forward);
        bwd.insert(&mut map, "ctx_rnn", Direction::Backward);
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        let ctx = ContextEncoder::load(&CONFIG, vb.pp("ctx_rnn")).unwrap();
        (ctx, fwd, bwd)
    }

    #[test]
    fn test_context_encoder_matches_scalar_gru() {
        let h = CONFIG.hidden_dim;
        let (ctx, fwd, bwd) = scalar_context();
        let inputs: Vec<Vec<f32>> = (0..4).map(|t| patterned(h, t + 2)).collect();
        let words = Tensor::from_vec(inputs.concat(), (4, h), &Device::Cpu).unwrap();
        let out = ctx.forward(&words).unwrap().to_vec2::<f32>().unwrap();

        let forward = fwd.run(inputs.iter());
        let mut backward = bwd.run(inputs.iter().rev());
        backward.reverse();

        for t in 0..4 {
            let expected = [forward[t].as_slice(), backward[t].as_slice()].concat();
            assert_eq!(out[t].len(), 2 * h);
            for (x, y) in out[t].iter().zip(&expected) {
                assert!((x - y).abs() < 1e-5, "posição {t}: {x} != {y}");
            }
        }
    }

    #[test]
    fn test_last_word_reaches_first_position() {
        let h = CONFIG.hidden_dim;
        let (ctx, _, _) = scalar_context();
        let original = patterned(4 * h, 3);
        let mut changed = original.clone();
        for v in changed[3 * h..].iter_mut() {
            *v += 1.0;
        }
        let run = |v: Vec<f32>| {
            let words = Tensor::from_vec(v, (4, h), &Device::Cpu).unwrap();
            ctx.forward(&words).unwrap().to_vec2::<f32>().unwrap()
        };
        let a = run(original);
        let b = run(changed);

        // metade direta da posição 0 só vê a primeira palavra
        assert_close(&[a[0][..h].to_vec()], &[b[0][..h].to_vec()]);
        // metade reversa carrega a última palavra até o início
        assert!(a[0][h..]
            .iter()
            .zip(&b[0][h..])
            .any(|(x, y)| (x - y).abs() > 1e-4));
    }

    #[test]
    fn test_head_bias_drives_prediction() {
        let vocab = vocab();
        let model = synthetic_model(&vocab, [0.0, 8.0, 0.0]);
        let words = vec![vocab.encode_word("ចន", MAX_WORD_LEN)];
        let preds = model.predict(&words).unwrap();
        assert_eq!(preds[0].label_id, 1);
        assert!(preds[0].score > 0.9);
    }

    #[test]
    fn test_vocab_size_mismatch_is_rejected() {
        let map = synthetic_weights(10, [0.0; 3]);
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        assert!(matches!(
            NerModel::load(CONFIG, 12, vb),
            Err(NerError::Tensor(_))
        ));
    }

    #[test]
    fn test_zero_dimension_config_is_rejected() {
        let bad = ModelConfig { hidden_dim: 0, ..CONFIG };
        assert!(matches!(bad.validate(), Err(NerError::InvalidConfig(_))));
    }
}
