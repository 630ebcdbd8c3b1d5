//! # Célula GRU
//!
//! Implementação da Gated Recurrent Unit com o mesmo layout de parâmetros do
//! PyTorch, para que um `state_dict` exportado em safetensors possa ser
//! carregado sem renomear tensores:
//!
//! - `weight_ih_l0{sufixo}`: `(3·H, I)` — portões r, z, n sobre a entrada
//! - `weight_hh_l0{sufixo}`: `(3·H, H)` — portões r, z, n sobre o estado
//! - `bias_ih_l0{sufixo}`, `bias_hh_l0{sufixo}`: `(3·H)`
//!
//! O sufixo é vazio na direção direta e `_reverse` na direção reversa de uma
//! GRU bidirecional.
//!
//! ## Equações
//!
//! ```text
//! r  = σ(W_ir·x + b_ir + W_hr·h + b_hr)
//! z  = σ(W_iz·x + b_iz + W_hz·h + b_hz)
//! n  = tanh(W_in·x + b_in + r ⊙ (W_hn·h + b_hn))
//! h' = n + z ⊙ (h − n)        // = (1 − z) ⊙ n + z ⊙ h
//! ```

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{ops::sigmoid, Linear, VarBuilder};

/// Sentido de leitura de uma camada recorrente.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn suffix(&self) -> &'static str {
        match self {
            Direction::Forward => "",
            Direction::Backward => "_reverse",
        }
    }
}

/// Uma célula GRU de camada única.
#[derive(Debug, Clone)]
pub struct GruCell {
    input: Linear,
    hidden: Linear,
    hidden_dim: usize,
}

impl GruCell {
    /// Carrega os pesos da célula a partir do `VarBuilder` (já posicionado no prefixo da camada).
    pub fn load(
        input_dim: usize,
        hidden_dim: usize,
        direction: Direction,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let sfx = direction.suffix();
        let gates = 3 * hidden_dim;
        let w_ih = vb.get((gates, input_dim), &format!("weight_ih_l0{sfx}"))?;
        let w_hh = vb.get((gates, hidden_dim), &format!("weight_hh_l0{sfx}"))?;
        let b_ih = vb.get(gates, &format!("bias_ih_l0{sfx}"))?;
        let b_hh = vb.get(gates, &format!("bias_hh_l0{sfx}"))?;

        Ok(Self {
            input: Linear::new(w_ih, Some(b_ih)),
            hidden: Linear::new(w_hh, Some(b_hh)),
            hidden_dim,
        })
    }

    /// Estado inicial zerado `(batch, H)`.
    pub fn zero_state(&self, batch: usize, device: &Device) -> Result<Tensor> {
        Tensor::zeros((batch, self.hidden_dim), DType::F32, device)
    }

    /// Um passo da recorrência: `x` é `(batch, I)`, `h` é `(batch, H)`.
    pub fn step(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let gi = self.input.forward(x)?.chunk(3, 1)?;
        let gh = self.hidden.forward(h)?.chunk(3, 1)?;

        let r = sigmoid(&(&gi[0] + &gh[0])?)?;
        let z = sigmoid(&(&gi[1] + &gh[1])?)?;
        let n = (&gi[2] + (&r * &gh[2])?)?.tanh()?;

        &n + (&z * (h - &n)?)?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Insere no mapa os quatro tensores de uma célula, com pesos constantes.
    pub(crate) fn insert_cell(
        map: &mut HashMap<String, Tensor>,
        prefix: &str,
        input_dim: usize,
        hidden_dim: usize,
        direction: Direction,
        weight: f32,
    ) {
        let sfx = direction.suffix();
        let gates = 3 * hidden_dim;
        let dev = Device::Cpu;
        let full = |shape: &[usize]| {
            Tensor::full(weight, shape, &dev).unwrap()
        };
        map.insert(format!("{prefix}.weight_ih_l0{sfx}"), full(&[gates, input_dim]));
        map.insert(format!("{prefix}.weight_hh_l0{sfx}"), full(&[gates, hidden_dim]));
        map.insert(format!("{prefix}.bias_ih_l0{sfx}"), full(&[gates]));
        map.insert(format!("{prefix}.bias_hh_l0{sfx}"), full(&[gates]));
    }

    #[test]
    fn test_zero_weights_keep_zero_state() {
        let mut map = HashMap::new();
        insert_cell(&mut map, "rnn", 2, 3, Direction::Forward, 0.0);
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        let cell = GruCell::load(2, 3, Direction::Forward, &vb.pp("rnn")).unwrap();

        let x = Tensor::ones((1, 2), DType::F32, &Device::Cpu).unwrap();
        let h0 = cell.zero_state(1, &Device::Cpu).unwrap();
        let h1 = cell.step(&x, &h0).unwrap();
        // r = z = 0.5, n = tanh(0) = 0 → h' = 0.5·h = 0
        assert_eq!(h1.to_vec2::<f32>().unwrap(), vec![vec![0.0; 3]]);
    }

    #[test]
    fn test_step_matches_hand_computation() {
        let mut map = HashMap::new();
        insert_cell(&mut map, "rnn", 1, 1, Direction::Backward, 0.5);
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        let cell = GruCell::load(1, 1, Direction::Backward, &vb.pp("rnn")).unwrap();

        let x = Tensor::new(&[[1.0f32]], &Device::Cpu).unwrap();
        let h0 = cell.zero_state(1, &Device::Cpu).unwrap();
        let h1 = cell.step(&x, &h0).unwrap().to_vec2::<f32>().unwrap()[0][0];

        // gi = 0.5·1 + 0.5 = 1.0 ; gh = 0.5·0 + 0.5 = 0.5
        let sig = |v: f32| 1.0 / (1.0 + (-v).exp());
        let r = sig(1.5);
        let z = sig(1.5);
        let n = (1.0 + r * 0.5).tanh();
        let expected = n + z * (0.0 - n);
        assert!((h1 - expected).abs() < 1e-6, "{h1} != {expected}");
    }

    #[test]
    fn test_missing_reverse_weights_fail_to_load() {
        let mut map = HashMap::new();
        insert_cell(&mut map, "rnn", 2, 2, Direction::Forward, 0.1);
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        assert!(GruCell::load(2, 2, Direction::Backward, &vb.pp("rnn")).is_err());
    }
}
