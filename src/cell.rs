//! Recurrent cells propagating a hidden state along the time dimension.
//!
//! GRU and LSTM come straight from `candle_nn`. The plain (Elman) recurrent cell is implemented
//! here against the same [`RNN`] trait, so every variant is driven the same way.

use std::{fmt, str::FromStr};

use candle_core::{DType, Tensor};
use candle_nn::{
    Init, VarBuilder,
    rnn::{GRUConfig, LSTMConfig, RNN, gru, lstm},
};

use crate::error::Error;

/// Selects the recurrent computation of a model. Fixed for the lifetime of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellVariant {
    /// Plain recurrent cell with tanh nonlinearity
    Rnn,
    /// Gated recurrent unit
    Gru,
    /// Long short-term memory
    Lstm,
}

impl CellVariant {
    pub const ALL: [CellVariant; 3] = [CellVariant::Rnn, CellVariant::Gru, CellVariant::Lstm];

    pub fn name(self) -> &'static str {
        match self {
            CellVariant::Rnn => "rnn",
            CellVariant::Gru => "gru",
            CellVariant::Lstm => "lstm",
        }
    }
}

impl fmt::Display for CellVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CellVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CellVariant::ALL
            .into_iter()
            .find(|variant| variant.name() == s)
            .ok_or_else(|| Error::UnsupportedVariant {
                kind: "recurrent module",
                value: s.to_owned(),
            })
    }
}

/// Consumes an embedded sequence and produces the hidden state for each of its positions.
pub trait Recurrence {
    /// Maps (batch, time, input_dim) to (batch, time, hidden_dim).
    fn hidden_states(&self, xs: &Tensor) -> candle_core::Result<Tensor>;
}

impl<T> Recurrence for T
where
    T: RNN,
{
    fn hidden_states(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, time, _features) = xs.dims3()?;
        let states = self.seq(xs)?;
        // GRU concatenates its states along the time axis instead of stacking them
        self.states_to_tensor(&states)?.reshape((batch, time, ()))
    }
}

/// Instantiates the parameters of the selected cell below `vb`.
pub fn recurrence(
    variant: CellVariant,
    in_dim: usize,
    hidden_dim: usize,
    vb: VarBuilder,
) -> candle_core::Result<Box<dyn Recurrence>> {
    let recurrence: Box<dyn Recurrence> = match variant {
        CellVariant::Rnn => Box::new(ElmanRnn::new(in_dim, hidden_dim, vb)?),
        CellVariant::Gru => Box::new(gru(in_dim, hidden_dim, GRUConfig::default(), vb)?),
        CellVariant::Lstm => Box::new(lstm(in_dim, hidden_dim, LSTMConfig::default(), vb)?),
    };
    Ok(recurrence)
}

/// Hidden state of [`ElmanRnn`]
#[derive(Debug, Clone)]
pub struct ElmanState {
    pub h: Tensor,
}

/// h_t = tanh(W_ih x_t + b_ih + W_hh h_(t-1) + b_hh)
#[derive(Debug, Clone)]
pub struct ElmanRnn {
    w_ih: Tensor,
    w_hh: Tensor,
    b_ih: Tensor,
    b_hh: Tensor,
    hidden_dim: usize,
}

impl ElmanRnn {
    pub fn new(in_dim: usize, hidden_dim: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let bound = 1. / (hidden_dim as f64).sqrt();
        let init = Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let w_ih = vb.get_with_hints((hidden_dim, in_dim), "weight_ih_l0", init)?;
        let w_hh = vb.get_with_hints((hidden_dim, hidden_dim), "weight_hh_l0", init)?;
        let b_ih = vb.get_with_hints(hidden_dim, "bias_ih_l0", init)?;
        let b_hh = vb.get_with_hints(hidden_dim, "bias_hh_l0", init)?;
        Ok(Self {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            hidden_dim,
        })
    }

    pub fn dtype(&self) -> DType {
        self.w_hh.dtype()
    }
}

impl RNN for ElmanRnn {
    type State = ElmanState;

    fn zero_state(&self, batch_dim: usize) -> candle_core::Result<Self::State> {
        let h = Tensor::zeros((batch_dim, self.hidden_dim), self.dtype(), self.w_hh.device())?;
        Ok(ElmanState { h })
    }

    fn step(&self, input: &Tensor, state: &Self::State) -> candle_core::Result<Self::State> {
        let from_input = input.matmul(&self.w_ih.t()?)?.broadcast_add(&self.b_ih)?;
        let from_state = state.h.matmul(&self.w_hh.t()?)?.broadcast_add(&self.b_hh)?;
        let h = (from_input + from_state)?.tanh()?;
        Ok(ElmanState { h })
    }

    fn states_to_tensor(&self, states: &[Self::State]) -> candle_core::Result<Tensor> {
        let states = states.iter().map(|s| s.h.clone()).collect::<Vec<_>>();
        Tensor::stack(&states, 1)
    }
}
