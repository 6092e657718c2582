//! Sequence classifiers over fixed-size windows.
//!
//! [`LstmClassifier`] is a stacked LSTM (gate order input, forget, cell, output)
//! whose last hidden state feeds a ReLU-then-Linear head, producing raw logits.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::result::{AiError, AiResult};

/// A model turning a `[steps][channels]` window into class logits.
pub trait SequenceClassifier: Send + Sync {
    /// Channels per time step.
    fn input_size(&self) -> usize;

    /// Length of the logit vector.
    fn classes(&self) -> usize;

    fn logits(&self, window: &[Vec<f64>]) -> AiResult<Vec<f64>>;
}

/// Serialized weights of one LSTM layer (`4 * hidden` rows, gates i, f, g, o).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmLayerWeights {
    pub weight_ih: Vec<Vec<f64>>,
    pub weight_hh: Vec<Vec<f64>>,
    pub bias_ih: Vec<f64>,
    pub bias_hh: Vec<f64>,
}

/// Serialized weights of one linear layer (`out` rows of `in` columns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearWeights {
    pub weight: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

/// On-disk weight file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmWeights {
    pub input_size: usize,
    pub hidden_size: usize,
    pub layers: Vec<LstmLayerWeights>,
    /// Each entry is preceded by a ReLU.
    pub head: Vec<LinearWeights>,
}

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq)]
struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    fn from_rows(rows: &[Vec<f64>], cols: usize, what: &str) -> AiResult<Self> {
        if rows.iter().any(|r| r.len() != cols) {
            return Err(AiError::InvalidInput(format!("{what}: every row must have {cols} columns")));
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data: rows.iter().flatten().copied().collect(),
        })
    }

    /// `out += self * x`.
    fn mul_add(&self, x: &[f64], out: &mut [f64]) {
        for (r, o) in out.iter_mut().enumerate().take(self.rows) {
            let row = &self.data[r * self.cols..(r + 1) * self.cols];
            *o += row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LstmLayer {
    w_ih: Matrix,
    w_hh: Matrix,
    bias: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
struct Linear {
    weight: Matrix,
    bias: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LstmClassifier {
    input_size: usize,
    hidden: usize,
    layers: Vec<LstmLayer>,
    head: Vec<Linear>,
}

impl LstmClassifier {
    pub fn from_weights(weights: LstmWeights) -> AiResult<Self> {
        let hidden = weights.hidden_size;
        if hidden == 0 || weights.input_size == 0 || weights.layers.is_empty() || weights.head.is_empty() {
            return Err(AiError::InvalidInput(
                "LSTM needs non-zero sizes, at least one layer and a head".to_string(),
            ));
        }

        let mut layers = Vec::with_capacity(weights.layers.len());
        for (n, layer) in weights.layers.iter().enumerate() {
            let in_size = if n == 0 { weights.input_size } else { hidden };
            let w_ih = Matrix::from_rows(&layer.weight_ih, in_size, "weight_ih")?;
            let w_hh = Matrix::from_rows(&layer.weight_hh, hidden, "weight_hh")?;
            if w_ih.rows != 4 * hidden
                || w_hh.rows != 4 * hidden
                || layer.bias_ih.len() != 4 * hidden
                || layer.bias_hh.len() != 4 * hidden
            {
                return Err(AiError::InvalidInput(format!(
                    "LSTM layer {n} must have {} gate rows",
                    4 * hidden
                )));
            }
            let bias = layer.bias_ih.iter().zip(&layer.bias_hh).map(|(a, b)| a + b).collect();
            layers.push(LstmLayer { w_ih, w_hh, bias });
        }

        let mut head = Vec::with_capacity(weights.head.len());
        let mut in_size = hidden;
        for (n, linear) in weights.head.iter().enumerate() {
            let weight = Matrix::from_rows(&linear.weight, in_size, "head weight")?;
            if linear.bias.len() != weight.rows || weight.rows == 0 {
                return Err(AiError::InvalidInput(format!("head layer {n} has mismatched bias")));
            }
            in_size = weight.rows;
            head.push(Linear {
                weight,
                bias: linear.bias.clone(),
            });
        }

        Ok(Self {
            input_size: weights.input_size,
            hidden,
            layers,
            head,
        })
    }

    /// Read weights from a JSON file.
    pub fn load(path: &Path) -> AiResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| AiError::artifact(path, e))?;
        let weights: LstmWeights = serde_json::from_slice(&bytes).map_err(|e| AiError::artifact(path, e))?;
        Self::from_weights(weights)
    }

    fn run_layer(&self, layer: &LstmLayer, inputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let h = self.hidden;
        let mut hidden = vec![0.0; h];
        let mut cell = vec![0.0; h];
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let mut gates = layer.bias.clone();
            layer.w_ih.mul_add(x, &mut gates);
            layer.w_hh.mul_add(&hidden, &mut gates);

            for k in 0..h {
                let i = sigmoid(gates[k]);
                let f = sigmoid(gates[h + k]);
                let g = gates[2 * h + k].tanh();
                let o = sigmoid(gates[3 * h + k]);
                cell[k] = f * cell[k] + i * g;
                hidden[k] = o * cell[k].tanh();
            }
            outputs.push(hidden.clone());
        }
        outputs
    }
}

impl SequenceClassifier for LstmClassifier {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn classes(&self) -> usize {
        self.head.last().map_or(0, |l| l.weight.rows)
    }

    fn logits(&self, window: &[Vec<f64>]) -> AiResult<Vec<f64>> {
        if window.is_empty() {
            return Err(AiError::InvalidInput("empty input window".to_string()));
        }
        if let Some(step) = window.iter().position(|s| s.len() != self.input_size) {
            return Err(AiError::InvalidInput(format!(
                "step {step} has {} channels, expected {}",
                window[step].len(),
                self.input_size
            )));
        }

        let mut sequence = window.to_vec();
        for layer in &self.layers {
            sequence = self.run_layer(layer, &sequence);
        }
        let mut x = sequence
            .pop()
            .ok_or_else(|| AiError::InferenceFailed("LSTM produced no output".to_string()))?;

        for linear in &self.head {
            x.iter_mut().for_each(|v| *v = v.max(0.0));
            let mut out = linear.bias.clone();
            linear.weight.mul_add(&x, &mut out);
            x = out;
        }

        if x.iter().any(|v| !v.is_finite()) {
            return Err(AiError::InferenceFailed("non-finite logits".to_string()));
        }
        Ok(x)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn filled(rows: usize, cols: usize, v: f64) -> Vec<Vec<f64>> {
        vec![vec![v; cols]; rows]
    }

    /// Weights with zero matrices: logits equal the last head bias.
    pub(crate) fn constant_weights(input: usize, hidden: usize, bias: Vec<f64>) -> LstmWeights {
        LstmWeights {
            input_size: input,
            hidden_size: hidden,
            layers: vec![
                LstmLayerWeights {
                    weight_ih: filled(4 * hidden, input, 0.0),
                    weight_hh: filled(4 * hidden, hidden, 0.0),
                    bias_ih: vec![0.0; 4 * hidden],
                    bias_hh: vec![0.0; 4 * hidden],
                },
                LstmLayerWeights {
                    weight_ih: filled(4 * hidden, hidden, 0.0),
                    weight_hh: filled(4 * hidden, hidden, 0.0),
                    bias_ih: vec![0.0; 4 * hidden],
                    bias_hh: vec![0.0; 4 * hidden],
                },
            ],
            head: vec![
                LinearWeights {
                    weight: filled(2, hidden, 0.0),
                    bias: vec![0.0; 2],
                },
                LinearWeights {
                    weight: filled(bias.len(), 2, 0.0),
                    bias,
                },
            ],
        }
    }

    #[test]
    fn single_cell_matches_hand_computation() {
        let weights = LstmWeights {
            input_size: 1,
            hidden_size: 1,
            layers: vec![LstmLayerWeights {
                weight_ih: filled(4, 1, 1.0),
                weight_hh: filled(4, 1, 0.5),
                bias_ih: vec![0.0; 4],
                bias_hh: vec![0.0; 4],
            }],
            head: vec![LinearWeights {
                weight: vec![vec![2.0]],
                bias: vec![1.0],
            }],
        };
        let model = LstmClassifier::from_weights(weights).unwrap();

        // step 1: x = 1, h = c = 0
        let (i1, g1) = (sigmoid(1.0), 1.0f64.tanh());
        let c1 = i1 * g1;
        let h1 = sigmoid(1.0) * c1.tanh();
        // step 2: x = 0, recurrent input h1 * 0.5 on every gate
        let z = 0.5 * h1;
        let c2 = sigmoid(z) * c1 + sigmoid(z) * z.tanh();
        let h2 = sigmoid(z) * c2.tanh();

        let logits = model.logits(&[vec![1.0], vec![0.0]]).unwrap();
        assert_eq!(logits.len(), 1);
        assert!((logits[0] - (2.0 * h2.max(0.0) + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn zero_weights_return_the_head_bias() {
        let model = LstmClassifier::from_weights(constant_weights(9, 4, vec![0.1, 0.2, 0.3, 0.4, 0.5])).unwrap();
        assert_eq!(model.classes(), 5);
        assert_eq!(model.input_size(), 9);
        let logits = model.logits(&filled(10, 9, 0.7)).unwrap();
        assert_eq!(logits, vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn shape_errors_are_reported() {
        let mut weights = constant_weights(9, 4, vec![0.0; 5]);
        weights.layers[1].bias_hh.pop();
        assert!(LstmClassifier::from_weights(weights).is_err());

        let model = LstmClassifier::from_weights(constant_weights(9, 4, vec![0.0; 5])).unwrap();
        assert!(model.logits(&filled(10, 8, 0.0)).is_err());
        assert!(model.logits(&[]).is_err());
    }
}
