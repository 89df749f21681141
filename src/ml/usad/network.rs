//! USAD Network Architecture
//!
//! A shared encoder and two independent decoders. The decoders share no
//! parameters; only the encoder is common to both training phases.

use burn::{
    module::Module,
    nn::{Linear, LinearConfig, Relu},
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use super::trainer::BlendWeights;
use super::ModelDims;

/// Window to latent code: `w -> w/2 -> w/4 -> z`
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
    linear3: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Encoder<B> {
    pub fn new(dims: &ModelDims, device: &B::Device) -> Self {
        let (h1, h2) = dims.hidden_layers();
        Self {
            linear1: LinearConfig::new(dims.w_size, h1).init(device),
            linear2: LinearConfig::new(h1, h2).init(device),
            linear3: LinearConfig::new(h2, dims.z_size).init(device),
            activation: Relu::new(),
        }
    }

    /// The latent layer is left linear.
    pub fn forward(&self, w: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear1.forward(w);
        let x = self.activation.forward(x);
        let x = self.linear2.forward(x);
        let x = self.activation.forward(x);
        self.linear3.forward(x)
    }

    /// Flattened window length this encoder accepts
    pub fn input_dim(&self) -> usize {
        self.linear1.weight.dims()[0]
    }
}

/// Latent code to window: `z -> w/4 -> w/2 -> w`, sigmoid output in [0, 1]
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
    linear3: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Decoder<B> {
    pub fn new(dims: &ModelDims, device: &B::Device) -> Self {
        let (h1, h2) = dims.hidden_layers();
        Self {
            linear1: LinearConfig::new(dims.z_size, h2).init(device),
            linear2: LinearConfig::new(h2, h1).init(device),
            linear3: LinearConfig::new(h1, dims.w_size).init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear1.forward(z);
        let x = self.activation.forward(x);
        let x = self.linear2.forward(x);
        let x = self.activation.forward(x);
        sigmoid(self.linear3.forward(x))
    }
}

/// Encoder with its two decoders
#[derive(Module, Debug)]
pub struct UsadModel<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder1: Decoder<B>,
    pub decoder2: Decoder<B>,
}

/// The three reconstructions of one training forward pass
#[derive(Debug, Clone)]
pub struct UsadOutput<B: Backend> {
    /// `decoder1(encoder(w))`
    pub w1: Tensor<B, 2>,
    /// `decoder2(encoder(w))`
    pub w2: Tensor<B, 2>,
    /// `decoder2(encoder(w1))`
    pub w3: Tensor<B, 2>,
}

impl<B: Backend> UsadModel<B> {
    pub fn new(dims: &ModelDims, device: &B::Device) -> Self {
        Self {
            encoder: Encoder::new(dims, device),
            decoder1: Decoder::new(dims, device),
            decoder2: Decoder::new(dims, device),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.encoder.input_dim()
    }

    /// Full adversarial forward pass
    pub fn forward(&self, w: Tensor<B, 2>) -> UsadOutput<B> {
        let z = self.encoder.forward(w);
        let w1 = self.decoder1.forward(z.clone());
        let w2 = self.decoder2.forward(z);
        let w3 = self.decoder2.forward(self.encoder.forward(w1.clone()));
        UsadOutput { w1, w2, w3 }
    }

    /// `decoder1(encoder(w))` and `decoder2(encoder(w1))`, the two terms
    /// needed for scoring
    pub fn reconstruct(&self, w: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let w1 = self.decoder1.forward(self.encoder.forward(w));
        let w3 = self.decoder2.forward(self.encoder.forward(w1.clone()));
        (w1, w3)
    }
}

/// Mean squared error over every element
pub fn mse<B: Backend>(target: Tensor<B, 2>, reconstruction: Tensor<B, 2>) -> Tensor<B, 1> {
    let diff = target - reconstruction;
    (diff.clone() * diff).mean()
}

impl<B: Backend> UsadOutput<B> {
    /// `alpha * mse(w, w1) + beta * mse(w, w3)`, minimised by the encoder and decoder 1
    pub fn loss1(&self, w: Tensor<B, 2>, weights: BlendWeights) -> Tensor<B, 1> {
        mse(w.clone(), self.w1.clone()).mul_scalar(weights.alpha)
            + mse(w, self.w3.clone()).mul_scalar(weights.beta)
    }

    /// `alpha * mse(w, w2) - beta * mse(w, w3)`, minimised by the encoder and decoder 2
    pub fn loss2(&self, w: Tensor<B, 2>, weights: BlendWeights) -> Tensor<B, 1> {
        mse(w.clone(), self.w2.clone()).mul_scalar(weights.alpha)
            - mse(w, self.w3.clone()).mul_scalar(weights.beta)
    }
}
