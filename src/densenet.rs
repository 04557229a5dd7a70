//! DenseNet image classifier with torchvision-compatible parameter names, so
//! checkpoints fine-tuned in PyTorch load without renaming.
//!
//! Batch norm layers always use their running statistics; the network is only
//! ever evaluated, never trained.

use candle_core::{D, Result, Tensor};
use candle_nn::{
    BatchNorm, Conv2d, Conv2dConfig, Linear, Module, ModuleT, VarBuilder, batch_norm,
    conv2d_no_bias, linear,
};

const BN_EPS: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseNetConfig {
    pub growth_rate: usize,
    pub block_config: Vec<usize>,
    pub num_init_features: usize,
    pub bn_size: usize,
    pub num_classes: usize,
}

impl DenseNetConfig {
    /// DenseNet-169 with a two-class head.
    pub fn densenet169() -> Self {
        Self {
            growth_rate: 32,
            block_config: vec![6, 12, 32, 32],
            num_init_features: 64,
            bn_size: 4,
            num_classes: 2,
        }
    }

    /// A few-channel variant for exercising the load and inference path quickly.
    #[cfg(test)]
    pub fn tiny() -> Self {
        Self {
            growth_rate: 4,
            block_config: vec![1, 2, 1, 1],
            num_init_features: 8,
            bn_size: 2,
            num_classes: 2,
        }
    }

    /// Channels entering the classifier head.
    pub fn num_features(&self) -> usize {
        let mut features = self.num_init_features;
        for (i, &layers) in self.block_config.iter().enumerate() {
            features += layers * self.growth_rate;
            if i + 1 != self.block_config.len() {
                features /= 2;
            }
        }
        features
    }
}

#[derive(Debug, Clone)]
struct DenseLayer {
    norm1: BatchNorm,
    conv1: Conv2d,
    norm2: BatchNorm,
    conv2: Conv2d,
}

impl DenseLayer {
    fn new(in_features: usize, cfg: &DenseNetConfig, vb: VarBuilder) -> Result<Self> {
        let bottleneck = cfg.bn_size * cfg.growth_rate;
        let norm1 = batch_norm(in_features, BN_EPS, vb.pp("norm1"))?;
        let conv1 = conv2d_no_bias(
            in_features,
            bottleneck,
            1,
            Conv2dConfig::default(),
            vb.pp("conv1"),
        )?;
        let norm2 = batch_norm(bottleneck, BN_EPS, vb.pp("norm2"))?;
        let conv2 = conv2d_no_bias(
            bottleneck,
            cfg.growth_rate,
            3,
            Conv2dConfig {
                padding: 1,
                ..Default::default()
            },
            vb.pp("conv2"),
        )?;
        Ok(Self {
            norm1,
            conv1,
            norm2,
            conv2,
        })
    }
}

impl Module for DenseLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.norm1.forward_t(xs, false)?.relu()?;
        let xs = self.conv1.forward(&xs)?;
        let xs = self.norm2.forward_t(&xs, false)?.relu()?;
        self.conv2.forward(&xs)
    }
}

#[derive(Debug, Clone)]
struct DenseBlock {
    layers: Vec<DenseLayer>,
}

impl DenseBlock {
    fn new(
        num_layers: usize,
        in_features: usize,
        cfg: &DenseNetConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let layers = (0..num_layers)
            .map(|i| {
                DenseLayer::new(
                    in_features + i * cfg.growth_rate,
                    cfg,
                    vb.pp(format!("denselayer{}", i + 1)),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }
}

impl Module for DenseBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut features = xs.clone();
        for layer in &self.layers {
            let new_features = layer.forward(&features)?;
            features = Tensor::cat(&[&features, &new_features], 1)?;
        }
        Ok(features)
    }
}

#[derive(Debug, Clone)]
struct Transition {
    norm: BatchNorm,
    conv: Conv2d,
}

impl Transition {
    fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        let norm = batch_norm(in_features, BN_EPS, vb.pp("norm"))?;
        let conv = conv2d_no_bias(
            in_features,
            out_features,
            1,
            Conv2dConfig::default(),
            vb.pp("conv"),
        )?;
        Ok(Self { norm, conv })
    }
}

impl Module for Transition {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.norm.forward_t(xs, false)?.relu()?;
        self.conv.forward(&xs)?.avg_pool2d(2)
    }
}

#[derive(Debug, Clone)]
enum Stage {
    Block(DenseBlock),
    Transition(Transition),
}

#[derive(Debug, Clone)]
pub struct DenseNet {
    conv0: Conv2d,
    norm0: BatchNorm,
    stages: Vec<Stage>,
    norm5: BatchNorm,
    classifier: Linear,
}

impl DenseNet {
    pub fn new(cfg: &DenseNetConfig, vb: VarBuilder) -> Result<Self> {
        let features = vb.pp("features");
        let conv0 = conv2d_no_bias(
            3,
            cfg.num_init_features,
            7,
            Conv2dConfig {
                padding: 3,
                stride: 2,
                ..Default::default()
            },
            features.pp("conv0"),
        )?;
        let norm0 = batch_norm(cfg.num_init_features, BN_EPS, features.pp("norm0"))?;

        let mut stages = Vec::with_capacity(cfg.block_config.len() * 2);
        let mut num_features = cfg.num_init_features;
        for (i, &num_layers) in cfg.block_config.iter().enumerate() {
            let block = DenseBlock::new(
                num_layers,
                num_features,
                cfg,
                features.pp(format!("denseblock{}", i + 1)),
            )?;
            stages.push(Stage::Block(block));
            num_features += num_layers * cfg.growth_rate;

            if i + 1 != cfg.block_config.len() {
                let transition = Transition::new(
                    num_features,
                    num_features / 2,
                    features.pp(format!("transition{}", i + 1)),
                )?;
                stages.push(Stage::Transition(transition));
                num_features /= 2;
            }
        }

        let norm5 = batch_norm(num_features, BN_EPS, features.pp("norm5"))?;
        let classifier = linear(num_features, cfg.num_classes, vb.pp("classifier"))?;

        Ok(Self {
            conv0,
            norm0,
            stages,
            norm5,
            classifier,
        })
    }
}

impl Module for DenseNet {
    /// `(batch, 3, h, w)` images to `(batch, num_classes)` logits.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv0.forward(xs)?;
        let xs = self.norm0.forward_t(&xs, false)?.relu()?;
        // Post-ReLU activations are non-negative, so zero padding is
        // equivalent to the -inf padding of a padded max pool.
        let mut xs = xs
            .pad_with_zeros(2, 1, 1)?
            .pad_with_zeros(3, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;

        for stage in &self.stages {
            xs = match stage {
                Stage::Block(block) => block.forward(&xs)?,
                Stage::Transition(transition) => transition.forward(&xs)?,
            };
        }

        let xs = self.norm5.forward_t(&xs, false)?.relu()?;
        let xs = xs.mean(D::Minus1)?.mean(D::Minus1)?;
        self.classifier.forward(&xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn densenet169_head_width() {
        assert_eq!(DenseNetConfig::densenet169().num_features(), 1664);
    }

    #[test]
    fn forward_produces_one_logit_pair_per_image() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let cfg = DenseNetConfig::tiny();
        let model = DenseNet::new(&cfg, vb)?;

        let input = Tensor::randn(0f32, 1f32, (2, 3, 32, 32), &Device::Cpu)?;
        let logits = model.forward(&input)?;
        assert_eq!(logits.dims(), &[2, 2]);

        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        for expected in [
            "features.conv0.weight",
            "features.denseblock2.denselayer2.conv2.weight",
            "features.transition3.norm.running_var",
            "features.norm5.bias",
            "classifier.weight",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        Ok(())
    }
}
