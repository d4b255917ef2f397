//! Image-to-image networks placed in front of a frozen classifier.

use std::fmt;
use std::str::FromStr;

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::blocks::ConvBlock;
use crate::norm::{NormMode, NormStats};
use crate::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Unet,
    UnetPlusPlus,
    Conv,
}

impl TransferKind {
    pub const ALL: [TransferKind; 3] = [Self::Unet, Self::UnetPlusPlus, Self::Conv];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unet => "Unet",
            Self::UnetPlusPlus => "UnetPlusPlus",
            Self::Conv => "Conv",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ModelError::UnknownTransfer {
                name: s.to_string(),
                expected: Self::ALL.map(Self::as_str).join(", "),
            })
    }
}

/// Layout of a `TransferNet`.
///
/// `encoder_channels` has one entry per resolution level (the last one is the
/// bottleneck) and `decoder_channels` one entry per upsampling level, listed
/// deepest first, so `decoder_channels.len() + 1 == encoder_channels.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferNetConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub encoder_channels: Vec<usize>,
    pub decoder_channels: Vec<usize>,
    /// Dense U-Net++ skip pathways instead of plain U-Net skips.
    pub nested: bool,
}

impl TransferNetConfig {
    pub fn for_kind(kind: TransferKind, in_channels: usize, out_channels: usize) -> Self {
        let (encoder_channels, decoder_channels) = match kind {
            TransferKind::Unet | TransferKind::UnetPlusPlus => {
                (vec![64, 128, 256, 512], vec![256, 128, 64])
            }
            TransferKind::Conv => (vec![64], Vec::new()),
        };
        Self {
            in_channels,
            out_channels,
            encoder_channels,
            decoder_channels,
            nested: kind == TransferKind::UnetPlusPlus,
        }
    }

    pub fn depth(&self) -> usize {
        self.decoder_channels.len()
    }

    /// Architecture family this layout belongs to.
    pub fn kind(&self) -> TransferKind {
        match (self.depth(), self.nested) {
            (0, _) => TransferKind::Conv,
            (_, true) => TransferKind::UnetPlusPlus,
            (_, false) => TransferKind::Unet,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TransferNet<B>, ModelError> {
        if self.encoder_channels.len() != self.decoder_channels.len() + 1 {
            return Err(ModelError::InvalidConfig(format!(
                "{} encoder levels need {} decoder levels, got {}",
                self.encoder_channels.len(),
                self.encoder_channels.len().saturating_sub(1),
                self.decoder_channels.len()
            )));
        }
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(ModelError::InvalidConfig(
                "transfer network needs at least one input and output channel".into(),
            ));
        }
        Ok(TransferNet::new(self, device))
    }

    /// Output channels of grid node `(level, column)`.
    fn node_channels(&self, level: usize, column: usize) -> usize {
        if column == 0 {
            self.encoder_channels[level]
        } else {
            self.decoder_channels[self.depth() - 1 - level]
        }
    }
}

/// Decoder nodes `(level, column)` in evaluation order.
///
/// Node `(i, j)` consumes the upsampled `(i + 1, j - 1)` and the skips of
/// level `i`. Plain U-Net keeps only the nodes on the `i + j == depth`
/// diagonal; U-Net++ evaluates the full triangle.
pub fn decoder_nodes(depth: usize, nested: bool) -> Vec<(usize, usize)> {
    let mut nodes = Vec::new();
    for column in 1..=depth {
        for level in 0..=depth - column {
            if nested || level + column == depth {
                nodes.push((level, column));
            }
        }
    }
    nodes
}

#[derive(Module, Debug)]
pub struct TransferNet<B: Backend> {
    encoder: Vec<ConvBlock<B>>,
    decoder: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
    head: Conv2d<B>,
    depth: usize,
    nested: bool,
}

impl<B: Backend> TransferNet<B> {
    fn new(cfg: &TransferNetConfig, device: &B::Device) -> Self {
        let depth = cfg.depth();
        let mut encoder = Vec::with_capacity(depth + 1);
        let mut prev = cfg.in_channels;
        for &width in &cfg.encoder_channels {
            encoder.push(ConvBlock::new(prev, width, device));
            prev = width;
        }

        let decoder = decoder_nodes(depth, cfg.nested)
            .into_iter()
            .map(|(level, column)| {
                let skips = if cfg.nested {
                    (0..column).map(|c| cfg.node_channels(level, c)).sum()
                } else {
                    cfg.node_channels(level, 0)
                };
                let below = cfg.node_channels(level + 1, column - 1);
                ConvBlock::new(skips + below, cfg.node_channels(level, column), device)
            })
            .collect();

        let top = cfg.node_channels(0, depth);
        Self {
            encoder,
            decoder,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            head: Conv2dConfig::new([top, cfg.out_channels], [1, 1]).init(device),
            depth,
            nested: cfg.nested,
        }
    }

    /// Map `[N, in, H, W]` to `[N, out, H, W]`.
    pub fn forward(&self, x: Tensor<B, 4>, mode: NormMode) -> Tensor<B, 4> {
        let mut stats = Vec::new();
        self.forward_stats(x, mode, &mut stats)
    }

    pub fn forward_stats(
        &self,
        x: Tensor<B, 4>,
        mode: NormMode,
        stats: &mut Vec<NormStats<B>>,
    ) -> Tensor<B, 4> {
        // grid[level][k] holds the nodes of that level in column order
        let mut grid: Vec<Vec<Tensor<B, 4>>> = Vec::with_capacity(self.depth + 1);
        let mut x = x;
        for (level, block) in self.encoder.iter().enumerate() {
            if level > 0 {
                x = self.pool.forward(x);
            }
            x = block.forward(x, mode, stats);
            grid.push(vec![x.clone()]);
        }

        let nodes = decoder_nodes(self.depth, self.nested);
        for (block, (level, _)) in self.decoder.iter().zip(nodes) {
            let mut inputs = if self.nested {
                grid[level].clone()
            } else {
                vec![grid[level][0].clone()]
            };
            let [_, _, height, width] = inputs[0].dims();
            if let Some(below) = grid[level + 1].last() {
                inputs.push(upsample_to(below.clone(), height, width));
            }
            let out = block.forward(Tensor::cat(inputs, 1), mode, stats);
            grid[level].push(out);
        }

        match grid.first().and_then(|level| level.last()) {
            Some(top) => self.head.forward(top.clone()),
            None => x,
        }
    }
}

fn upsample_to<B: Backend>(x: Tensor<B, 4>, height: usize, width: usize) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    if h == height && w == width {
        return x;
    }
    interpolate(
        x,
        [height, width],
        InterpolateOptions::new(InterpolateMode::Nearest),
    )
}

/// Build the named transfer network with fresh weights.
pub fn get_transfer_model<B: Backend>(
    kind: TransferKind,
    in_channels: usize,
    out_channels: usize,
    device: &B::Device,
) -> Result<TransferNet<B>, ModelError> {
    TransferNetConfig::for_kind(kind, in_channels, out_channels).init(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_unet_walks_the_diagonal() {
        assert_eq!(decoder_nodes(3, false), vec![(2, 1), (1, 2), (0, 3)]);
        assert!(decoder_nodes(0, false).is_empty());
    }

    #[test]
    fn nested_unet_fills_the_triangle() {
        let nodes = decoder_nodes(2, true);
        assert_eq!(nodes, vec![(0, 1), (1, 1), (0, 2)]);
    }

    #[test]
    fn config_reports_its_kind() {
        for kind in TransferKind::ALL {
            assert_eq!(TransferNetConfig::for_kind(kind, 3, 1).kind(), kind);
        }
    }

    #[test]
    fn kind_parsing_ignores_case() {
        assert_eq!("unetplusplus".parse::<TransferKind>().ok(), Some(TransferKind::UnetPlusPlus));
        assert!("segnet".parse::<TransferKind>().is_err());
    }
}
