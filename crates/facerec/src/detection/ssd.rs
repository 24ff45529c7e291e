//! Anchor/Prior generation for the Single Shot MultiBox face detector.
//!
//! Note that the implementation in this module only covers the prior configuration of the
//! RetinaFace (mobilenet) detector we ship post-processing for, not SSD networks in general.

use std::{ops::Index, sync::OnceLock};

use crate::resolution::Resolution;

/// An anchor (prior box) of an SSD network.
///
/// All values are normalized to the network input size and range from 0 to 1 (except for boxes of
/// the last layer, which may be larger than the input).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    x_center: f32,
    y_center: f32,
    width: f32,
    height: f32,
}

impl Anchor {
    pub fn new(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            x_center,
            y_center,
            width,
            height,
        }
    }

    #[inline]
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    #[inline]
    pub fn y_center(&self) -> f32 {
        self.y_center
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.height
    }
}

/// Describes an output layer of an SSD network.
pub struct LayerInfo {
    /// Downsampling factor of this layer's feature map relative to the network input.
    step: u32,
    /// Box sizes (in input pixels) of the anchors placed in each feature map cell.
    min_sizes: &'static [u32],
}

impl LayerInfo {
    /// Creates a new SSD layer description.
    ///
    /// # Parameters
    ///
    /// - `step`: stride of the layer's feature map, in input pixels. Must be non-zero.
    /// - `min_sizes`: one anchor of each of these sizes is created per feature map cell. Must not
    ///   be empty.
    pub const fn new(step: u32, min_sizes: &'static [u32]) -> Self {
        assert!(step != 0);
        assert!(!min_sizes.is_empty());
        Self { step, min_sizes }
    }
}

pub struct AnchorParams<'a> {
    /// List of output layers, in the order the network emits them.
    pub layers: &'a [LayerInfo],
}

/// Layer configuration of the mobilenet RetinaFace detector.
const RETINAFACE_LAYERS: &[LayerInfo] = &[
    LayerInfo::new(8, &[16, 32]),
    LayerInfo::new(16, &[64, 128]),
    LayerInfo::new(32, &[256, 512]),
];

/// An immutable table of anchors, indexed in network output order.
#[derive(Debug)]
pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    /// Computes the anchors for a network with input resolution `input`.
    ///
    /// Feature maps cover the input with `ceil(input / step)` cells per axis. Cells are visited
    /// row by row, and each cell yields one anchor per entry in the layer's `min_sizes`.
    pub fn calculate(params: &AnchorParams<'_>, input: Resolution) -> Self {
        let input_w = input.width() as f32;
        let input_h = input.height() as f32;
        let mut anchors = Vec::new();

        for layer in params.layers {
            let step = layer.step as f32;
            let width = input.width().div_ceil(layer.step);
            let height = input.height().div_ceil(layer.step);

            for y in 0..height {
                for x in 0..width {
                    for &min_size in layer.min_sizes {
                        anchors.push(Anchor {
                            x_center: (x as f32 + 0.5) * step / input_w,
                            y_center: (y as f32 + 0.5) * step / input_h,
                            width: min_size as f32 / input_w,
                            height: min_size as f32 / input_h,
                        });
                    }
                }
            }
        }

        log::debug!("computed {} anchors for {input} input", anchors.len());
        Self { anchors }
    }

    /// Returns the total number of SSD anchors/priors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter()
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}

/// The supported detector variants, distinguished by input resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorSet {
    /// `320x320` input, 4200 anchors.
    Small,
    /// `640x640` input, 16800 anchors.
    Large,
}

impl AnchorSet {
    /// Selects the anchor set matching a network's input resolution.
    ///
    /// Returns [`None`] if no supported network has this input resolution.
    pub fn for_input(res: Resolution) -> Option<Self> {
        match res {
            Resolution::DETECT_320 => Some(Self::Small),
            Resolution::DETECT_640 => Some(Self::Large),
            _ => None,
        }
    }

    /// Returns the network input resolution this anchor set belongs to.
    pub fn input_resolution(self) -> Resolution {
        match self {
            Self::Small => Resolution::DETECT_320,
            Self::Large => Resolution::DETECT_640,
        }
    }

    /// Returns the number of anchors (and therefore of raw network outputs per buffer).
    pub fn anchor_count(self) -> usize {
        self.anchors().anchor_count()
    }

    /// Returns the anchor table.
    ///
    /// The table is computed on first access and shared for the rest of the process.
    pub fn anchors(self) -> &'static Anchors {
        static SMALL: OnceLock<Anchors> = OnceLock::new();
        static LARGE: OnceLock<Anchors> = OnceLock::new();

        let cell = match self {
            Self::Small => &SMALL,
            Self::Large => &LARGE,
        };
        cell.get_or_init(|| {
            Anchors::calculate(
                &AnchorParams {
                    layers: RETINAFACE_LAYERS,
                },
                self.input_resolution(),
            )
        })
    }
}
