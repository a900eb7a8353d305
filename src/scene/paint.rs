use crate::foundation::core::Color;
use crate::scene::NodeId;

pub use kurbo::{Cap, Join};

/// Winding rule used for fills and clip paths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FillRule {
    /// `nonzero`
    #[default]
    NonZero,
    /// `evenodd`
    EvenOdd,
}

/// Resolved paint for a fill or stroke.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Paint {
    /// Nothing is painted.
    #[default]
    None,
    /// Solid straight-alpha color.
    Color(Color),
    /// Tiled content of a pattern node.
    Pattern(NodeId),
}

impl Paint {
    /// Return `true` when the paint draws nothing.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub(crate) fn referenced_node(&self) -> Option<NodeId> {
        match self {
            Self::Pattern(id) => Some(*id),
            _ => None,
        }
    }
}

/// Resolved stroke parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct StrokeStyle {
    /// Stroke paint.
    pub paint: Paint,
    /// Stroke width in user units.
    pub width: f64,
    /// Stroke opacity in `[0, 1]`.
    pub opacity: f32,
    /// Line join.
    pub join: Join,
    /// Line cap.
    pub cap: Cap,
    /// Miter limit.
    pub miter_limit: f64,
    /// Dash lengths; empty for a solid stroke.
    pub dashes: Vec<f64>,
    /// Offset into the dash pattern.
    pub dash_offset: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            paint: Paint::None,
            width: 1.0,
            opacity: 1.0,
            join: Join::Miter,
            cap: Cap::Butt,
            miter_limit: 4.0,
            dashes: Vec::new(),
            dash_offset: 0.0,
        }
    }
}

impl StrokeStyle {
    /// Solid stroke of the given paint and width.
    pub fn solid(paint: Paint, width: f64) -> Self {
        Self {
            paint,
            width,
            ..Self::default()
        }
    }

    pub(crate) fn to_kurbo(&self) -> kurbo::Stroke {
        let stroke = kurbo::Stroke::new(self.width)
            .with_join(self.join)
            .with_caps(self.cap)
            .with_miter_limit(self.miter_limit);
        if self.dashes.is_empty() || self.dashes.iter().all(|d| *d <= 0.0) {
            stroke
        } else {
            stroke.with_dashes(self.dash_offset, self.dashes.iter().copied())
        }
    }
}
