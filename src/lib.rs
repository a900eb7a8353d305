//! Strata is a layer-compositing render engine for resolved vector-graphics documents.
//!
//! A [`Document`] arrives with geometry, transforms and paint already resolved. The engine walks
//! it with a [`DrawingCtx`], isolating groups that need offscreen compositing (opacity, masks,
//! filters, operators), and re-renders referenced subtrees into standalone surfaces for patterns,
//! masks, markers and filter inputs.
//!
//! - Build a [`Document`] with [`DocumentBuilder`]
//! - Pick a backend ([`CpuBackend`] ships with the crate)
//! - Call [`render_document`] or [`render_document_to_surface`]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod effects;
mod foundation;
mod render;
mod scene;

pub use crate::foundation::core::{
    Affine, BezPath, Color, PixelRect, Point, Rect, Rgba8Premul, Vec2,
};
pub use crate::foundation::error::{StrataError, StrataResult};

pub use crate::effects::composite::CompOp;
pub use crate::effects::filter::{Filter, FilterPrimitive, PixelPass};
pub use crate::effects::mask::MaskMode;

pub use crate::scene::NodeId;
pub use crate::scene::document::{
    ClipPathData, Document, DocumentBuilder, Glyph, GlyphRun, ImageData, MarkerData, MarkerOrient,
    Markers, MaskData, Node, NodeKind, PatternData, ShapeData, TextData,
};
pub use crate::scene::paint::{Cap, FillRule, Join, Paint, StrokeStyle};

pub use crate::render::backend::{
    BackendPaint, ClipPath, DrawingBackend, DrawingHandle, FrameRGBA, SurfaceId,
};
pub use crate::render::context::{Frame, LayerKind, RenderContext, SavedStack};
pub use crate::render::cpu::{CpuBackend, CpuBackendOpts};
pub use crate::render::drawing_ctx::{DrawingCtx, RenderMode, RenderStats};
pub use crate::render::layer::{GroupParams, LayerGuard};
pub use crate::render::session::{
    RenderOpts, render_document, render_document_to_surface, render_documents_parallel,
};
pub use crate::render::subtree::{NodeRenderResult, ResolutionSet};
pub use crate::render::surface_pool::{SurfacePoolOpts, SurfacePoolStats};
