use rayon::prelude::*;

use crate::effects::filter::PixelPass;
use crate::foundation::core::Color;
use crate::foundation::error::{StrataError, StrataResult};
use crate::render::backend::{DrawingBackend, FrameRGBA, SurfaceId};
use crate::render::cpu::{CpuBackend, CpuBackendOpts};
use crate::render::drawing_ctx::{DrawingCtx, RenderStats};
use crate::scene::document::Document;

/// Options for one render call.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderOpts {
    /// Straight RGBA color the root surface is flooded with before drawing.
    pub background: Option<[u8; 4]>,
    /// Treat recoverable reference failures (cycles, failed allocations) as transparent content
    /// instead of aborting the render.
    pub recover_reference_errors: bool,
    /// Maximum number of isolated group layers open at once. Clip-only layers allocate nothing
    /// and do not count.
    pub max_layer_depth: usize,
}

impl Default for RenderOpts {
    fn default() -> Self {
        Self {
            background: None,
            recover_reference_errors: true,
            max_layer_depth: 256,
        }
    }
}

impl RenderOpts {
    /// Decode options from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> StrataResult<Self> {
        let opts: Self = serde_json::from_str(json)
            .map_err(|e| StrataError::serde(format!("render options: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Reject options no render could run with.
    pub fn validate(&self) -> StrataResult<()> {
        if self.max_layer_depth == 0 {
            return Err(StrataError::validation(
                "render option 'max_layer_depth' must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Render `doc` onto a fresh surface the size of the document and read it back.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(width = doc.width(), height = doc.height())
)]
pub fn render_document<B: DrawingBackend + ?Sized>(
    doc: &Document,
    backend: &mut B,
    opts: &RenderOpts,
) -> StrataResult<FrameRGBA> {
    opts.validate()?;
    let target = backend.create_surface(doc.width(), doc.height())?;
    let res = render_document_to_surface(doc, backend, target, opts)
        .and_then(|stats| {
            tracing::debug!(?stats, "document rendered");
            backend.read_pixels(target)
        });
    backend.release_surface(target);
    Ok(FrameRGBA {
        width: doc.width(),
        height: doc.height(),
        data: res?,
        premultiplied: true,
    })
}

/// Render `doc` onto a caller-owned surface. The surface is not cleared unless a background is
/// set.
#[tracing::instrument(level = "debug", skip_all, fields(target = target.0))]
pub fn render_document_to_surface<B: DrawingBackend + ?Sized>(
    doc: &Document,
    backend: &mut B,
    target: SurfaceId,
    opts: &RenderOpts,
) -> StrataResult<RenderStats> {
    opts.validate()?;
    if let Some([r, g, b, a]) = opts.background {
        let fill = Color::rgba(r, g, b, a).premultiplied();
        backend.apply_filter(target, &PixelPass::Flood(fill))?;
    }

    let mut dc = DrawingCtx::new(doc, backend, opts);
    dc.bind_root(target)?;
    let res = dc.render_node(doc.root());
    if res.is_err() {
        dc.unwind_to(1);
    }
    res?;
    if dc.context().depth() != 1 {
        dc.unwind_to(1);
        return Err(StrataError::mismatched_layers(
            "render finished with layers still open",
        ));
    }
    Ok(dc.into_stats())
}

/// Render several documents concurrently, one [`CpuBackend`] per worker thread.
///
/// Results come back in input order; each one fails or succeeds independently.
#[tracing::instrument(level = "debug", skip_all, fields(documents = documents.len()))]
pub fn render_documents_parallel(
    documents: &[Document],
    backend_opts: CpuBackendOpts,
    opts: &RenderOpts,
    threads: Option<usize>,
) -> StrataResult<Vec<StrataResult<FrameRGBA>>> {
    opts.validate()?;
    let pool = build_thread_pool(threads)?;
    Ok(pool.install(|| {
        documents
            .par_iter()
            .map_init(
                || CpuBackend::new(backend_opts),
                |backend, doc| render_document(doc, backend, opts),
            )
            .collect()
    }))
}

fn build_thread_pool(threads: Option<usize>) -> StrataResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(StrataError::validation(
            "render threading 'threads' must be >= 1 when set",
        ));
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| StrataError::Other(anyhow::anyhow!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
#[path = "../../tests/unit/render/session.rs"]
mod tests;
