//! Rendering core: frame stack, discrete layers, subtree surfaces, tree walk and the CPU backend.

pub(crate) mod backend;
pub(crate) mod context;
pub(crate) mod cpu;
pub(crate) mod drawing_ctx;
pub(crate) mod layer;
pub(crate) mod node;
pub(crate) mod session;
pub(crate) mod subtree;
pub(crate) mod surface_pool;
