//! Pixel kernels used by backends: operators, masks and filter passes.

pub(crate) mod composite;
pub(crate) mod filter;
pub(crate) mod mask;
