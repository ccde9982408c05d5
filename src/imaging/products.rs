// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image product names.
//!
//! Every product of iteration N is named `<imagename>.<stokes>.iter<N>.<suffix>`;
//! multi-term deconvolution appends `.tt<k>` to the Taylor-term products.

use strum_macros::{EnumIter, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum Product {
    #[strum(serialize = "model")]
    Model,

    #[strum(serialize = "image")]
    Image,

    #[strum(serialize = "residual")]
    Residual,

    #[strum(serialize = "psf")]
    Psf,

    /// The primary beam ("flux") image.
    #[strum(serialize = "pb")]
    Pb,

    /// The mask the engine actually cleaned with.
    #[strum(serialize = "mask")]
    Mask,

    #[strum(serialize = "image.pbcor")]
    ImagePbcor,

    /// The spectral index image (mtmfs only).
    #[strum(serialize = "alpha")]
    Alpha,

    #[strum(serialize = "sumwt")]
    Sumwt,

    #[strum(serialize = "weight")]
    Weight,
}

impl Product {
    pub fn suffix(self) -> &'static str {
        self.into()
    }

    /// Does this product have one image per Taylor term?
    fn is_multiterm(self) -> bool {
        !matches!(self, Product::Mask | Product::Alpha)
    }

    /// The products an iteration restarts from.
    pub(crate) const RESTART: [Product; 5] = [
        Product::Psf,
        Product::Residual,
        Product::Model,
        Product::Pb,
        Product::Sumwt,
    ];
}

/// The name given to the deconvolution engine for iteration `iteration`.
pub fn iteration_prefix(imagename: &str, stokes: &str, iteration: u32) -> String {
    format!("{imagename}.{stokes}.iter{iteration}")
}

/// The name of a product. `nterms` is `Some` for multi-term deconvolution;
/// the zeroth Taylor term is returned.
pub fn product_name(
    imagename: &str,
    stokes: &str,
    iteration: u32,
    product: Product,
    nterms: Option<u32>,
) -> String {
    let prefix = iteration_prefix(imagename, stokes, iteration);
    match nterms {
        Some(_) if product.is_multiterm() => format!("{prefix}.{}.tt0", product.suffix()),
        _ => format!("{prefix}.{}", product.suffix()),
    }
}

/// All of the images that make up a product. Multi-term products have one
/// image per Taylor term, except for the PSF which has 2·nterms − 1.
pub fn product_images(
    imagename: &str,
    stokes: &str,
    iteration: u32,
    product: Product,
    nterms: Option<u32>,
) -> Vec<String> {
    let prefix = iteration_prefix(imagename, stokes, iteration);
    match nterms {
        Some(n) if product.is_multiterm() => {
            let num_terms = if product == Product::Psf { 2 * n - 1 } else { n };
            (0..num_terms)
                .map(|t| format!("{prefix}.{}.tt{t}", product.suffix()))
                .collect()
        }
        _ => vec![format!("{prefix}.{}", product.suffix())],
    }
}

/// The clean mask prepared by the sequence manager for an iteration.
pub fn cleanmask_name(imagename: &str, stokes: &str, iteration: u32) -> String {
    format!("{}.cleanmask", iteration_prefix(imagename, stokes, iteration))
}
