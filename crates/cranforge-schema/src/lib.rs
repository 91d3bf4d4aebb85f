pub mod hash;
pub mod index;
pub mod types;

// Re-exports
pub use hash::Sha256Digest;
pub use index::{IndexEntry, PackageIndex, ParseError};
pub use types::*;

/// Packages distributed with the R runtime itself (base plus the recommended
/// set). The snapshot never carries entries for these, so the resolver treats
/// a dependency on any of them as satisfied.
pub const BUILTIN_PACKAGES: &[&str] = &[
    // base
    "R",
    "base",
    "compiler",
    "datasets",
    "graphics",
    "grDevices",
    "grid",
    "methods",
    "parallel",
    "splines",
    "stats",
    "stats4",
    "tcltk",
    "utils",
    "tools",
    // recommended
    "KernSmooth",
    "MASS",
    "Matrix",
    "boot",
    "class",
    "cluster",
    "codetools",
    "foreign",
    "lattice",
    "mgcv",
    "nlme",
    "nnet",
    "rpart",
    "spatial",
    "survival",
];

/// Returns `true` if `name` is shipped with the R runtime and therefore never
/// resolved, built, or published.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_PACKAGES.contains(&name)
}
