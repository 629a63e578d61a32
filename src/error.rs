use thiserror::Error;

use crate::layer::LayerKind;

/// Fatal errors.
///
/// Only programming and configuration mistakes surface here. Everything a
/// hostile peer can cause — timeouts, garbage bytes, bad tags, reassembly
/// gaps — is reported through flagged containers and unsatisfied layer
/// results instead, so a fuzzing run never aborts on wire input.
#[derive(Debug, Error)]
pub enum Error {
    #[error("layer {0} does not support this configuration: {1}")]
    UnsupportedConfiguration(LayerKind, &'static str),

    #[error("no layer below to dispatch to")]
    EndOfStack,

    #[error("no configuration set on layer {0}")]
    NoConfiguration(LayerKind),

    #[error("no secrets installed for encryption level {0}")]
    MissingSecrets(&'static str),

    #[error("bad key material: {0}")]
    BadKeyMaterial(&'static str),

    #[error("crypto failure: {0}")]
    Crypto(&'static str),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
