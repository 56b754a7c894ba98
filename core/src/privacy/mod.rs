// Privacy layer: onion encryption, release timing and cover fragments

pub mod cover;
pub mod onion;
pub mod timing;

pub use cover::{DummyFactory, DUMMIES_PER_INJECTION};
pub use onion::{peel_layer, peel_path, seal, OnionEncryptor, OnionError, LAYER_OVERHEAD};
pub use timing::TransmissionScheduler;
