//! Built-in function passes.

pub mod multibuffer;

pub use multibuffer::MultibufferPass;
