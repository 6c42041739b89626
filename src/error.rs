//! Backend error types.
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no suitable physical device/queue family combination")]
    NoSuitableDevice,
    #[error("required extension unavailable: {0}")]
    MissingExtension(String),
    #[error("vulkan call failed: {0}")]
    Vk(#[from] vk::Result),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("shader function not found: {0}")]
    FunctionNotFound(String),
    #[error("spir-v reflection failed: {0}")]
    Spirv(#[from] spirv::ParseError),
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),
    #[error("device memory allocation failed")]
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, BackendError>;
