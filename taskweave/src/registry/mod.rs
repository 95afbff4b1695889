//! Function definitions, applications and the registry that holds them.

mod application;
mod definition;
#[allow(clippy::module_inception)]
mod registry;

pub use application::{Application, FnApplication};
pub use definition::{
    is_valid_name, FunctionDefinition, ImageDescriptor, ResourceSpec, SchemaTag, DEFAULT_TIMEOUT,
};
pub use registry::FunctionRegistry;
