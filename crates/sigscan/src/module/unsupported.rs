use super::{Module, ModuleError, Section};
use crate::Address;

/// Can't be constructed on this platform
pub(crate) enum ModuleHandle {}

pub(super) fn process_module() -> Result<Module, ModuleError> {
    Err(ModuleError::Unsupported)
}

pub(super) fn get_module(_name: &str) -> Result<Option<Module>, ModuleError> {
    Err(ModuleError::Unsupported)
}

pub(super) fn module_at(_base: Address) -> Result<Option<Module>, ModuleError> {
    Err(ModuleError::Unsupported)
}

pub(super) fn sections(_module: &Module) -> Result<Vec<Section>, ModuleError> {
    Err(ModuleError::Unsupported)
}
