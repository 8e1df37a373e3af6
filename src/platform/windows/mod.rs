pub(crate) mod ffi;
mod device;
pub use device::Win32File;
