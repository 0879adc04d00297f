/// Graphics device module - GPU resource traits and the CPU mock device

pub mod graphics_device;
pub mod texture;
pub mod buffer;
pub mod mock_graphics_device;

pub use graphics_device::*;
pub use texture::*;
pub use buffer::*;
pub use mock_graphics_device::{MockGraphicsDevice, MockBuffer, MockTexture, MockDeviceStats};
