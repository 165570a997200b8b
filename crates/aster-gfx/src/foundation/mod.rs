pub mod debug;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod vmem_allocator;
