/**
 * port module
 * Free TCP port allocation for mock services
 */

pub mod allocator;

pub use allocator::PortAllocator;
