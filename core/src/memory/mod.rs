pub mod dynamic_array;
pub mod generational_pool;
pub mod simple_pool;

pub use dynamic_array::DynamicArray;
pub use generational_pool::{GenPoolHandle, GenerationalPool};
pub use simple_pool::{SimplePool, SimplePoolHandle};
