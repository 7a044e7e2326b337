pub mod clock;
pub mod in_memory;
pub(crate) mod index;
pub mod paystack;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
