pub mod checksum;
pub mod folders;
pub mod info;
pub mod sync;
