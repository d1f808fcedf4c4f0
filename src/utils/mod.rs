pub mod compression;
pub mod file_io;
pub mod time;

#[cfg(test)]
mod compression_test;
