// Persistence Layer - implementaciones de los puertos de almacenamiento

pub mod memory;

pub use memory::*;
