pub mod folder;
pub mod zones;
