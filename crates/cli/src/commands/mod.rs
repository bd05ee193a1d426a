pub mod migrate;
pub mod returns;
pub mod settings;
pub mod worker;
